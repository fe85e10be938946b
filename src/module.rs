//! Module container loader (§3.1, §4.1, §6.1).
//!
//! Parses the fixed-layout binary container into a [`Module`] that owns
//! its backing bytes and exposes the four tables as borrowed views.
//! Nothing in this crate mutates a `Module` after [`Module::load`]
//! returns; dispatcher and backend share it behind an `Arc`.

use crate::error::CoreError;
use crate::opcode::PluginSet;

pub const MAGIC: [u8; 4] = *b"PNGB";
pub const SUPPORTED_VERSION: u16 = 1;

pub const MAX_STRINGS: usize = 1 << 16;
pub const MAX_DATA_BLOBS: usize = 1 << 16;
pub const MAX_WGSL_MODULES: usize = 64;
pub const MAX_WGSL_DEPS: usize = 16;
pub const MAX_BYTECODE_LEN: usize = 1 << 20;

const HEADER_LEN: usize = 28;

/// One entry of the WGSL dependency table (§3.1).
#[derive(Debug, Clone)]
pub struct WgslEntry {
    pub data_id: u16,
    pub deps: Vec<u16>,
}

/// The immutable, loaded projection of a module file.
#[derive(Debug)]
pub struct Module {
    pub plugin_set: PluginSet,
    strings: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
    wgsl: Vec<WgslEntry>,
    bytecode: Vec<u8>,
}

impl Module {
    /// Parse `bytes` into a `Module`. Fails atomically: on any error no
    /// partially-constructed module is returned.
    pub fn load(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < HEADER_LEN {
            return Err(CoreError::Truncated {
                needed: HEADER_LEN,
                got: bytes.len(),
            });
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(CoreError::BadMagic { found: magic });
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != SUPPORTED_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSION,
            });
        }

        let plugin_byte = bytes[6];
        let plugin_set = PluginSet(plugin_byte & 0b0011_1111);

        let strings_offset = read_u32(bytes, 8)?;
        let data_offset = read_u32(bytes, 12)?;
        let wgsl_offset = read_u32(bytes, 16)?;
        let bytecode_offset = read_u32(bytes, 20)?;
        let end_offset = read_u32(bytes, 24)?;

        if end_offset as usize != bytes.len() {
            return Err(CoreError::Truncated {
                needed: end_offset as usize,
                got: bytes.len(),
            });
        }

        let (strings, after_strings) =
            parse_blob_table(bytes, strings_offset as usize, "strings", MAX_STRINGS)?;
        let (data, after_data) =
            parse_blob_table(bytes, data_offset as usize, "data", MAX_DATA_BLOBS)?;
        let wgsl = parse_wgsl_table(bytes, wgsl_offset as usize)?;

        // These aren't load-bearing for bytecode parsing (bytecode_offset
        // is authoritative) but a well-formed container keeps them
        // consistent; ignore otherwise since the container only declares
        // one true source of truth per table via its offset.
        let _ = after_strings;
        let _ = after_data;

        let bytecode_start = bytecode_offset as usize;
        if bytecode_start > bytes.len() || end_offset as usize > bytes.len() {
            return Err(CoreError::OffsetOutOfRange {
                table: "bytecode",
                offset: bytecode_offset,
                len: bytes.len(),
            });
        }
        let bytecode = bytes[bytecode_start..end_offset as usize].to_vec();
        if bytecode.len() > MAX_BYTECODE_LEN {
            return Err(CoreError::TableTooLarge {
                table: "bytecode",
                count: bytecode.len(),
                max: MAX_BYTECODE_LEN,
            });
        }

        for entry in &wgsl {
            if entry.data_id as usize >= data.len() {
                return Err(CoreError::IdOutOfRange {
                    kind: "wgsl data",
                    id: entry.data_id as u32,
                    len: data.len(),
                });
            }
            for dep in &entry.deps {
                if *dep as usize >= wgsl.len() {
                    return Err(CoreError::IdOutOfRange {
                        kind: "wgsl dep",
                        id: *dep as u32,
                        len: wgsl.len(),
                    });
                }
            }
        }

        Ok(Module {
            plugin_set,
            strings,
            data,
            wgsl,
            bytecode,
        })
    }

    pub fn string(&self, id: u32) -> Option<&[u8]> {
        self.strings.get(id as usize).map(Vec::as_slice)
    }

    pub fn data(&self, id: u32) -> Option<&[u8]> {
        self.data.get(id as usize).map(Vec::as_slice)
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn strings_len(&self) -> usize {
        self.strings.len()
    }

    pub fn wgsl(&self, id: u32) -> Option<&WgslEntry> {
        self.wgsl.get(id as usize)
    }

    pub fn wgsl_len(&self) -> usize {
        self.wgsl.len()
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Re-encode this module into container bytes. Used by the round-trip
    /// test suite (§8) and available to hosts that want to persist a
    /// module they assembled at runtime.
    pub fn encode(&self) -> Vec<u8> {
        let mut strings_section = Vec::new();
        strings_section.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        for s in &self.strings {
            strings_section.extend_from_slice(&(s.len() as u32).to_le_bytes());
            strings_section.extend_from_slice(s);
        }

        let mut data_section = Vec::new();
        data_section.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        for d in &self.data {
            data_section.extend_from_slice(&(d.len() as u32).to_le_bytes());
            data_section.extend_from_slice(d);
        }

        let mut wgsl_section = Vec::new();
        wgsl_section.extend_from_slice(&(self.wgsl.len() as u32).to_le_bytes());
        for entry in &self.wgsl {
            wgsl_section.extend_from_slice(&entry.data_id.to_le_bytes());
            wgsl_section.push(entry.deps.len() as u8);
            for dep in &entry.deps {
                wgsl_section.extend_from_slice(&dep.to_le_bytes());
            }
        }

        let strings_offset = HEADER_LEN as u32;
        let data_offset = strings_offset + strings_section.len() as u32;
        let wgsl_offset = data_offset + data_section.len() as u32;
        let bytecode_offset = wgsl_offset + wgsl_section.len() as u32;
        let end_offset = bytecode_offset + self.bytecode.len() as u32;

        let mut out = Vec::with_capacity(end_offset as usize);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        out.push(self.plugin_set.0);
        out.push(0); // reserved
        out.extend_from_slice(&strings_offset.to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&wgsl_offset.to_le_bytes());
        out.extend_from_slice(&bytecode_offset.to_le_bytes());
        out.extend_from_slice(&end_offset.to_le_bytes());
        out.extend_from_slice(&strings_section);
        out.extend_from_slice(&data_section);
        out.extend_from_slice(&wgsl_section);
        out.extend_from_slice(&self.bytecode);
        out
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, CoreError> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or(CoreError::Truncated {
            needed: offset + 4,
            got: bytes.len(),
        })?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn parse_blob_table(
    bytes: &[u8],
    offset: usize,
    table: &'static str,
    max: usize,
) -> Result<(Vec<Vec<u8>>, usize), CoreError> {
    if offset + 4 > bytes.len() {
        return Err(CoreError::OffsetOutOfRange {
            table,
            offset: offset as u32,
            len: bytes.len(),
        });
    }
    let count = read_u32(bytes, offset)? as usize;
    if count > max {
        return Err(CoreError::TableTooLarge {
            table,
            count,
            max,
        });
    }
    let mut cursor = offset + 4;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(bytes, cursor)? as usize;
        cursor += 4;
        let blob = bytes
            .get(cursor..cursor + len)
            .ok_or(CoreError::OffsetOutOfRange {
                table,
                offset: cursor as u32,
                len: bytes.len(),
            })?;
        out.push(blob.to_vec());
        cursor += len;
    }
    Ok((out, cursor))
}

fn parse_wgsl_table(bytes: &[u8], offset: usize) -> Result<Vec<WgslEntry>, CoreError> {
    if offset + 4 > bytes.len() {
        return Err(CoreError::OffsetOutOfRange {
            table: "wgsl",
            offset: offset as u32,
            len: bytes.len(),
        });
    }
    let count = read_u32(bytes, offset)? as usize;
    if count > MAX_WGSL_MODULES {
        return Err(CoreError::TableTooLarge {
            table: "wgsl",
            count,
            max: MAX_WGSL_MODULES,
        });
    }
    let mut cursor = offset + 4;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let data_id_bytes = bytes
            .get(cursor..cursor + 2)
            .ok_or(CoreError::OffsetOutOfRange {
                table: "wgsl",
                offset: cursor as u32,
                len: bytes.len(),
            })?;
        let data_id = u16::from_le_bytes(data_id_bytes.try_into().unwrap());
        cursor += 2;
        let dep_count = *bytes.get(cursor).ok_or(CoreError::OffsetOutOfRange {
            table: "wgsl",
            offset: cursor as u32,
            len: bytes.len(),
        })? as usize;
        cursor += 1;
        if dep_count > MAX_WGSL_DEPS {
            return Err(CoreError::TableTooLarge {
                table: "wgsl deps",
                count: dep_count,
                max: MAX_WGSL_DEPS,
            });
        }
        let mut deps = Vec::with_capacity(dep_count);
        for _ in 0..dep_count {
            let dep_bytes = bytes
                .get(cursor..cursor + 2)
                .ok_or(CoreError::OffsetOutOfRange {
                    table: "wgsl",
                    offset: cursor as u32,
                    len: bytes.len(),
                })?;
            deps.push(u16::from_le_bytes(dep_bytes.try_into().unwrap()));
            cursor += 2;
        }
        out.push(WgslEntry { data_id, deps });
    }
    Ok(out)
}
