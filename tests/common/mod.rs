//! Shared container-building helper for the integration suite. Hand-lays
//! out the container the same way `Module::load` expects to read it back,
//! independent of `Module::encode` so these tests exercise the on-disk
//! format rather than the round-trip path.

use gpuvm::module::{MAGIC, SUPPORTED_VERSION};

const HEADER_LEN: usize = 28;

pub struct ContainerBuilder {
    strings: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
    wgsl: Vec<(u16, Vec<u16>)>,
    pub bytecode: Vec<u8>,
    plugin_bits: u8,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            data: Vec::new(),
            wgsl: Vec::new(),
            bytecode: Vec::new(),
            plugin_bits: 0b0011_1111,
        }
    }

    pub fn push_data(&mut self, blob: &[u8]) -> u32 {
        self.data.push(blob.to_vec());
        (self.data.len() - 1) as u32
    }

    pub fn push_string(&mut self, s: &str) -> u32 {
        self.strings.push(s.as_bytes().to_vec());
        (self.strings.len() - 1) as u32
    }

    pub fn push_wgsl(&mut self, data_id: u16, deps: Vec<u16>) -> u32 {
        self.wgsl.push((data_id, deps));
        (self.wgsl.len() - 1) as u32
    }

    pub fn set_plugins(&mut self, bits: u8) {
        self.plugin_bits = bits & 0b0011_1111;
    }

    pub fn build(self) -> Vec<u8> {
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
        for (data_id, deps) in &self.wgsl {
            wgsl_section.extend_from_slice(&data_id.to_le_bytes());
            wgsl_section.push(deps.len() as u8);
            for dep in deps {
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
        out.push(self.plugin_bits);
        out.push(0);
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
