//! Descriptor blob decoding for the native backend (§4.5.1, §6.2).
//!
//! Descriptor blobs arrive in the module's data table in one of two
//! shapes: a small self-describing binary format, or UTF-8 JSON. Both are
//! decoded into the same strongly typed descriptor structs so the native
//! backend never branches on the wire format after this module.

use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBindingType {
    Uniform,
    Storage,
    ReadOnlyStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerBindingType {
    Filtering,
    NonFiltering,
    Comparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float,
    UnfilterableFloat,
    Depth,
    Sint,
    Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDimension {
    D1,
    D2,
    D2Array,
    Cube,
    CubeArray,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTextureAccess {
    WriteOnly,
    ReadOnly,
    ReadWrite,
}

macro_rules! code_table {
    ($name:ident, $ty:ty, { $($code:literal => $variant:expr),+ $(,)? }) => {
        pub fn $name(code: u8) -> Result<$ty, CoreError> {
            match code {
                $($code => Ok($variant),)+
                other => Err(CoreError::InvalidArgument(format!(
                    concat!(stringify!($ty), " code {} is not recognized"),
                    other
                ))),
            }
        }
    };
}

code_table!(texture_format_from_code, TextureFormat, {
    0 => TextureFormat::Rgba8Unorm,
    1 => TextureFormat::Rgba8UnormSrgb,
    2 => TextureFormat::Bgra8Unorm,
    3 => TextureFormat::Bgra8UnormSrgb,
    4 => TextureFormat::Rgba16Float,
    5 => TextureFormat::R32Float,
    6 => TextureFormat::Depth32Float,
});

code_table!(topology_from_code, PrimitiveTopology, {
    0 => PrimitiveTopology::TriangleList,
    1 => PrimitiveTopology::TriangleStrip,
    2 => PrimitiveTopology::LineList,
    3 => PrimitiveTopology::LineStrip,
    4 => PrimitiveTopology::PointList,
});

code_table!(cull_mode_from_code, CullMode, {
    0 => CullMode::None,
    1 => CullMode::Front,
    2 => CullMode::Back,
});

code_table!(compare_function_from_code, CompareFunction, {
    0 => CompareFunction::Never,
    1 => CompareFunction::Less,
    2 => CompareFunction::Equal,
    3 => CompareFunction::LessEqual,
    4 => CompareFunction::Greater,
    5 => CompareFunction::NotEqual,
    6 => CompareFunction::GreaterEqual,
    7 => CompareFunction::Always,
});

code_table!(buffer_binding_type_from_code, BufferBindingType, {
    0 => BufferBindingType::Uniform,
    1 => BufferBindingType::Storage,
    2 => BufferBindingType::ReadOnlyStorage,
});

code_table!(sampler_binding_type_from_code, SamplerBindingType, {
    0 => SamplerBindingType::Filtering,
    1 => SamplerBindingType::NonFiltering,
    2 => SamplerBindingType::Comparison,
});

code_table!(texture_sample_type_from_code, TextureSampleType, {
    0 => TextureSampleType::Float,
    1 => TextureSampleType::UnfilterableFloat,
    2 => TextureSampleType::Depth,
    3 => TextureSampleType::Sint,
    4 => TextureSampleType::Uint,
});

code_table!(view_dimension_from_code, ViewDimension, {
    0 => ViewDimension::D1,
    1 => ViewDimension::D2,
    2 => ViewDimension::D2Array,
    3 => ViewDimension::Cube,
    4 => ViewDimension::CubeArray,
    5 => ViewDimension::D3,
});

code_table!(storage_texture_access_from_code, StorageTextureAccess, {
    0 => StorageTextureAccess::WriteOnly,
    1 => StorageTextureAccess::ReadOnly,
    2 => StorageTextureAccess::ReadWrite,
});

/// One decoded field from the binary descriptor format.
#[derive(Debug, Clone)]
pub enum FieldValue {
    U8(u8),
    U32(u32),
    U64(u64),
    F32(f32),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct BinaryDescriptor {
    pub type_tag: u8,
    pub fields: Vec<(u8, FieldValue)>,
}

/// Value-type tags for the binary descriptor's `[value_type:u8]` byte.
mod value_type {
    pub const U8: u8 = 0;
    pub const U32: u8 = 1;
    pub const U64: u8 = 2;
    pub const F32: u8 = 3;
    pub const BYTES: u8 = 4;
}

/// Decode `[type_tag:u8][field_count:u8]{[field_id:u8][value_type:u8][value…]}`.
pub fn parse_binary(blob: &[u8]) -> Result<BinaryDescriptor, CoreError> {
    let mut p = 0usize;
    let byte = |p: usize| -> Result<u8, CoreError> {
        blob.get(p).copied().ok_or(CoreError::UnexpectedEnd {
            what: "descriptor byte",
            pc: p,
        })
    };

    let type_tag = byte(p)?;
    p += 1;
    let field_count = byte(p)?;
    p += 1;

    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let field_id = byte(p)?;
        p += 1;
        let value_type = byte(p)?;
        p += 1;
        let value = match value_type {
            value_type::U8 => {
                let v = byte(p)?;
                p += 1;
                FieldValue::U8(v)
            }
            value_type::U32 => {
                let bytes = blob
                    .get(p..p + 4)
                    .ok_or(CoreError::UnexpectedEnd { what: "u32 field", pc: p })?;
                p += 4;
                FieldValue::U32(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            value_type::U64 => {
                let bytes = blob
                    .get(p..p + 8)
                    .ok_or(CoreError::UnexpectedEnd { what: "u64 field", pc: p })?;
                p += 8;
                FieldValue::U64(u64::from_le_bytes(bytes.try_into().unwrap()))
            }
            value_type::F32 => {
                let bytes = blob
                    .get(p..p + 4)
                    .ok_or(CoreError::UnexpectedEnd { what: "f32 field", pc: p })?;
                p += 4;
                FieldValue::F32(f32::from_le_bytes(bytes.try_into().unwrap()))
            }
            value_type::BYTES => {
                let len_bytes = blob
                    .get(p..p + 4)
                    .ok_or(CoreError::UnexpectedEnd { what: "bytes field len", pc: p })?;
                let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
                p += 4;
                let data = blob
                    .get(p..p + len)
                    .ok_or(CoreError::UnexpectedEnd { what: "bytes field", pc: p })?;
                p += len;
                FieldValue::Bytes(data.to_vec())
            }
            other => {
                return Err(CoreError::InvalidArgument(format!(
                    "unknown descriptor value type {other}"
                )))
            }
        };
        fields.push((field_id, value));
    }

    Ok(BinaryDescriptor { type_tag, fields })
}

/// A descriptor blob is JSON when it starts with `{` after skipping
/// leading ASCII whitespace; the binary format's `type_tag` byte is
/// always < 0x20 in practice, so this sniff never misfires on real data.
pub fn looks_like_json(blob: &[u8]) -> bool {
    blob.iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{')
        .unwrap_or(false)
}

pub fn parse_json(blob: &[u8]) -> Result<Value, CoreError> {
    serde_json::from_slice(blob)
        .map_err(|e| CoreError::InvalidArgument(format!("malformed descriptor JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_binary_descriptor_fields() {
        let mut blob = vec![0x01, 0x02]; // type_tag=1, field_count=2
        blob.push(0); // field_id 0
        blob.push(value_type::U32);
        blob.extend_from_slice(&42u32.to_le_bytes());
        blob.push(1); // field_id 1
        blob.push(value_type::U8);
        blob.push(7);

        let decoded = parse_binary(&blob).unwrap();
        assert_eq!(decoded.type_tag, 1);
        assert_eq!(decoded.fields.len(), 2);
        match decoded.fields[0].1 {
            FieldValue::U32(v) => assert_eq!(v, 42),
            _ => panic!("expected u32"),
        }
    }

    #[test]
    fn sniffs_json_vs_binary() {
        assert!(looks_like_json(b"  {\"a\":1}"));
        assert!(!looks_like_json(&[0x01, 0x00]));
    }

    #[test]
    fn code_tables_reject_unknown_codes() {
        assert!(texture_format_from_code(200).is_err());
        assert!(topology_from_code(0).is_ok());
    }
}
