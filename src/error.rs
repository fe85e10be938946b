//! Typed error taxonomy for the execution core.
//!
//! Every fallible entry point in this crate returns [`CoreError`]. Variants
//! are grouped the way the design doc's taxonomy groups them (container,
//! decode, reference, state, backend, resource) so callers can match on a
//! category without caring about the exact opcode or field that failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // --- container ---
    #[error("bad magic bytes: expected b\"PNGB\", found {found:?}")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported container version {found} (supported: {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("container truncated: needed at least {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("{table} table offset {offset} is out of bounds for a blob of {len} bytes")]
    OffsetOutOfRange {
        table: &'static str,
        offset: u32,
        len: usize,
    },
    #[error("{table} table has {count} entries, exceeding the maximum of {max}")]
    TableTooLarge {
        table: &'static str,
        count: usize,
        max: usize,
    },

    // --- decode ---
    #[error("unknown opcode byte 0x{opcode:02x} at pc={pc}")]
    UnknownOpcode { opcode: u8, pc: usize },
    #[error("unexpected end of bytecode while decoding {what} at pc={pc}")]
    UnexpectedEnd { what: &'static str, pc: usize },
    #[error("invalid varint lead byte 0x{lead:02x} at pc={pc}")]
    InvalidVarint { lead: u8, pc: usize },

    // --- reference ---
    #[error("{kind} id {id} is out of range (table has {len} entries)")]
    IdOutOfRange {
        kind: &'static str,
        id: u32,
        len: usize,
    },
    #[error("exec_pass_once referenced unknown pass id {pass_id}")]
    UnknownPassOnce { pass_id: u32 },
    #[error("create_shader referenced unknown wgsl module id {wgsl_id}")]
    UnknownWgslModule { wgsl_id: u32 },
    #[error("array id {id} was never created with create_typed_array")]
    ArrayNotFound { id: u32 },
    #[error("wgsl dependency graph exceeded the traversal cap (possible cycle)")]
    DependencyDepthExceeded,

    // --- state ---
    #[error("attempted to begin a pass while one is already active")]
    PassAlreadyActive,
    #[error("end_pass issued with no active pass")]
    NoActivePass,
    #[error("submit issued while a pass is still open")]
    SubmitWithOpenPass,
    #[error("define_pass {pass_id} is missing a matching end_pass_def")]
    UnterminatedPassDefinition { pass_id: u32 },

    // --- backend ---
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),
    #[error("pipeline creation failed: {0}")]
    PipelineCreate(String),
    #[error("no surface configured for this animation")]
    NoSurfaceConfigured,
    #[error("surface texture unavailable: {0}")]
    SurfaceTextureUnavailable(String),
    #[error("texture {id} not found")]
    TextureNotFound { id: u32 },
    #[error("failed to acquire a GPU adapter/device")]
    ContextFailure,

    // --- resource ---
    #[error("resource pool of size {pool_size} is invalid (pool_size must be >= 1)")]
    InvalidResource { pool_size: u32 },
    #[error("plugin {plugin} is disabled for this module")]
    PluginDisabled { plugin: &'static str },
    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // --- host lifecycle ---
    #[error("runtime has not been initialized; call init() first")]
    NotInitialized,
    #[error("runtime is already initialized")]
    AlreadyInitialized,
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Non-zero host-facing error codes, mirroring the lifecycle API's
/// `error_code` return values. Kept separate from [`CoreError`] so the
/// rich internal taxonomy can evolve without breaking the stable ABI-ish
/// surface a host embedder polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    NotInitialized = 1,
    AlreadyInitialized = 2,
    ContextFailure = 3,
    InvalidModule = 4,
    ShaderCompilation = 5,
    PipelineCreation = 6,
    ResourceNotFound = 7,
    OutOfMemory = 8,
    InvalidArgument = 9,
    RenderFailed = 10,
    ComputeFailed = 11,
    SurfaceTextureUnavailable = 12,
}

impl From<&CoreError> for ErrorCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::NotInitialized => ErrorCode::NotInitialized,
            CoreError::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            CoreError::ContextFailure => ErrorCode::ContextFailure,
            CoreError::BadMagic { .. }
            | CoreError::UnsupportedVersion { .. }
            | CoreError::Truncated { .. }
            | CoreError::OffsetOutOfRange { .. }
            | CoreError::TableTooLarge { .. } => ErrorCode::InvalidModule,
            CoreError::ShaderCompile(_) => ErrorCode::ShaderCompilation,
            CoreError::PipelineCreate(_) => ErrorCode::PipelineCreation,
            CoreError::TextureNotFound { .. }
            | CoreError::IdOutOfRange { .. }
            | CoreError::UnknownWgslModule { .. }
            | CoreError::ArrayNotFound { .. } => ErrorCode::ResourceNotFound,
            CoreError::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            CoreError::InvalidResource { .. } | CoreError::InvalidArgument(_) => {
                ErrorCode::InvalidArgument
            }
            CoreError::SurfaceTextureUnavailable(_) => ErrorCode::SurfaceTextureUnavailable,
            CoreError::NoSurfaceConfigured => ErrorCode::ContextFailure,
            _ => ErrorCode::RenderFailed,
        }
    }
}
