use avm_interface::InterfaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Compilation failed: {0}")]
    CompilationFailed(String),

    #[error("Instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("Missing guest export: {0}")]
    MissingExport(String),

    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    #[error("Guest allocation failed: {0}")]
    Allocation(String),

    #[error("Guest memory access out of bounds: {len} bytes at {ptr:#x} (memory size {size})")]
    MemoryAccess { ptr: u32, len: u32, size: usize },

    #[error("Guest string at {ptr:#x}+{len} is not valid UTF-8: {source}. Original data is: {payload}")]
    InvalidUtf8 {
        ptr: u32,
        len: u32,
        payload: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("Buffer of {0} bytes does not fit into 32-bit guest memory")]
    TooLarge(usize),

    #[error("Guest memory is not attached to this store")]
    Detached,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Particle did not settle after {rounds} rounds")]
    TooManyRounds { rounds: usize },

    #[error(transparent)]
    Interface(#[from] InterfaceError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
