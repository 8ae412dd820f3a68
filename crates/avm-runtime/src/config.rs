use std::path::{Path, PathBuf};

use avm_interface::{LogLevel, ProtocolVersion, RuntimeLimits};
use serde::Deserialize;

use crate::error::RuntimeError;
use crate::storage::ModuleCache;

pub const DEFAULT_INIT_EXPORT: &str = "main";
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// How one interpreter instance is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub protocol: ProtocolVersion,
    /// Guest log lines more verbose than this never reach the sink. Also
    /// passed to the guest where the protocol carries it.
    pub log_level: LogLevel,
    /// Export called once after instantiation.
    pub init_export: String,
    /// Identity returned by the peer-id import of the callback protocol.
    pub current_peer_id: Option<String>,
    /// Cap on guest linear memory; `None` leaves it to the module.
    pub max_memory_bytes: Option<usize>,
    /// Link WASI preview 1 (deny-default context).
    pub wasi: bool,
    /// Directory for precompiled modules; `None` always compiles.
    pub cache_dir: Option<PathBuf>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::default(),
            log_level: LogLevel::default(),
            init_export: DEFAULT_INIT_EXPORT.into(),
            current_peer_id: None,
            max_memory_bytes: None,
            wasi: false,
            cache_dir: None,
        }
    }
}

impl InterpreterConfig {
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_init_export(mut self, name: impl Into<String>) -> Self {
        self.init_export = name.into();
        self
    }

    pub fn with_current_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.current_peer_id = Some(peer_id.into());
        self
    }

    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_wasi(mut self, enabled: bool) -> Self {
        self.wasi = enabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// File-level configuration, read from TOML.
#[derive(Debug, Deserialize)]
pub struct AvmConfig {
    pub interpreter: InterpreterSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Debug, Deserialize)]
pub struct InterpreterSection {
    pub wasm_path: PathBuf,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_init_export")]
    pub init_export: String,
    pub current_peer_id: Option<String>,
    #[serde(default)]
    pub wasi: bool,
    /// Enable the module cache at its default location.
    #[serde(default)]
    pub cache: bool,
    /// Enable the module cache at an explicit location.
    pub cache_dir: Option<PathBuf>,
}

fn default_init_export() -> String {
    DEFAULT_INIT_EXPORT.into()
}

#[derive(Debug, Deserialize)]
pub struct LimitsSection {
    pub max_memory_bytes: Option<usize>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(flatten)]
    pub particle: RuntimeLimits,
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_memory_bytes: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            particle: RuntimeLimits::default(),
        }
    }
}

impl AvmConfig {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, RuntimeError> {
        toml::from_str(content)
            .map_err(|e| RuntimeError::InvalidConfig(format!("Failed to parse config: {e}")))
    }

    pub fn interpreter_config(&self) -> InterpreterConfig {
        let section = &self.interpreter;
        let cache_dir = match (&section.cache_dir, section.cache) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(ModuleCache::default_path()),
            (None, false) => None,
        };

        InterpreterConfig {
            protocol: section.protocol,
            log_level: section.log_level,
            init_export: section.init_export.clone(),
            current_peer_id: section.current_peer_id.clone(),
            max_memory_bytes: self.limits.max_memory_bytes,
            wasi: section.wasi,
            cache_dir,
        }
    }
}
