use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};
use wasmtime::{Engine, Module};

use crate::error::RuntimeError;

const PRECOMPILED_EXT: &str = "cwasm";

/// Disk-backed cache of precompiled interpreter modules.
///
/// Layout under `base_dir`:
/// ```text
/// {base_dir}/
///   {sha256 of module bytes}.cwasm   - Wasmtime serialized module
/// ```
pub struct ModuleCache {
    base_dir: PathBuf,
}

impl ModuleCache {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".avm")
            .join("modules")
    }

    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn cwasm_path(&self, hash: &str) -> PathBuf {
        self.base_dir.join(format!("{hash}.{PRECOMPILED_EXT}"))
    }

    /// Load the precompiled artifact for `wasm_bytes`, compiling and caching
    /// it when missing or unusable.
    pub fn load_or_compile(&self, engine: &Engine, wasm_bytes: &[u8]) -> Result<Module, RuntimeError> {
        let hash = hash_module(wasm_bytes);
        let cwasm_path = self.cwasm_path(&hash);

        if cwasm_path.exists() {
            match self.load_precompiled(&cwasm_path, engine) {
                Ok(cached) => {
                    tracing::debug!(hash, "Loaded from precompiled cache");
                    return Ok(cached);
                }
                Err(e) => tracing::debug!(hash, "Precompiled cache invalid, recompiling: {e}"),
            }
        }

        let module = Module::new(engine, wasm_bytes)
            .map_err(|e| RuntimeError::CompilationFailed(e.to_string()))?;

        match module.serialize() {
            Ok(serialized) => match std::fs::write(&cwasm_path, serialized) {
                Ok(()) => tracing::debug!(hash, "Saved precompiled cache"),
                Err(e) => tracing::warn!(hash, path = %cwasm_path.display(), "Cannot write precompiled cache: {e}"),
            },
            Err(e) => tracing::warn!(hash, "Cannot serialize module: {e}"),
        }

        Ok(module)
    }

    fn load_precompiled(&self, path: &Path, engine: &Engine) -> Result<Module> {
        // SAFETY: cwasm files in this directory are written by `load_or_compile`
        // from `Module::serialize`; Wasmtime rejects artifacts produced by a
        // different version or configuration before using them.
        unsafe { Module::deserialize_file(engine, path) }
    }
}

/// SHA-256 hex of module bytes, the cache key.
pub fn hash_module(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
