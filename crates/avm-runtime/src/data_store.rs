use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::RuntimeError;

const PARTICLE_EXT: &str = "particle";

/// Where the state of a particle lives between executions on this peer.
///
/// Keyed by `(particle_id, current_peer_id)`; reading a key that was never
/// stored yields empty data.
pub trait DataStore: Send {
    fn initialize(&mut self) -> Result<(), RuntimeError>;

    fn read_data(&self, particle_id: &str, current_peer_id: &str) -> Result<Vec<u8>, RuntimeError>;

    fn store_data(
        &mut self,
        data: &[u8],
        particle_id: &str,
        current_peer_id: &str,
    ) -> Result<(), RuntimeError>;

    /// Drop the state of a particle that will not run here again.
    fn cleanup_data(&mut self, particle_id: &str, current_peer_id: &str) -> Result<(), RuntimeError>;
}

/// One file per particle.
///
/// Layout under `base_dir`:
/// ```text
/// {base_dir}/
///   {sha256 of particle id and peer id}.particle   - last stored data
/// ```
pub struct FileDataStore {
    base_dir: PathBuf,
}

impl FileDataStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".avm")
            .join("particles")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn data_path(&self, particle_id: &str, current_peer_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{PARTICLE_EXT}", particle_key(particle_id, current_peer_id)))
    }
}

impl DataStore for FileDataStore {
    fn initialize(&mut self) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            RuntimeError::StorageError(format!("Cannot create {}: {e}", self.base_dir.display()))
        })
    }

    fn read_data(&self, particle_id: &str, current_peer_id: &str) -> Result<Vec<u8>, RuntimeError> {
        let path = self.data_path(particle_id, current_peer_id);
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RuntimeError::StorageError(format!(
                "Cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn store_data(
        &mut self,
        data: &[u8],
        particle_id: &str,
        current_peer_id: &str,
    ) -> Result<(), RuntimeError> {
        let path = self.data_path(particle_id, current_peer_id);
        std::fs::write(&path, data)
            .map_err(|e| RuntimeError::StorageError(format!("Cannot write {}: {e}", path.display())))?;
        tracing::debug!(particle_id, size = data.len(), "Stored particle data");
        Ok(())
    }

    fn cleanup_data(&mut self, particle_id: &str, current_peer_id: &str) -> Result<(), RuntimeError> {
        let path = self.data_path(particle_id, current_peer_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::StorageError(format!(
                "Cannot remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Keeps particle state for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    particles: HashMap<(String, String), Vec<u8>>,
}

impl InMemoryDataStore {
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

impl DataStore for InMemoryDataStore {
    fn initialize(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn read_data(&self, particle_id: &str, current_peer_id: &str) -> Result<Vec<u8>, RuntimeError> {
        let key = (particle_id.to_string(), current_peer_id.to_string());
        Ok(self.particles.get(&key).cloned().unwrap_or_default())
    }

    fn store_data(
        &mut self,
        data: &[u8],
        particle_id: &str,
        current_peer_id: &str,
    ) -> Result<(), RuntimeError> {
        self.particles.insert(
            (particle_id.to_string(), current_peer_id.to_string()),
            data.to_vec(),
        );
        Ok(())
    }

    fn cleanup_data(&mut self, particle_id: &str, current_peer_id: &str) -> Result<(), RuntimeError> {
        self.particles
            .remove(&(particle_id.to_string(), current_peer_id.to_string()));
        Ok(())
    }
}

/// SHA-256 hex over both ids, each length-prefixed so that no two pairs
/// share a key.
fn particle_key(particle_id: &str, current_peer_id: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [particle_id, current_peer_id] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
