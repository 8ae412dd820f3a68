use serde::{Deserialize, Serialize};

/// Default for every size limit: 4 GiB, i.e. effectively unlimited.
pub const DEFAULT_SIZE_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

/// Parameters the host passes to the interpreter for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Peer id of the peer that started this particle.
    pub init_peer_id: String,
    /// Peer id of the peer executing it now.
    pub current_peer_id: String,
    /// Particle creation time, Unix milliseconds.
    pub timestamp: u64,
    /// TTL set by the init peer, milliseconds.
    pub ttl: u32,
    /// Unique particle id.
    pub particle_id: String,
    /// Key format tag of `secret_key_bytes` (0 = Ed25519).
    pub key_format: u8,
    /// Secret key material of the current peer.
    pub secret_key_bytes: Vec<u8>,
    #[serde(default)]
    pub limits: RuntimeLimits,
}

impl RunParameters {
    pub fn new(init_peer_id: impl Into<String>, current_peer_id: impl Into<String>) -> Self {
        Self {
            init_peer_id: init_peer_id.into(),
            current_peer_id: current_peer_id.into(),
            timestamp: 0,
            ttl: 0,
            particle_id: String::new(),
            key_format: 0,
            secret_key_bytes: Vec::new(),
            limits: RuntimeLimits::default(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_particle_id(mut self, particle_id: impl Into<String>) -> Self {
        self.particle_id = particle_id.into();
        self
    }

    pub fn with_key(mut self, key_format: u8, secret_key_bytes: Vec<u8>) -> Self {
        self.key_format = key_format;
        self.secret_key_bytes = secret_key_bytes;
        self
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Resource allowances the interpreter enforces on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    pub air_size_limit: u64,
    pub particle_size_limit: u64,
    pub call_result_size_limit: u64,
    pub hard_limit_enabled: bool,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            air_size_limit: DEFAULT_SIZE_LIMIT,
            particle_size_limit: DEFAULT_SIZE_LIMIT,
            call_result_size_limit: DEFAULT_SIZE_LIMIT,
            hard_limit_enabled: false,
        }
    }
}
