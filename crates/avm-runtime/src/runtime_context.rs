use anyhow::Result;
use avm_interface::ProtocolVersion;
use wasmtime::{Config, Engine, Linker};

use crate::host::{self, HostState};

/// Shared Wasmtime engine.
///
/// Constructed once and shared by every interpreter built from it. Linkers
/// differ per protocol generation, so they are produced on demand by
/// [`RuntimeContext::linker`].
#[derive(Clone)]
pub struct RuntimeContext {
    pub engine: Engine,
}

impl RuntimeContext {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        // invoke runs to completion on the caller's stack
        config.async_support(false);

        let engine = Engine::new(&config)?;

        tracing::debug!("RuntimeContext initialized (core modules, sync)");

        Ok(Self { engine })
    }

    pub fn linker(&self, protocol: ProtocolVersion, wasi: bool) -> Result<Linker<HostState>> {
        let mut linker: Linker<HostState> = Linker::new(&self.engine);

        host::add_to_linker(&mut linker, protocol)?;

        if wasi {
            wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut HostState| {
                &mut state.wasi
            })?;
        }

        tracing::debug!(%protocol, wasi, "linker prepared");
        Ok(linker)
    }
}
