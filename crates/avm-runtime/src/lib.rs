//! Embedded wasmtime host for the AVM interpreter guest.
//!
//! Provides [`Interpreter`], one instantiated guest that turns
//! `(script, prev_data, data, run parameters, call results)` into an
//! [`InterpreterResult`], and [`ParticleRunner`], which keeps invoking it
//! until a particle has no pending service calls on this peer. [`Avm`] keeps
//! the state of each particle in a [`DataStore`] between calls.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use avm_interface::{CallResults, ProtocolVersion, RunParameters};
//! use avm_runtime::{HostImports, Interpreter, InterpreterConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = InterpreterConfig::new(ProtocolVersion::Packed);
//! let mut avm = Interpreter::from_file(
//!     Path::new("air_interpreter_server.wasm"),
//!     config,
//!     HostImports::new(),
//! )
//! .await?;
//!
//! let params = RunParameters::new("12D3KooWinit", "12D3KooWself").with_ttl(10_000);
//! let result = avm.invoke("(null)", &[], &[], &params, &CallResults::new())?;
//! println!("ret_code = {}, next peers = {:?}", result.ret_code, result.next_peer_pks);
//! # Ok(())
//! # }
//! ```

pub mod avm;
pub mod config;
pub mod data_store;
pub mod error;
pub mod host;
pub mod invocation;
pub mod lifecycle;
pub mod memory;
pub mod runner;
pub mod runtime_context;
pub mod storage;

#[cfg(test)]
mod test_guest;

pub use avm_interface::InterpreterResult;
pub use avm::{Avm, AvmOutcome};
pub use config::{AvmConfig, InterpreterConfig};
pub use data_store::{DataStore, FileDataStore, InMemoryDataStore};
pub use error::RuntimeError;
pub use host::{HostImports, LogSink, ServiceInvoker, TracingLogSink};
pub use lifecycle::{Interpreter, MemoryStats};
pub use runner::{ParticleOutcome, ParticleRunner};
pub use storage::ModuleCache;
