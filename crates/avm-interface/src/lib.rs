//! Data model and wire contracts between the AVM host and the interpreter guest.
//!
//! The guest speaks one of several fixed protocol generations
//! ([`ProtocolVersion`]). This crate owns the host-side types
//! ([`RunParameters`], [`CallResults`], [`InterpreterResult`], …) and the
//! pure encode/decode step for each generation; moving bytes in and out of
//! guest memory is `avm-runtime`'s job.

pub mod call;
pub mod error;
pub mod log_level;
pub mod outcome;
pub mod protocol;
pub mod run_parameters;

pub use call::{
    CallRequest, CallRequests, CallResults, CallServiceResult, ResolvedTriplet,
    SecurityTetraplet,
};
pub use error::InterfaceError;
pub use log_level::LogLevel;
pub use outcome::InterpreterResult;
pub use protocol::ProtocolVersion;
pub use run_parameters::{RunParameters, RuntimeLimits};
