//! Host imports the guest may call back into, and the per-store state they
//! share.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use avm_interface::{CallRequest, CallServiceResult, LogLevel, ProtocolVersion, SecurityTetraplet};
use serde_json::Value;
use wasmtime::{Caller, Linker, StoreLimits};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::error::RuntimeError;
use crate::memory::{GuestMemory, GuestSlice};

pub const HOST_MODULE: &str = "host";
pub const LOG_IMPORT: &str = "log_utf8_string";

pub const BINDGEN_MODULE: &str = "./aquamarine_client_bg.js";
pub const CALL_SERVICE_IMPORT: &str = "__wbg_callserviceimpl_84d8278762e4c639";
pub const CURRENT_PEER_ID_IMPORT: &str = "__wbg_getcurrentpeeridimpl_4aca996e28cb8f44";
pub const THROW_IMPORT: &str = "__wbindgen_throw";

/// Return code handed to the guest when its call arguments are malformed.
pub const ARGUMENTS_ERROR_CODE: i32 = 1;

/// Receives log lines the guest emits.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

/// Forwards guest log lines into `tracing` under the `avm::guest` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "avm::guest", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "avm::guest", "{message}"),
            LogLevel::Info => tracing::info!(target: "avm::guest", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "avm::guest", "{message}"),
            LogLevel::Trace => tracing::trace!(target: "avm::guest", "{message}"),
            LogLevel::Off => {}
        }
    }
}

/// Executes the service calls an interpreter asks for.
///
/// Called synchronously from inside the guest by the callback protocol, and
/// between rounds by [`crate::ParticleRunner`]. An `Err` is a host failure:
/// inside the guest it becomes a trap.
pub trait ServiceInvoker: Send + Sync {
    fn call(&self, request: CallRequest) -> anyhow::Result<CallServiceResult>;
}

impl<F> ServiceInvoker for F
where
    F: Fn(CallRequest) -> anyhow::Result<CallServiceResult> + Send + Sync,
{
    fn call(&self, request: CallRequest) -> anyhow::Result<CallServiceResult> {
        self(request)
    }
}

/// Strategies injected into one interpreter instance.
#[derive(Clone)]
pub struct HostImports {
    pub log_sink: Arc<dyn LogSink>,
    pub services: Option<Arc<dyn ServiceInvoker>>,
}

impl HostImports {
    pub fn new() -> Self {
        Self {
            log_sink: Arc::new(TracingLogSink),
            services: None,
        }
    }

    pub fn with_log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log_sink = Arc::new(sink);
        self
    }

    pub fn with_services(mut self, services: impl ServiceInvoker + 'static) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    pub fn with_shared_services(mut self, services: Arc<dyn ServiceInvoker>) -> Self {
        self.services = Some(services);
        self
    }
}

impl Default for HostImports {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-store state seen by every host import.
///
/// `guest` is filled right after instantiation; imports that fire earlier
/// (from a start function) find it empty.
pub struct HostState {
    imports: HostImports,
    log_level: LogLevel,
    peer_id: String,
    guest: Option<GuestMemory>,
    pub(crate) limits: StoreLimits,
    pub(crate) wasi: WasiP1Ctx,
}

impl HostState {
    pub(crate) fn new(
        imports: HostImports,
        log_level: LogLevel,
        peer_id: String,
        limits: StoreLimits,
    ) -> Self {
        // deny-default: no preopens, no environment, no inherited stdio
        let wasi = WasiCtxBuilder::new().build_p1();
        Self {
            imports,
            log_level,
            peer_id,
            guest: None,
            limits,
            wasi,
        }
    }

    pub(crate) fn attach(&mut self, guest: GuestMemory) {
        self.guest = Some(guest);
    }

    pub(crate) fn guest(&self) -> Result<GuestMemory, RuntimeError> {
        self.guest.clone().ok_or(RuntimeError::Detached)
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        if self.log_level.allows(level) {
            self.imports.log_sink.log(level, message);
        }
    }
}

/// Register the imports `protocol` expects on `linker`.
pub(crate) fn add_to_linker(
    linker: &mut Linker<HostState>,
    protocol: ProtocolVersion,
) -> anyhow::Result<()> {
    linker.func_wrap(HOST_MODULE, LOG_IMPORT, log_utf8_string)?;

    if protocol.has_service_imports() {
        linker.func_wrap(BINDGEN_MODULE, CALL_SERVICE_IMPORT, call_service)?;
        linker.func_wrap(BINDGEN_MODULE, CURRENT_PEER_ID_IMPORT, current_peer_id)?;
        linker.func_wrap(BINDGEN_MODULE, THROW_IMPORT, throw)?;
    }

    Ok(())
}

// Never traps: unknown levels and unreadable messages are dropped.
fn log_utf8_string(caller: Caller<'_, HostState>, level: i32, _target: i32, offset: i32, size: i32) {
    let Some(level) = LogLevel::from_guest(level) else {
        return;
    };
    let state = caller.data();
    if !state.log_level.allows(level) {
        return;
    }
    let Ok(guest) = state.guest() else {
        return;
    };

    match guest.read_str(&caller, GuestSlice::from_raw(offset, size)) {
        Ok(message) => caller.data().log(level, &message),
        Err(e) => tracing::warn!("dropping unreadable guest log line: {e}"),
    }
}

#[allow(clippy::too_many_arguments)]
fn call_service(
    mut caller: Caller<'_, HostState>,
    ret: i32,
    service_id_ptr: i32,
    service_id_len: i32,
    function_name_ptr: i32,
    function_name_len: i32,
    arguments_ptr: i32,
    arguments_len: i32,
    tetraplets_ptr: i32,
    tetraplets_len: i32,
) -> anyhow::Result<()> {
    let guest = caller.data().guest()?;
    let inputs = [
        GuestSlice::from_raw(service_id_ptr, service_id_len),
        GuestSlice::from_raw(function_name_ptr, function_name_len),
        GuestSlice::from_raw(arguments_ptr, arguments_len),
        GuestSlice::from_raw(tetraplets_ptr, tetraplets_len),
    ];

    let outcome = serve_call(&mut caller, &guest, ret as u32, inputs);

    // inputs are released on every path, before the outcome is propagated
    let mut released = Ok(());
    for slice in inputs {
        if let Err(e) = guest.free(&mut caller, slice) {
            released = released.and(Err(e));
        }
    }

    outcome?;
    released?;
    Ok(())
}

fn serve_call(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    ret: u32,
    [service_id, function_name, arguments, tetraplets]: [GuestSlice; 4],
) -> anyhow::Result<()> {
    let service_id = guest.read_str(&*caller, service_id)?;
    let function_name = guest.read_str(&*caller, function_name)?;
    let arguments = guest.read_str(&*caller, arguments)?;
    let tetraplets = guest.read_str(&*caller, tetraplets)?;

    let result = match parse_call_arguments(&arguments, &tetraplets) {
        Ok((arguments, tetraplets)) => {
            let services = caller
                .data()
                .imports
                .services
                .clone()
                .ok_or_else(|| anyhow!("no service invoker is configured"))?;
            tracing::debug!(service_id, function_name, "guest calls service");
            let request = CallRequest::new(service_id, function_name, arguments, tetraplets);
            services.call(request).context("service handler failed")?
        }
        Err(reason) => {
            let message = format!("Cannot parse arguments: {reason}");
            tracing::error!(service_id, function_name, "{message}");
            CallServiceResult::error(ARGUMENTS_ERROR_CODE, serde_json::to_string(&message)?)
        }
    };

    let encoded = serde_json::to_string(&result)?;
    write_result(caller, guest, ret, &encoded)
}

/// Hand `text` to the guest through the return slot at `ret`. The guest owns
/// the string only once the slot is written; until then it is freed here.
fn write_result(
    caller: &mut Caller<'_, HostState>,
    guest: &GuestMemory,
    ret: u32,
    text: &str,
) -> anyhow::Result<()> {
    let slice = guest.write_str(&mut *caller, text)?;
    if let Err(e) = guest.write_slot(&mut *caller, ret, slice) {
        if let Err(free_error) = guest.free(&mut *caller, slice) {
            tracing::warn!("cannot release undelivered result: {free_error}");
        }
        return Err(e.into());
    }
    Ok(())
}

fn parse_call_arguments(
    arguments: &str,
    tetraplets: &str,
) -> Result<(Vec<Value>, Vec<Vec<SecurityTetraplet>>), String> {
    let arguments = match serde_json::from_str::<Value>(arguments).map_err(|e| e.to_string())? {
        Value::Array(arguments) => arguments,
        _ => return Err("args is not an array".into()),
    };
    let tetraplets: Vec<Vec<SecurityTetraplet>> =
        serde_json::from_str(tetraplets).map_err(|e| e.to_string())?;
    Ok((arguments, tetraplets))
}

fn current_peer_id(mut caller: Caller<'_, HostState>, ret: i32) -> anyhow::Result<()> {
    let guest = caller.data().guest()?;
    let peer_id = caller.data().peer_id.clone();
    write_result(&mut caller, &guest, ret as u32, &peer_id)
}

fn throw(caller: Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<()> {
    let message = caller
        .data()
        .guest()
        .and_then(|guest| guest.read_str(&caller, GuestSlice::from_raw(ptr, len)))
        .unwrap_or_else(|e| format!("<unreadable message: {e}>"));
    Err(anyhow!("guest threw: {message}"))
}
