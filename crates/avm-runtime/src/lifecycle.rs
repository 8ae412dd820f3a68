use std::path::{Path, PathBuf};

use avm_interface::{LogLevel, ProtocolVersion};
use serde::Serialize;
use wasmtime::{Engine, Func, Instance, Module, Store, StoreLimitsBuilder, TypedFunc};

use crate::config::InterpreterConfig;
use crate::error::RuntimeError;
use crate::host::{HostImports, HostState};
use crate::memory::GuestMemory;
use crate::runtime_context::RuntimeContext;
use crate::storage::ModuleCache;

pub const INVOKE_EXPORT: &str = "invoke";
pub const STACK_POINTER_EXPORT: &str = "__wbindgen_add_to_stack_pointer";

/// Linear-memory usage of one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Current size of linear memory in bytes.
    pub memory_size: usize,
    /// Configured cap, if any.
    pub max_memory_size: Option<usize>,
}

/// An instantiated and initialized interpreter guest.
///
/// # Threading
///
/// One instance serves one caller at a time: `invoke` takes `&mut self`, and
/// guest memory plus its allocator are not shared between instances. Build
/// one `Interpreter` per concurrent caller.
pub struct Interpreter {
    pub(crate) store: Store<HostState>,
    pub(crate) instance: Instance,
    pub(crate) guest: GuestMemory,
    pub(crate) invoke: Func,
    pub(crate) stack_pointer: Option<TypedFunc<i32, i32>>,
    pub(crate) protocol: ProtocolVersion,
    pub(crate) log_level: LogLevel,
    max_memory_bytes: Option<usize>,
}

impl Interpreter {
    /// Compile `wasm_bytes` and build an interpreter from them.
    ///
    /// Compilation runs on the blocking pool and goes through the module
    /// cache when `config.cache_dir` is set.
    pub async fn create(
        wasm_bytes: Vec<u8>,
        config: InterpreterConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let runtime = RuntimeContext::new()?;
        let module = compile(runtime.engine.clone(), wasm_bytes, config.cache_dir.clone()).await?;
        Self::with_module(&runtime, &module, config, imports)
    }

    /// Read a module from disk, then [`Interpreter::create`].
    pub async fn from_file(
        path: &Path,
        config: InterpreterConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let wasm_bytes = tokio::fs::read(path).await.map_err(|e| {
            RuntimeError::StorageError(format!("Cannot read {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), size = wasm_bytes.len(), "Loading interpreter module");
        Self::create(wasm_bytes, config, imports).await
    }

    /// Build an interpreter from an already compiled module.
    pub fn with_module(
        runtime: &RuntimeContext,
        module: &Module,
        config: InterpreterConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        validate(&config, &imports)?;
        let protocol = config.protocol;

        let linker = runtime.linker(protocol, config.wasi)?;

        let mut limits = StoreLimitsBuilder::new();
        if let Some(max) = config.max_memory_bytes {
            limits = limits.memory_size(max);
        }
        let state = HostState::new(
            imports,
            config.log_level,
            config.current_peer_id.clone().unwrap_or_default(),
            limits.build(),
        );
        let mut store = Store::new(&runtime.engine, state);
        store.limiter(|state| &mut state.limits);

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{protocol} guest: {e}")))?;

        let guest = GuestMemory::from_instance(&mut store, &instance)?;
        store.data_mut().attach(guest.clone());

        let invoke = invoke_export(&mut store, &instance, protocol)?;
        let stack_pointer = instance
            .get_func(&mut store, STACK_POINTER_EXPORT)
            .map(|func| func.typed(&store))
            .transpose()
            .map_err(|e| RuntimeError::MissingExport(format!("{STACK_POINTER_EXPORT}: {e}")))?;

        initialize(&mut store, &instance, &config.init_export)?;

        tracing::info!(
            %protocol,
            memory_size = guest.size(&store),
            realloc = guest.has_realloc(),
            stack_pointer = stack_pointer.is_some(),
            "Interpreter ready"
        );

        Ok(Self {
            store,
            instance,
            guest,
            invoke,
            stack_pointer,
            protocol,
            log_level: config.log_level,
            max_memory_bytes: config.max_memory_bytes,
        })
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            memory_size: self.guest.size(&self.store),
            max_memory_size: self.max_memory_bytes,
        }
    }
}

fn validate(config: &InterpreterConfig, imports: &HostImports) -> Result<(), RuntimeError> {
    if config.init_export.is_empty() {
        return Err(RuntimeError::InvalidConfig("init export name is empty".into()));
    }
    if config.protocol.has_service_imports() {
        if imports.services.is_none() {
            return Err(RuntimeError::InvalidConfig(format!(
                "{} protocol calls services during invoke; a service invoker is required",
                config.protocol
            )));
        }
        if config.current_peer_id.is_none() {
            return Err(RuntimeError::InvalidConfig(format!(
                "{} protocol asks the host for its peer id; current_peer_id is required",
                config.protocol
            )));
        }
    }
    Ok(())
}

async fn compile(
    engine: Engine,
    wasm_bytes: Vec<u8>,
    cache_dir: Option<PathBuf>,
) -> Result<Module, RuntimeError> {
    tokio::task::spawn_blocking(move || match cache_dir {
        Some(dir) => {
            let cache = ModuleCache::new(dir);
            cache.init()?;
            cache.load_or_compile(&engine, &wasm_bytes)
        }
        None => Module::new(&engine, &wasm_bytes)
            .map_err(|e| RuntimeError::CompilationFailed(e.to_string())),
    })
    .await
    .map_err(|e| RuntimeError::CompilationFailed(format!("compile task: {e}")))?
}

fn invoke_export(
    store: &mut Store<HostState>,
    instance: &Instance,
    protocol: ProtocolVersion,
) -> Result<Func, RuntimeError> {
    let invoke = instance
        .get_func(&mut *store, INVOKE_EXPORT)
        .ok_or_else(|| RuntimeError::MissingExport(INVOKE_EXPORT.into()))?;

    let ty = invoke.ty(&*store);
    let expected = 1 + 2 * protocol.invoke_arity();
    if ty.params().len() != expected || ty.results().len() != 0 {
        return Err(RuntimeError::InstantiationFailed(format!(
            "{INVOKE_EXPORT} export has {} parameters and {} results, the {protocol} protocol expects {expected} and none",
            ty.params().len(),
            ty.results().len(),
        )));
    }
    Ok(invoke)
}

// A missing init export is reported through the guest log sink, not as an error.
fn initialize(
    store: &mut Store<HostState>,
    instance: &Instance,
    export: &str,
) -> Result<(), RuntimeError> {
    match instance.get_typed_func::<(), ()>(&mut *store, export) {
        Ok(init) => init
            .call(&mut *store, ())
            .map_err(|e| RuntimeError::InvocationFailed(format!("{export}: {e}"))),
        Err(e) => {
            tracing::warn!(export, "init export is not callable: {e}");
            store
                .data()
                .log(LogLevel::Error, &format!("can't call export {export}: {e}"));
            Ok(())
        }
    }
}
