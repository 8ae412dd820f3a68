//! Hand-written guests speaking the wasm-bindgen allocator ABI.
//!
//! Memory layout shared by every fixture:
//! - `RET_RECORD`: the return-slot address `invoke` was called with
//! - `RECORD_BASE`: one `(ptr, len)` pair per `invoke` argument
//! - `SERVICE_SLOT` / `PEER_SLOT`: results of the callback imports
//! - `WASI_OUT`: results of the WASI call in [`wasi_guest`]
//! - `OUTCOME_AT`: the canned outcomes `invoke` replies with
//! - `MESSAGE_AT`, `STATIC_AT`: static strings handed to host imports
//! - `HEAP_BASE` and up: bump allocator, never reuses memory

use std::sync::{Arc, Mutex};

use avm_interface::{LogLevel, ProtocolVersion};
use wasmtime::{Engine, Instance, Linker, Module, Store, StoreLimitsBuilder};

use crate::host::{HostImports, HostState, LogSink};
use crate::lifecycle::Interpreter;
use crate::memory::GuestMemory;

pub const INITIAL_PAGES: usize = 2;
pub const RET_RECORD: u32 = 240;
pub const RECORD_BASE: u32 = 256;
pub const SERVICE_SLOT: u32 = 512;
pub const PEER_SLOT: u32 = 520;
pub const WASI_OUT: u32 = 600;
pub const STACK_TOP: u32 = 2048;
pub const OUTCOME_AT: u32 = 4096;
pub const MESSAGE_AT: u32 = 16384;
pub const STATIC_AT: u32 = 32768;

const ALLOCATOR: &str = r#"
  (global $heap (mut i32) (i32.const 65536))
  (global $freed_count (export "freed_count") (mut i32) (i32.const 0))
  (global $freed_bytes (export "freed_bytes") (mut i32) (i32.const 0))
  (global $realloc_count (export "realloc_count") (mut i32) (i32.const 0))
  (global $invocations (export "invocations") (mut i32) (i32.const 0))
  (global $initialized (export "initialized") (mut i32) (i32.const 0))
  (func $malloc (export "__wbindgen_malloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local $limit i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap
      (i32.and
        (i32.add (i32.add (local.get $ptr) (local.get $len)) (i32.const 7))
        (i32.const -8)))
    (local.set $limit (i32.mul (memory.size) (i32.const 65536)))
    (if (i32.gt_u (global.get $heap) (local.get $limit))
      (then
        (if (i32.eq
              (memory.grow
                (i32.add
                  (i32.shr_u (i32.sub (global.get $heap) (local.get $limit)) (i32.const 16))
                  (i32.const 1)))
              (i32.const -1))
          (then unreachable))))
    (local.get $ptr))
  (func $free (export "__wbindgen_free") (param $ptr i32) (param $len i32)
    (global.set $freed_count (i32.add (global.get $freed_count) (i32.const 1)))
    (global.set $freed_bytes (i32.add (global.get $freed_bytes) (local.get $len))))
"#;

const REALLOC: &str = r#"
  (func (export "__wbindgen_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
    (local $dst i32)
    (global.set $realloc_count (i32.add (global.get $realloc_count) (i32.const 1)))
    (local.set $dst (call $malloc (local.get $new)))
    (memory.copy (local.get $dst) (local.get $ptr) (local.get $old))
    (local.get $dst))
"#;

const BROKEN_REALLOC: &str = r#"
  (func (export "__wbindgen_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
    (i32.const -1))
"#;

const MAIN: &str = r#"
  (func (export "main")
    (global.set $initialized (i32.const 1)))
"#;

const STACK_POINTER: &str = r#"
  (global $sp (export "stack_pointer") (mut i32) (i32.const 2048))
  (func (export "__wbindgen_add_to_stack_pointer") (param $delta i32) (result i32)
    (global.set $sp (i32.add (global.get $sp) (local.get $delta)))
    (global.get $sp))
"#;

const LOG_IMPORT: &str = r#"
  (import "host" "log_utf8_string" (func $log (param i32 i32 i32 i32)))
"#;

const CALLBACK_IMPORTS: &str = r#"
  (import "./aquamarine_client_bg.js" "__wbg_callserviceimpl_84d8278762e4c639"
    (func $call_service (param i32 i32 i32 i32 i32 i32 i32 i32 i32)))
  (import "./aquamarine_client_bg.js" "__wbg_getcurrentpeeridimpl_4aca996e28cb8f44"
    (func $current_peer_id (param i32)))
  (import "./aquamarine_client_bg.js" "__wbindgen_throw" (func $throw (param i32 i32)))
"#;

fn module(imports: &str, parts: &[&str]) -> String {
    format!(
        "(module\n{imports}\n  (memory (export \"memory\") {INITIAL_PAGES})\n{}\n)",
        parts.concat()
    )
}

/// Escape arbitrary bytes for a WAT string literal.
pub fn wat_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{b:02x}")).collect()
}

/// Static data laid out back to back from `base`; returns the segments and
/// the `(ptr, len)` of each entry.
fn data_segments<T: AsRef<[u8]>>(base: u32, entries: &[T]) -> (String, Vec<(u32, u32)>) {
    let mut wat = String::new();
    let mut slices = Vec::new();
    let mut at = base;
    for entry in entries {
        let entry = entry.as_ref();
        wat.push_str(&format!(
            "  (data (i32.const {at}) \"{}\")\n",
            wat_bytes(entry)
        ));
        slices.push((at, entry.len() as u32));
        at += (entry.len() as u32 + 8) & !7;
    }
    (wat, slices)
}

/// `invoke` for `protocol`: records its arguments, runs `extra`, then replies
/// with the outcome for this call copied into a fresh allocation. The n-th
/// call gets `outcomes[n - 1]`; calls past the end repeat the last one.
fn invoke_func<T: AsRef<[u8]>>(protocol: ProtocolVersion, outcomes: &[T], extra: &str) -> String {
    let arity = protocol.invoke_arity();
    let params: String = (0..arity)
        .map(|i| format!(" (param $p{i} i32) (param $l{i} i32)"))
        .collect();
    let records: String = (0..arity)
        .map(|i| {
            let at = RECORD_BASE as usize + 8 * i;
            format!(
                "    (i32.store (i32.const {at}) (local.get $p{i}))\n    (i32.store (i32.const {}) (local.get $l{i}))\n",
                at + 4
            )
        })
        .collect();

    let (data, slices) = data_segments(OUTCOME_AT, outcomes);
    let (last_ptr, last_len) = slices.last().copied().unwrap_or((OUTCOME_AT, 0));
    let picks: String = slices
        .iter()
        .enumerate()
        .take(slices.len().saturating_sub(1))
        .map(|(i, (ptr, len))| {
            format!(
                "    (if (i32.eq (global.get $invocations) (i32.const {}))\n      (then (local.set $src (i32.const {ptr})) (local.set $len (i32.const {len}))))\n",
                i + 1
            )
        })
        .collect();

    format!(
        r#"
{data}
  (func $reply (param $ret i32)
    (local $out i32)
    (local $src i32)
    (local $len i32)
    (local.set $src (i32.const {last_ptr}))
    (local.set $len (i32.const {last_len}))
{picks}
    (local.set $out (call $malloc (local.get $len)))
    (memory.copy (local.get $out) (local.get $src) (local.get $len))
    (i32.store (local.get $ret) (local.get $out))
    (i32.store offset=4 (local.get $ret) (local.get $len)))
  (func (export "invoke") (param $ret i32){params}
    (global.set $invocations (i32.add (global.get $invocations) (i32.const 1)))
    (i32.store (i32.const {RET_RECORD}) (local.get $ret))
{records}{extra}
    (call $reply (local.get $ret)))
"#
    )
}

fn protocol_imports(protocol: ProtocolVersion) -> String {
    if protocol.has_service_imports() {
        format!("{LOG_IMPORT}{CALLBACK_IMPORTS}")
    } else {
        LOG_IMPORT.to_string()
    }
}

pub fn allocator_guest() -> String {
    module("", &[ALLOCATOR, REALLOC])
}

pub fn allocator_no_realloc_guest() -> String {
    module("", &[ALLOCATOR])
}

/// Reallocator answers every request with the last addressable byte.
pub fn broken_realloc_guest() -> String {
    module("", &[ALLOCATOR, BROKEN_REALLOC])
}

/// Initializes on `main` and answers every `invoke` with `outcome`.
pub fn invoke_guest(protocol: ProtocolVersion, outcome: &str) -> String {
    let invoke = invoke_func(protocol, &[outcome], "");
    module(&protocol_imports(protocol), &[ALLOCATOR, REALLOC, MAIN, &invoke])
}

/// Answers the n-th `invoke` with `outcomes[n - 1]`, then keeps repeating the
/// last outcome.
pub fn sequence_guest(protocol: ProtocolVersion, outcomes: &[&str]) -> String {
    let invoke = invoke_func(protocol, outcomes, "");
    module(&protocol_imports(protocol), &[ALLOCATOR, REALLOC, MAIN, &invoke])
}

/// Like [`invoke_guest`], with an outcome that need not be valid UTF-8.
pub fn raw_outcome_guest(protocol: ProtocolVersion, outcome: &[u8]) -> String {
    let invoke = invoke_func(protocol, &[outcome], "");
    module(&protocol_imports(protocol), &[ALLOCATOR, REALLOC, MAIN, &invoke])
}

pub fn invoke_guest_without_main(protocol: ProtocolVersion, outcome: &str) -> String {
    let invoke = invoke_func(protocol, &[outcome], "");
    module(&protocol_imports(protocol), &[ALLOCATOR, REALLOC, &invoke])
}

/// Like [`invoke_guest`], with the return slot taken from a shadow stack.
pub fn stack_pointer_guest(protocol: ProtocolVersion, outcome: &str) -> String {
    let invoke = invoke_func(protocol, &[outcome], "");
    module(
        &protocol_imports(protocol),
        &[ALLOCATOR, REALLOC, STACK_POINTER, MAIN, &invoke],
    )
}

/// Without a reallocator: every host string write is a single allocation.
pub fn invoke_guest_without_realloc(protocol: ProtocolVersion, outcome: &str) -> String {
    let invoke = invoke_func(protocol, &[outcome], "");
    module(&protocol_imports(protocol), &[ALLOCATOR, MAIN, &invoke])
}

/// Logs `message` at level 1, "trace line" at level 5 and "dropped" at the
/// unknown level 7 from `main`.
pub fn logging_guest(message: &str) -> String {
    let (data, slices) = data_segments(MESSAGE_AT, &[message, "trace line", "dropped"]);
    let call = |level: u32, (ptr, len): (u32, u32)| {
        format!("    (call $log (i32.const {level}) (i32.const 0) (i32.const {ptr}) (i32.const {len}))\n")
    };
    let main = format!(
        "  (func (export \"main\")\n{}{}{}    (global.set $initialized (i32.const 1)))\n",
        call(1, slices[0]),
        call(5, slices[1]),
        call(7, slices[2]),
    );
    let invoke = invoke_func(ProtocolVersion::Packed, &["{}"], "");
    module(LOG_IMPORT, &[ALLOCATOR, REALLOC, &data, &main, &invoke])
}

/// Callback-protocol guest whose `invoke` first calls the service bridge
/// (result pair at `SERVICE_SLOT`) and the peer-id import (at `PEER_SLOT`).
pub fn service_guest(
    service_id: &str,
    function_name: &str,
    arguments: &str,
    tetraplets: &str,
    outcome: &str,
) -> String {
    service_guest_with_slot(SERVICE_SLOT, service_id, function_name, arguments, tetraplets, outcome)
}

/// Like [`service_guest`], with the bridge result written to `slot`.
pub fn service_guest_with_slot(
    slot: u32,
    service_id: &str,
    function_name: &str,
    arguments: &str,
    tetraplets: &str,
    outcome: &str,
) -> String {
    let (data, slices) =
        data_segments(STATIC_AT, &[service_id, function_name, arguments, tetraplets]);
    let args: String = slices
        .iter()
        .map(|(ptr, len)| format!(" (i32.const {ptr}) (i32.const {len})"))
        .collect();
    let extra = format!(
        "    (call $call_service (i32.const {slot}){args})\n    (call $current_peer_id (i32.const {PEER_SLOT}))\n"
    );
    let invoke = invoke_func(ProtocolVersion::Callback, &[outcome], &extra);
    module(
        &protocol_imports(ProtocolVersion::Callback),
        &[ALLOCATOR, REALLOC, MAIN, &data, &invoke],
    )
}

/// Logs from `main` with a length far past the end of memory, then logs
/// "still alive" normally.
pub fn oversized_log_guest() -> String {
    let (data, slices) = data_segments(MESSAGE_AT, &["still alive"]);
    let (ptr, len) = slices[0];
    let main = format!(
        "  (func (export \"main\")\n    (call $log (i32.const 1) (i32.const 0) (i32.const {MESSAGE_AT}) (i32.const -1))\n    (call $log (i32.const 1) (i32.const 0) (i32.const {ptr}) (i32.const {len}))\n    (global.set $initialized (i32.const 1)))\n"
    );
    let invoke = invoke_func(ProtocolVersion::Packed, &["{}"], "");
    module(LOG_IMPORT, &[ALLOCATOR, REALLOC, &data, &main, &invoke])
}

/// Imports one WASI preview 1 function and calls it from `main`; `initialized`
/// is set to 1 only when the call succeeds. The counts land at `WASI_OUT`.
pub fn wasi_guest() -> String {
    let imports = format!(
        "{LOG_IMPORT}  (import \"wasi_snapshot_preview1\" \"environ_sizes_get\" (func $environ_sizes_get (param i32 i32) (result i32)))\n"
    );
    let main = format!(
        "  (func (export \"main\")\n    (global.set $initialized (i32.eqz (call $environ_sizes_get (i32.const {WASI_OUT}) (i32.const {}))))\n    )\n",
        WASI_OUT + 4
    );
    let invoke = invoke_func(ProtocolVersion::Packed, &["{}"], "");
    module(&imports, &[ALLOCATOR, REALLOC, &main, &invoke])
}

/// Callback-protocol guest whose `invoke` throws `message`.
pub fn throwing_guest(message: &str) -> String {
    let (data, slices) = data_segments(STATIC_AT, &[message]);
    let (ptr, len) = slices[0];
    let extra = format!("    (call $throw (i32.const {ptr}) (i32.const {len}))\n");
    let invoke = invoke_func(ProtocolVersion::Callback, &["{}"], &extra);
    module(
        &protocol_imports(ProtocolVersion::Callback),
        &[ALLOCATOR, REALLOC, MAIN, &data, &invoke],
    )
}

/// A `len`-byte message mixing ASCII and multi-byte characters.
pub fn long_message(len: usize) -> String {
    let mut message = String::with_capacity(len);
    let chunk = "guest log ünïcødé ✓ ";
    while message.len() + chunk.len() <= len {
        message.push_str(chunk);
    }
    while message.len() < len {
        message.push('.');
    }
    message
}

/// Collects what the guest logs.
#[derive(Clone, Default)]
pub struct TestLog(Arc<Mutex<Vec<(LogLevel, String)>>>);

impl TestLog {
    pub fn sink(&self) -> impl LogSink + 'static {
        let lines = Arc::clone(&self.0);
        move |level: LogLevel, message: &str| {
            lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.0.lock().unwrap().clone()
    }
}

fn read_global(store: &mut Store<HostState>, instance: &Instance, name: &str) -> i32 {
    instance
        .get_global(&mut *store, name)
        .unwrap_or_else(|| panic!("guest has no global {name}"))
        .get(&mut *store)
        .i32()
        .unwrap()
}

pub fn global(interpreter: &mut Interpreter, name: &str) -> i32 {
    read_global(&mut interpreter.store, &interpreter.instance, name)
}

/// Read an `(ptr, len)` record the guest left at `addr` and the bytes it
/// points to.
pub fn recorded(interpreter: &Interpreter, addr: u32) -> Vec<u8> {
    let slice = interpreter.guest.read_slot(&interpreter.store, addr).unwrap();
    interpreter.guest.read_bytes(&interpreter.store, slice).unwrap()
}

/// The `i`-th `invoke` argument as the guest received it.
pub fn recorded_argument(interpreter: &Interpreter, i: usize) -> Vec<u8> {
    recorded(interpreter, RECORD_BASE + 8 * i as u32)
}

pub fn recorded_ret(interpreter: &Interpreter) -> u32 {
    let mut raw = [0u8; 4];
    interpreter
        .guest
        .memory()
        .read(&interpreter.store, RET_RECORD as usize, &mut raw)
        .unwrap();
    u32::from_le_bytes(raw)
}

/// Bare store over a guest, for exercising [`GuestMemory`] directly.
pub struct TestStore {
    pub store: Store<HostState>,
    instance: Instance,
    guest: GuestMemory,
}

impl TestStore {
    pub fn new(wat: &str) -> Self {
        let engine = Engine::default();
        let module = Module::new(&engine, wat).unwrap();
        let state = HostState::new(
            HostImports::new(),
            LogLevel::Off,
            String::new(),
            StoreLimitsBuilder::new().build(),
        );
        let mut store = Store::new(&engine, state);
        let instance = Linker::new(&engine).instantiate(&mut store, &module).unwrap();
        let guest = GuestMemory::from_instance(&mut store, &instance).unwrap();
        Self {
            store,
            instance,
            guest,
        }
    }

    pub fn guest(&self) -> GuestMemory {
        self.guest.clone()
    }

    pub fn global(&mut self, name: &str) -> i32 {
        read_global(&mut self.store, &self.instance, name)
    }
}

#[test]
fn fixtures_compile() {
    let engine = Engine::default();
    for wat in [
        allocator_guest(),
        allocator_no_realloc_guest(),
        invoke_guest(ProtocolVersion::Packed, "{}"),
        invoke_guest(ProtocolVersion::Split, "{}"),
        invoke_guest(ProtocolVersion::Callback, "{}"),
        stack_pointer_guest(ProtocolVersion::Packed, "{}"),
        logging_guest(&long_message(64)),
        service_guest("s", "f", "[]", "[]", "{}"),
        throwing_guest("boom"),
        broken_realloc_guest(),
        raw_outcome_guest(ProtocolVersion::Packed, &[0xff, 0xfe]),
        service_guest_with_slot(u32::MAX - 3, "s", "f", "[]", "[]", "{}"),
        oversized_log_guest(),
        wasi_guest(),
        sequence_guest(ProtocolVersion::Split, &["{\"a\":1}", "{}", "[]"]),
    ] {
        Module::new(&engine, &wat).unwrap_or_else(|e| panic!("{e}\n{wat}"));
    }
    assert_eq!(long_message(4096).len(), 4096);
}
