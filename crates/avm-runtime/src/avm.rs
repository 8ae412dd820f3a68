use std::time::{Duration, Instant};

use avm_interface::{CallResults, InterpreterResult, RunParameters};
use serde::Serialize;

use crate::data_store::DataStore;
use crate::error::RuntimeError;
use crate::lifecycle::{Interpreter, MemoryStats};

/// Result of [`Avm::call`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvmOutcome {
    pub result: InterpreterResult,
    /// Bytes linear memory grew by during the call.
    pub memory_delta: usize,
    pub execution_time: Duration,
}

/// An interpreter paired with the store that keeps particle state between
/// calls: `prev_data` is loaded from the store and the new data written back.
pub struct Avm<S> {
    interpreter: Interpreter,
    data_store: S,
}

impl<S: DataStore> Avm<S> {
    pub fn new(interpreter: Interpreter, mut data_store: S) -> Result<Self, RuntimeError> {
        data_store.initialize()?;
        Ok(Self {
            interpreter,
            data_store,
        })
    }

    #[tracing::instrument(skip_all, fields(particle_id = %run_params.particle_id))]
    pub fn call(
        &mut self,
        air: &str,
        data: &[u8],
        run_params: &RunParameters,
        call_results: &CallResults,
    ) -> Result<AvmOutcome, RuntimeError> {
        let prev_data = self
            .data_store
            .read_data(&run_params.particle_id, &run_params.current_peer_id)?;

        let started = Instant::now();
        let memory_before = self.memory_stats().memory_size;
        let result = self
            .interpreter
            .invoke(air, &prev_data, data, run_params, call_results)?;
        let execution_time = started.elapsed();
        let memory_delta = self
            .memory_stats()
            .memory_size
            .saturating_sub(memory_before);

        // stored whatever the return code; a failed run still carries the trace
        self.data_store.store_data(
            &result.data,
            &run_params.particle_id,
            &run_params.current_peer_id,
        )?;

        tracing::debug!(
            ret_code = result.ret_code,
            memory_delta,
            execution_time_ms = execution_time.as_millis() as u64,
            "particle executed"
        );

        Ok(AvmOutcome {
            result,
            memory_delta,
            execution_time,
        })
    }

    pub fn cleanup_data(&mut self, particle_id: &str, current_peer_id: &str) -> Result<(), RuntimeError> {
        self.data_store.cleanup_data(particle_id, current_peer_id)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.interpreter.memory_stats()
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn data_store(&self) -> &S {
        &self.data_store
    }
}
