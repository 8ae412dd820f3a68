use std::sync::Arc;

use avm_interface::{
    CallRequests, CallResults, CallServiceResult, InterpreterResult, RunParameters,
};
use serde::Serialize;
use serde_json::Value;

use crate::config::DEFAULT_MAX_ROUNDS;
use crate::error::RuntimeError;
use crate::host::ServiceInvoker;
use crate::lifecycle::Interpreter;

/// Return code recorded for a call whose handler failed.
pub const SERVICE_ERROR_CODE: i32 = 1;

/// Final state of a particle after [`ParticleRunner::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleOutcome {
    /// Outcome of the last invocation, with `next_peer_pks` merged across
    /// every round.
    pub result: InterpreterResult,
    pub rounds: usize,
    pub executed_calls: usize,
}

/// Drives one particle on this peer until the interpreter stops asking for
/// service calls.
pub struct ParticleRunner {
    interpreter: Interpreter,
    services: Arc<dyn ServiceInvoker>,
    max_rounds: usize,
}

impl ParticleRunner {
    pub fn new(interpreter: Interpreter, services: Arc<dyn ServiceInvoker>) -> Self {
        Self {
            interpreter,
            services,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// At least one round always runs.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn into_interpreter(self) -> Interpreter {
        self.interpreter
    }

    /// Invoke, execute the requested calls, feed their results back, and
    /// repeat. Stops on an outcome without call requests or with a non-zero
    /// return code.
    #[tracing::instrument(skip_all, fields(particle_id = %run_params.particle_id))]
    pub fn run(
        &mut self,
        air: &str,
        prev_data: &[u8],
        data: &[u8],
        run_params: &RunParameters,
        call_results: CallResults,
    ) -> Result<ParticleOutcome, RuntimeError> {
        let mut prev_data = prev_data.to_vec();
        let mut data = data.to_vec();
        let mut call_results = call_results;
        let mut next_peer_pks: Vec<String> = Vec::new();
        let mut executed_calls = 0;

        for round in 1..=self.max_rounds {
            let result = self
                .interpreter
                .invoke(air, &prev_data, &data, run_params, &call_results)?;

            for peer in &result.next_peer_pks {
                if !next_peer_pks.contains(peer) {
                    next_peer_pks.push(peer.clone());
                }
            }

            if !result.is_success() || result.call_requests.is_empty() {
                tracing::info!(
                    round,
                    ret_code = result.ret_code,
                    executed_calls,
                    "particle settled"
                );
                return Ok(ParticleOutcome {
                    result: InterpreterResult {
                        next_peer_pks,
                        ..result
                    },
                    rounds: round,
                    executed_calls,
                });
            }

            let InterpreterResult {
                data: state,
                call_requests,
                ..
            } = result;
            call_results = self.execute(call_requests);
            executed_calls += call_results.len();
            prev_data = state;
            data.clear();
        }

        Err(RuntimeError::TooManyRounds {
            rounds: self.max_rounds,
        })
    }

    fn execute(&self, requests: CallRequests) -> CallResults {
        requests
            .into_iter()
            .map(|(call_id, request)| {
                tracing::debug!(
                    call_id,
                    service_id = %request.service_id,
                    function_name = %request.function_name,
                    "executing call request"
                );
                let result = self.services.call(request).unwrap_or_else(|e| {
                    tracing::warn!(call_id, "service call failed: {e:#}");
                    CallServiceResult::error(
                        SERVICE_ERROR_CODE,
                        Value::String(format!("{e:#}")).to_string(),
                    )
                });
                (call_id, result)
            })
            .collect()
    }
}
