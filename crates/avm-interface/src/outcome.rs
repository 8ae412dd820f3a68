use serde::Serialize;

use crate::call::CallRequests;

/// Return code of a successful interpreter run.
pub const INTERPRETER_SUCCESS: i64 = 0;

/// Everything one invocation hands back to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpreterResult {
    /// 0 on success. Non-zero codes are normal outcomes, not host errors.
    pub ret_code: i64,
    /// Meaningful only when `ret_code != 0`.
    pub error_message: String,
    /// State to persist verbatim and pass back as `prev_data` next time,
    /// regardless of `ret_code`.
    pub data: Vec<u8>,
    /// Peers the particle should be sent to next.
    pub next_peer_pks: Vec<String>,
    /// Calls the guest wants the host to execute on this peer.
    pub call_requests: CallRequests,
}

impl InterpreterResult {
    pub fn is_success(&self) -> bool {
        self.ret_code == INTERPRETER_SUCCESS
    }
}
