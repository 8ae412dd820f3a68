use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Return code of a successful service call.
pub const CALL_SERVICE_SUCCESS: i32 = 0;

/// Pending service calls produced by one invocation, keyed by call id.
///
/// Call ids are unique per invocation; inserting a duplicate id replaces the
/// earlier entry.
pub type CallRequests = BTreeMap<u32, CallRequest>;

/// Results of previously requested calls, keyed by the call id they answer.
///
/// Same uniqueness rule as [`CallRequests`]: the last value for an id wins.
pub type CallResults = BTreeMap<u32, CallServiceResult>;

/// Outcome of a host service call as seen by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallServiceResult {
    /// 0 on success.
    pub ret_code: i32,
    /// Serialized (JSON) return value, or an error description.
    pub result: String,
}

impl CallServiceResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            ret_code: CALL_SERVICE_SUCCESS,
            result: result.into(),
        }
    }

    pub fn error(ret_code: i32, message: impl Into<String>) -> Self {
        Self {
            ret_code,
            result: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.ret_code == CALL_SERVICE_SUCCESS
    }
}

/// A service call the interpreter wants the host to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub service_id: String,
    pub function_name: String,
    pub arguments: Vec<Value>,
    /// One list of origin records per argument.
    pub tetraplets: Vec<Vec<SecurityTetraplet>>,
}

impl CallRequest {
    pub fn new(
        service_id: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
        tetraplets: Vec<Vec<SecurityTetraplet>>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            function_name: function_name.into(),
            arguments,
            tetraplets,
        }
    }
}

/// Network location of a value's origin with every variable resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedTriplet {
    pub peer_pk: String,
    pub service_id: String,
    pub function_name: String,
}

/// Provenance of one argument value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityTetraplet {
    pub peer_pk: String,
    pub service_id: String,
    pub function_name: String,
    /// Path applied to the producing call's output to obtain the value.
    #[serde(alias = "json_path")]
    pub lens: String,
}

impl SecurityTetraplet {
    pub fn triplet(&self) -> ResolvedTriplet {
        ResolvedTriplet {
            peer_pk: self.peer_pk.clone(),
            service_id: self.service_id.clone(),
            function_name: self.function_name.clone(),
        }
    }
}
