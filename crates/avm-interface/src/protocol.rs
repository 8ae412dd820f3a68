//! Wire contracts of the interpreter protocol generations.
//!
//! Each generation is a fixed contract: its own `invoke` shape, its own
//! encoding of call results and call requests. Field names on the wire are
//! always lower snake case. Nothing here touches guest memory; the runtime
//! marshals the buffers produced and consumed by these functions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use avm_sede::{Format, JsonFormat, MsgPackFormat, Multiformat};
use serde::{Deserialize, Deserializer, Serialize};
use serde_bytes::ByteBuf;
use serde_json::Value;

use crate::call::{CallRequest, CallRequests, CallResults, SecurityTetraplet};
use crate::error::InterfaceError;
use crate::outcome::InterpreterResult;
use crate::run_parameters::RunParameters;

/// Call results and call requests of the packed generation.
pub const PACKED_COLLECTIONS: Multiformat<MsgPackFormat> = Multiformat::new(MsgPackFormat);
/// Per-request arguments and tetraplets of the packed generation.
pub const PACKED_VALUES: MsgPackFormat = MsgPackFormat;
/// Everything of the split generation.
pub const SPLIT_FORMAT: JsonFormat = JsonFormat;

/// Which wire contract the loaded guest implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Service calls happen synchronously through host imports during `invoke`.
    Callback,
    /// One pointer/length pair per `invoke` field, JSON collections.
    Split,
    /// One JSON payload string, multiformat MessagePack collections.
    #[default]
    Packed,
}

impl ProtocolVersion {
    /// Number of pointer/length pairs `invoke` takes after the return slot.
    pub fn invoke_arity(self) -> usize {
        match self {
            Self::Callback => 5,
            Self::Split => 6,
            Self::Packed => 1,
        }
    }

    /// Whether the guest imports the call-service bridge and peer accessor.
    pub fn has_service_imports(self) -> bool {
        matches!(self, Self::Callback)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Callback => "callback",
            Self::Split => "split",
            Self::Packed => "packed",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "callback" => Ok(Self::Callback),
            "split" => Ok(Self::Split),
            "packed" => Ok(Self::Packed),
            other => Err(format!("unknown protocol version: {other}")),
        }
    }
}

#[derive(Serialize)]
struct SplitRunParameters<'a> {
    init_peer_id: &'a str,
    current_peer_id: &'a str,
}

#[derive(Serialize)]
struct PackedRunParameters<'a> {
    init_peer_id: &'a str,
    current_peer_id: &'a str,
    timestamp: u64,
    ttl: u32,
    particle_id: &'a str,
    key_format: u8,
    secret_key_bytes: &'a [u8],
    air_size_limit: u64,
    particle_size_limit: u64,
    call_result_size_limit: u64,
    hard_limit_enabled: bool,
}

impl<'a> From<&'a RunParameters> for PackedRunParameters<'a> {
    fn from(params: &'a RunParameters) -> Self {
        Self {
            init_peer_id: &params.init_peer_id,
            current_peer_id: &params.current_peer_id,
            timestamp: params.timestamp,
            ttl: params.ttl,
            particle_id: &params.particle_id,
            key_format: params.key_format,
            secret_key_bytes: &params.secret_key_bytes,
            air_size_limit: params.limits.air_size_limit,
            particle_size_limit: params.limits.particle_size_limit,
            call_result_size_limit: params.limits.call_result_size_limit,
            hard_limit_enabled: params.limits.hard_limit_enabled,
        }
    }
}

/// The two encoded buffers of a split-generation `invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    pub params: Vec<u8>,
    pub call_results: Vec<u8>,
}

pub fn encode_split_request(
    run_params: &RunParameters,
    call_results: &CallResults,
) -> Result<SplitRequest, InterfaceError> {
    let params = SplitRunParameters {
        init_peer_id: &run_params.init_peer_id,
        current_peer_id: &run_params.current_peer_id,
    };
    let params = serde_json::to_vec(&params).map_err(|e| InterfaceError::Encode {
        what: "run parameters",
        source: avm_sede::SedeError::Encode {
            format: "json",
            reason: e.to_string(),
        },
    })?;
    let call_results = SPLIT_FORMAT
        .encode(call_results)
        .map_err(|source| InterfaceError::Encode {
            what: "call results",
            source,
        })?;

    Ok(SplitRequest {
        params,
        call_results,
    })
}

/// Build the single JSON payload of a packed-generation `invoke`:
/// `[script, prev_data, data, run_params, call_results]`.
pub fn encode_packed_request(
    air: &str,
    prev_data: &[u8],
    data: &[u8],
    run_params: &RunParameters,
    call_results: &CallResults,
) -> Result<String, InterfaceError> {
    let call_results = PACKED_COLLECTIONS
        .encode(call_results)
        .map_err(|source| InterfaceError::Encode {
            what: "call results",
            source,
        })?;
    let payload = (
        air,
        prev_data,
        data,
        PackedRunParameters::from(run_params),
        call_results,
    );

    serde_json::to_string(&payload).map_err(|e| InterfaceError::Encode {
        what: "invoke payload",
        source: avm_sede::SedeError::Encode {
            format: "json",
            reason: e.to_string(),
        },
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct RawOutcome {
    ret_code: i64,
    #[serde(default)]
    error_message: String,
    #[serde(default, deserialize_with = "bytes_or_text")]
    data: Vec<u8>,
    #[serde(default)]
    next_peer_pks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    call_requests: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytesOrText {
    Bytes(Vec<u8>),
    Text(String),
}

// the callback generation returns its state as a string
fn bytes_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    Ok(match BytesOrText::deserialize(deserializer)? {
        BytesOrText::Bytes(bytes) => bytes,
        BytesOrText::Text(text) => text.into_bytes(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct TextCallRequest {
    service_id: String,
    function_name: String,
    arguments: String,
    tetraplets: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BinaryCallRequest {
    service_id: String,
    function_name: String,
    arguments: ByteBuf,
    tetraplets: ByteBuf,
}

/// Parse the JSON outcome string returned by the guest's `invoke`.
pub fn decode_outcome(
    protocol: ProtocolVersion,
    raw: &str,
) -> Result<InterpreterResult, InterfaceError> {
    let outcome: RawOutcome = serde_json::from_str(raw).map_err(|e| InterfaceError::Outcome {
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;
    let call_requests = decode_call_requests(protocol, &outcome.call_requests)?;

    Ok(InterpreterResult {
        ret_code: outcome.ret_code,
        error_message: outcome.error_message,
        data: outcome.data,
        next_peer_pks: outcome.next_peer_pks,
        call_requests,
    })
}

/// Decode the nested `call_requests` buffer of an outcome.
///
/// An empty buffer is an empty collection; the decoder is not consulted.
pub fn decode_call_requests(
    protocol: ProtocolVersion,
    bytes: &[u8],
) -> Result<CallRequests, InterfaceError> {
    if bytes.is_empty() {
        return Ok(CallRequests::new());
    }

    match protocol {
        ProtocolVersion::Callback => {
            tracing::warn!(
                len = bytes.len(),
                "callback protocol outcome carries call requests; ignoring them"
            );
            Ok(CallRequests::new())
        }
        ProtocolVersion::Split => {
            let raw: BTreeMap<u32, TextCallRequest> = SPLIT_FORMAT
                .decode(bytes)
                .map_err(InterfaceError::CallRequests)?;
            raw.into_iter()
                .map(|(call_id, request)| {
                    let arguments: Vec<Value> = SPLIT_FORMAT
                        .decode(request.arguments.as_bytes())
                        .map_err(|source| InterfaceError::Arguments { call_id, source })?;
                    let tetraplets: Vec<Vec<SecurityTetraplet>> = SPLIT_FORMAT
                        .decode(request.tetraplets.as_bytes())
                        .map_err(|source| InterfaceError::Tetraplets { call_id, source })?;
                    let request = CallRequest::new(
                        request.service_id,
                        request.function_name,
                        arguments,
                        tetraplets,
                    );
                    Ok((call_id, request))
                })
                .collect()
        }
        ProtocolVersion::Packed => {
            let raw: BTreeMap<u32, BinaryCallRequest> = PACKED_COLLECTIONS
                .decode(bytes)
                .map_err(InterfaceError::CallRequests)?;
            raw.into_iter()
                .map(|(call_id, request)| {
                    let arguments: Vec<Value> = PACKED_VALUES
                        .decode(&request.arguments)
                        .map_err(|source| InterfaceError::Arguments { call_id, source })?;
                    let tetraplets: Vec<Vec<SecurityTetraplet>> = PACKED_VALUES
                        .decode(&request.tetraplets)
                        .map_err(|source| InterfaceError::Tetraplets { call_id, source })?;
                    let request = CallRequest::new(
                        request.service_id,
                        request.function_name,
                        arguments,
                        tetraplets,
                    );
                    Ok((call_id, request))
                })
                .collect()
        }
    }
}

/// Guest-side inverse of [`decode_call_requests`], for building fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub fn encode_call_requests(
    protocol: ProtocolVersion,
    requests: &CallRequests,
) -> Result<Vec<u8>, InterfaceError> {
    let encode_error = |source| InterfaceError::Encode {
        what: "call requests",
        source,
    };

    match protocol {
        ProtocolVersion::Callback => Ok(Vec::new()),
        ProtocolVersion::Split => {
            let raw = requests
                .iter()
                .map(|(call_id, request)| {
                    let arguments = SPLIT_FORMAT.encode(&request.arguments).map_err(encode_error)?;
                    let tetraplets = SPLIT_FORMAT.encode(&request.tetraplets).map_err(encode_error)?;
                    let raw = TextCallRequest {
                        service_id: request.service_id.clone(),
                        function_name: request.function_name.clone(),
                        arguments: String::from_utf8_lossy(&arguments).into_owned(),
                        tetraplets: String::from_utf8_lossy(&tetraplets).into_owned(),
                    };
                    Ok((*call_id, raw))
                })
                .collect::<Result<BTreeMap<_, _>, InterfaceError>>()?;
            SPLIT_FORMAT.encode(&raw).map_err(encode_error)
        }
        ProtocolVersion::Packed => {
            let raw = requests
                .iter()
                .map(|(call_id, request)| {
                    let arguments = PACKED_VALUES.encode(&request.arguments).map_err(encode_error)?;
                    let tetraplets = PACKED_VALUES.encode(&request.tetraplets).map_err(encode_error)?;
                    let raw = BinaryCallRequest {
                        service_id: request.service_id.clone(),
                        function_name: request.function_name.clone(),
                        arguments: ByteBuf::from(arguments),
                        tetraplets: ByteBuf::from(tetraplets),
                    };
                    Ok((*call_id, raw))
                })
                .collect::<Result<BTreeMap<_, _>, InterfaceError>>()?;
            PACKED_COLLECTIONS.encode(&raw).map_err(encode_error)
        }
    }
}

/// Guest-side inverse of [`decode_outcome`], for building fixtures.
#[cfg(any(test, feature = "test-utils"))]
pub fn encode_outcome(
    protocol: ProtocolVersion,
    result: &InterpreterResult,
) -> Result<String, InterfaceError> {
    let outcome = RawOutcome {
        ret_code: result.ret_code,
        error_message: result.error_message.clone(),
        data: result.data.clone(),
        next_peer_pks: result.next_peer_pks.clone(),
        call_requests: encode_call_requests(protocol, &result.call_requests)?,
    };

    serde_json::to_string(&outcome).map_err(|e| InterfaceError::Encode {
        what: "interpreter outcome",
        source: avm_sede::SedeError::Encode {
            format: "json",
            reason: e.to_string(),
        },
    })
}
