use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::SedeError;

/// Encodes values of type `Value` to bytes and decodes them back.
pub trait Format<Value> {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SedeError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, SedeError>;

    /// Stable multicodec code of this encoding, if it has one.
    fn codec(&self) -> Option<Codec> {
        None
    }
}

/// Structured text: JSON written as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl<Value> Format<Value> for JsonFormat
where
    Value: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SedeError> {
        serde_json::to_vec(value).map_err(|e| SedeError::Encode {
            format: "json",
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SedeError> {
        serde_json::from_slice(bytes).map_err(|e| SedeError::decode("json", e, bytes))
    }

    fn codec(&self) -> Option<Codec> {
        Some(Codec::Json)
    }
}

/// Compact binary: MessagePack with structs written as maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackFormat;

impl<Value> Format<Value> for MsgPackFormat
where
    Value: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SedeError> {
        // named encoding keeps field names on the wire; the guest matches on them
        rmp_serde::to_vec_named(value).map_err(|e| SedeError::Encode {
            format: "msgpack",
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SedeError> {
        rmp_serde::from_slice(bytes).map_err(|e| SedeError::decode("msgpack", e, bytes))
    }

    fn codec(&self) -> Option<Codec> {
        Some(Codec::MsgPack)
    }
}
