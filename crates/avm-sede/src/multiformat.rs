use serde::Serialize;
use serde::de::DeserializeOwned;
use unsigned_varint::decode as varint_decode;
use unsigned_varint::encode as varint_encode;

use crate::codec::Codec;
use crate::error::{SedeError, render_payload};
use crate::format::{Format, JsonFormat, MsgPackFormat};

/// Self-describing wrapper: `varint(codec) ++ inner.encode(value)`.
///
/// Encoding always uses the wrapped format. Decoding reads the prefix and
/// dispatches to whichever known format it names, so a reader configured for
/// MessagePack still accepts JSON-framed input and vice versa.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiformat<F> {
    inner: F,
}

impl<F> Multiformat<F> {
    pub const fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

/// Split a framed buffer into its codec code and body.
pub fn parse_prefix(data: &[u8]) -> Result<(u32, &[u8]), SedeError> {
    varint_decode::u32(data).map_err(|e| SedeError::Prefix {
        reason: e.to_string(),
        payload: render_payload(data),
    })
}

fn write_prefix(codec: Codec, output: &mut Vec<u8>) {
    let mut buf = varint_encode::u32_buffer();
    output.extend_from_slice(varint_encode::u32(codec.code(), &mut buf));
}

impl<Value, F> Format<Value> for Multiformat<F>
where
    Value: Serialize + DeserializeOwned,
    F: Format<Value>,
{
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SedeError> {
        let codec = self
            .inner
            .codec()
            .ok_or(SedeError::Uncoded(std::any::type_name::<F>()))?;
        let body = self.inner.encode(value)?;

        let mut output = Vec::with_capacity(body.len() + 5);
        write_prefix(codec, &mut output);
        output.extend_from_slice(&body);
        Ok(output)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SedeError> {
        let (code, body) = parse_prefix(bytes)?;
        match Codec::from_code(code) {
            Some(Codec::Json) => Format::<Value>::decode(&JsonFormat, body),
            Some(Codec::MsgPack) => Format::<Value>::decode(&MsgPackFormat, body),
            None => Err(SedeError::UnknownCodec {
                code,
                payload: render_payload(bytes),
            }),
        }
    }

    fn codec(&self) -> Option<Codec> {
        self.inner.codec()
    }
}
