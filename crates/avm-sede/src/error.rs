use thiserror::Error;

#[derive(Debug, Error)]
pub enum SedeError {
    #[error("failed to encode {format} value: {reason}")]
    Encode { format: &'static str, reason: String },

    #[error("failed to decode {format} payload: {reason}. Original data is: {payload}")]
    Decode {
        format: &'static str,
        reason: String,
        payload: String,
    },

    #[error("unsupported multiformat codec: {code:#x}. Original data is: {payload}")]
    UnknownCodec { code: u32, payload: String },

    #[error("failed to parse multiformat prefix: {reason}. Original data is: {payload}")]
    Prefix { reason: String, payload: String },

    #[error("format {0} has no multicodec code and cannot be wrapped")]
    Uncoded(&'static str),
}

impl SedeError {
    pub(crate) fn decode(format: &'static str, reason: impl ToString, payload: &[u8]) -> Self {
        Self::Decode {
            format,
            reason: reason.to_string(),
            payload: render_payload(payload),
        }
    }
}

/// Render a raw payload for an error message: text when it is valid UTF-8,
/// hex otherwise.
pub fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => format!("{text:?}"),
        Err(_) => format!("0x{}", hex::encode(payload)),
    }
}
