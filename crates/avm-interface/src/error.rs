use avm_sede::SedeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("couldn't encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: SedeError,
    },

    #[error("couldn't parse interpreter outcome: {reason}. Original data is: {raw:?}")]
    Outcome { reason: String, raw: String },

    #[error("couldn't parse call requests: {0}")]
    CallRequests(#[source] SedeError),

    #[error("couldn't parse arguments of call {call_id}: {source}")]
    Arguments {
        call_id: u32,
        #[source]
        source: SedeError,
    },

    #[error("couldn't parse tetraplets of call {call_id}: {source}")]
    Tetraplets {
        call_id: u32,
        #[source]
        source: SedeError,
    },
}
