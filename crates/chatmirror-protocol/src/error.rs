use thiserror::Error;

/// Why an inbound envelope could not be turned into an [`Event`](crate::Event).
///
/// Every variant is local to one envelope: callers skip the envelope and
/// keep going with the rest of the batch.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("unsupported event type: {0}")]
    UnsupportedType(String),

    #[error("{event_type}: missing required field `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("{event_type}: malformed field `{field}`: {reason}")]
    MalformedField {
        event_type: String,
        field: &'static str,
        reason: String,
    },
}

impl DecodeError {
    /// `true` for tags this client does not know yet. These are expected as
    /// the server grows new event types and are only worth a debug log.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedType(_))
    }
}
