//! Error types for `floorsync-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("unknown event: {0:?}")]
  UnknownEvent(String),

  #[error("malformed {event} payload: {source}")]
  MalformedPayload {
    event:  &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid frame: {0}")]
  InvalidFrame(#[from] serde_json::Error),
}

impl Error {
  /// Short, client-facing summary used as the `message` of an `error`
  /// reply. The full error text goes into `details`.
  pub fn summary(&self) -> &'static str {
    match self {
      Error::MissingField(_) => "Missing required fields",
      Error::UnknownEvent(_) => "Unknown event",
      Error::MalformedPayload { .. } | Error::InvalidFrame(_) => {
        "Malformed message"
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
