//! Protocol error types.

use thiserror::Error;

/// Errors reported by the protocol reader and writer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request is too short to carry a request id and command")]
    RequestTooShort,

    #[error("unknown command: '{0}'")]
    UnknownCommand(String),

    #[error("missing space between {0} and its argument")]
    MissingSpace(&'static str),

    #[error("stream ended before a full frame was read")]
    UnexpectedEof,

    #[error("connection closed")]
    Closed,

    #[error("request id begins with the reserved update prefix '*'")]
    ReservedRequestId,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true when the frame was malformed but the stream itself is
    /// still positioned at a line boundary, so the reader can advance to
    /// the next frame.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::RequestTooShort
                | ProtocolError::UnknownCommand(_)
                | ProtocolError::MissingSpace(_)
                | ProtocolError::ReservedRequestId
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_classification() {
        assert!(ProtocolError::RequestTooShort.is_decode_error());
        assert!(ProtocolError::UnknownCommand("EVIL".to_string()).is_decode_error());
        assert!(ProtocolError::MissingSpace("SET").is_decode_error());
        assert!(ProtocolError::ReservedRequestId.is_decode_error());

        assert!(!ProtocolError::UnexpectedEof.is_decode_error());
        assert!(!ProtocolError::Closed.is_decode_error());
        assert!(!ProtocolError::Io(std::io::Error::other("boom")).is_decode_error());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownCommand("EVIL".to_string());
        assert!(err.to_string().contains("EVIL"));

        let err = ProtocolError::MissingSpace("GET");
        assert!(err.to_string().contains("GET"));
    }
}
