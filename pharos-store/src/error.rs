//! Store error types.

use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is not a JSON object")]
    InvalidSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_slice::<serde_json::Value>(b"not json").unwrap_err();
        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::Json(_)));
    }
}
