//! Error taxonomy for drvgrade.

use std::path::PathBuf;

/// drvgrade domain errors.
///
/// Stage failures are not errors: compile and runtime outcomes are reported
/// as records with notes. These variants cover the cases where no complete
/// report can be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("source file not readable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("score log error: {0}")]
    ScoreLog(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for drvgrade domain operations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_unreadable_display() {
        let err = EvalError::SourceUnreadable {
            path: PathBuf::from("missing.c"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("missing.c"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_invalid_pattern_display() {
        let err = EvalError::InvalidPattern {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert!(err.to_string().contains("invalid pattern `(`"));
    }

    #[test]
    fn test_panic_message_variants() {
        let p = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*p), "static");
        let p = std::panic::catch_unwind(|| panic!("{}", 7)).unwrap_err();
        assert_eq!(panic_message(&*p), "7");
        let p = std::panic::catch_unwind(|| std::panic::panic_any(3u8)).unwrap_err();
        assert_eq!(panic_message(&*p), "unknown panic");
    }

    #[test]
    fn test_invalid_config_display() {
        let err = EvalError::InvalidConfig("threads must be positive".to_string());
        assert!(err.to_string().contains("invalid configuration"));
    }
}
