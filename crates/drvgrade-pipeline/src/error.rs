//! Errors from external process invocations.

/// Failure to run a privileged or external operation to completion.
///
/// A command that runs and exits non-zero is not an error; its output is
/// returned and the stage judges it.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("permission denied running `{program}`: {detail}")]
    PermissionDenied { program: String, detail: String },

    #[error("`{program}` timed out after {limit_ms} ms")]
    Timeout {
        program: String,
        limit_ms: u64,
        /// Output captured before the deadline.
        partial_output: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolchainError {
    /// Whatever output was captured before the failure.
    pub fn partial_output(&self) -> &str {
        match self {
            ToolchainError::Timeout { partial_output, .. } => partial_output,
            _ => "",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolchainError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ToolchainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_keeps_partial_output() {
        let err = ToolchainError::Timeout {
            program: "make".to_string(),
            limit_ms: 500,
            partial_output: "CC hello.o\n".to_string(),
        };
        assert!(err.is_timeout());
        assert_eq!(err.partial_output(), "CC hello.o\n");
        assert!(err.to_string().contains("500 ms"));
    }

    #[test]
    fn test_permission_denied_display() {
        let err = ToolchainError::PermissionDenied {
            program: "insmod".to_string(),
            detail: "a password is required".to_string(),
        };
        assert_eq!(err.partial_output(), "");
        assert!(err.to_string().contains("insmod"));
    }
}
