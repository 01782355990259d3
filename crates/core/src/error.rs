use thiserror::Error;

/// Failure taxonomy shared by every stage of a tool call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Confirmation declined: {0}")]
    ConfirmationDeclined(String),

    #[error("Tool execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl ToolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Stable tag carried in failed results as `metadata.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::ConfirmationDeclined(_) => "confirmation_declined",
            Self::Timeout(_) => "timeout",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Infrastructure(_) => "infrastructure",
        }
    }

    /// Resolution hint surfaced to the user next to the error.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("Check the tool name and namespace against the registry"),
            Self::Validation(_) => Some("Fix the parameters to match the tool's schema"),
            Self::ConfirmationDeclined(_) => None,
            Self::Timeout(_) => Some("Retry with a larger timeout or a smaller unit of work"),
            Self::ExecutionFailed(_) => None,
            Self::Cancelled(_) => None,
            Self::Infrastructure(_) => Some("Check that the workspace and its storage are accessible"),
        }
    }

    /// Whether this error ends a call without any execution attempt.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Validation(_) | Self::ConfirmationDeclined(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_errors() {
        let err = ToolError::Validation(vec!["missing a".into(), "missing b".into()]);
        assert_eq!(err.to_string(), "Validation error: missing a; missing b");
        assert_eq!(err.kind(), "validation");
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_timeout_message() {
        let err = ToolError::Timeout(250);
        assert!(err.to_string().contains("timed out"));
        assert!(!err.is_pre_execution());
    }
}
