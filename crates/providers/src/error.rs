/// Failures that end a chat request before any stream output is written.
///
/// The display strings are the `error` field of the JSON body the client sees.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("OPENAI_API_KEY not set in environment")]
    MissingApiKey,

    #[error("Message or image required")]
    EmptyRequest,

    #[error("OpenAI API error")]
    UpstreamStatus { status: u16, details: String },

    #[error("Server error")]
    UpstreamUnreachable(String),
}

impl ChatError {
    /// Diagnostic text that accompanies the error category, if any.
    pub fn details(&self) -> Option<&str> {
        match self {
            ChatError::UpstreamStatus { details, .. } => Some(details),
            ChatError::UpstreamUnreachable(details) => Some(details),
            ChatError::MissingApiKey | ChatError::EmptyRequest => None,
        }
    }

    /// Whether the client, rather than config or upstream, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::EmptyRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_carries_details() {
        let err = ChatError::UpstreamStatus {
            status: 401,
            details: "invalid api key".into(),
        };
        assert_eq!(err.to_string(), "OpenAI API error");
        assert_eq!(err.details(), Some("invalid api key"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_empty_request_is_client_error() {
        assert!(ChatError::EmptyRequest.is_client_error());
        assert_eq!(ChatError::EmptyRequest.details(), None);
    }
}
