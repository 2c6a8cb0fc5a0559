use thiserror::Error;

/// Errors surfaced by the search-index client.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no cluster node available: {0}")]
    NoNodeAvailable(String),

    #[error("illegal client state: {0}")]
    IllegalState(String),

    #[error("cluster blocked: {0}")]
    ClusterBlocked(String),

    #[error("search phase execution failed: {0}")]
    SearchPhase(String),

    #[error("index client not configured: {0}")]
    Configuration(String),

    #[error("malformed cluster payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cluster rejected request (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    /// Connectivity failures that are retried after a reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoNodeAvailable(_)
                | Self::IllegalState(_)
                | Self::ClusterBlocked(_)
                | Self::SearchPhase(_)
        )
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_transient() {
        assert!(IndexError::NoNodeAvailable("x".into()).is_transient());
        assert!(IndexError::IllegalState("x".into()).is_transient());
        assert!(IndexError::ClusterBlocked("x".into()).is_transient());
        assert!(IndexError::SearchPhase("x".into()).is_transient());
    }

    #[test]
    fn terminal_errors_are_not_transient() {
        assert!(!IndexError::Configuration("x".into()).is_transient());
        assert!(!IndexError::Cancelled.is_transient());
        assert!(
            !IndexError::Rejected {
                status: 400,
                reason: "bad".into()
            }
            .is_transient()
        );
    }
}
