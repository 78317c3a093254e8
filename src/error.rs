use thiserror::Error;

/// Failures raised while talking to a tracker or reconciling a single record.
///
/// Everything except [`ReconcileError::Configuration`] is caught at the record
/// boundary and written into the ledger row; configuration problems abort the
/// run before the first remote call.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("remote rejected request ({status}): {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("rate limit exhausted for {endpoint}; resets in {wait_secs}s")]
    RemoteExhausted { endpoint: String, wait_secs: u64 },

    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("unresolvable entity: {0}")]
    UnresolvableEntity(String),

    #[error("unsupported entity type: {0}")]
    UnsupportedEntityType(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl ReconcileError {
    /// Transient failures that the client retries with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::RemoteUnavailable(_) | ReconcileError::RateLimited(_)
        )
    }
}

impl From<csv::Error> for ReconcileError {
    fn from(err: csv::Error) -> Self {
        ReconcileError::Ledger(err.to_string())
    }
}

impl From<std::io::Error> for ReconcileError {
    fn from(err: std::io::Error) -> Self {
        ReconcileError::Ledger(err.to_string())
    }
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ReconcileError::RemoteUnavailable("reset".into()).is_transient());
        assert!(ReconcileError::RateLimited("api.github.com".into()).is_transient());
        assert!(!ReconcileError::RemoteRejected {
            status: 404,
            body: "Not Found".into()
        }
        .is_transient());
        assert!(!ReconcileError::UnsupportedEntityType("pull request".into()).is_transient());
    }

    #[test]
    fn rejected_message_includes_status() {
        let err = ReconcileError::RemoteRejected {
            status: 422,
            body: "Validation Failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote rejected request (422): Validation Failed"
        );
    }
}
