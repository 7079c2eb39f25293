use thiserror::Error;

/// Errors from repository operations (used by trait definitions in relflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors a host listener may report back to the engine.
///
/// The engine logs these and keeps running; a listener failure never stops
/// a workflow.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("notification error: {0}")]
    Notify(String),
}

impl From<RepositoryError> for ListenerError {
    fn from(err: RepositoryError) -> Self {
        ListenerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_listener_error_from_repository() {
        let err: ListenerError = RepositoryError::NotFound.into();
        assert_eq!(err.to_string(), "storage error: entity not found");
    }
}
