//! Fan-out errors.

use relay_core::errors::{Classified, CodecError, ErrorCategory, ErrorSeverity};
use relay_store::StoreError;
use thiserror::Error;

/// Errors from backlog access.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An error raised while serving one session.
    #[error("session {session_id}: {source}")]
    Session {
        /// Session the error belongs to.
        session_id: String,
        /// The underlying error.
        #[source]
        source: Box<FanoutError>,
    },
}

impl FanoutError {
    /// Attribute the error to `session_id`. Already attributed errors are
    /// returned as they are.
    #[must_use]
    pub fn for_session(self, session_id: &str) -> Self {
        match self {
            Self::Session { .. } => self,
            other => Self::Session {
                session_id: session_id.to_owned(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type for fan-out operations.
pub type Result<T> = std::result::Result<T, FanoutError>;

impl Classified for FanoutError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(err) => err.category(),
            Self::Codec(_) => ErrorCategory::Codec,
            Self::Session { source, .. } => source.category(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Store(err) => err.severity(),
            Self::Codec(_) => ErrorSeverity::Error,
            Self::Session { source, .. } => source.severity(),
        }
    }

    fn session_id(&self) -> Option<&str> {
        match self {
            Self::Session { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::Fault;

    use super::*;

    #[test]
    fn store_classification_passes_through() {
        let err = FanoutError::from(StoreError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.category(), ErrorCategory::Store);
        assert_eq!(err.severity(), ErrorSeverity::Transient);
    }

    #[test]
    fn session_attribution_reaches_the_fault() {
        let err = FanoutError::from(StoreError::Timeout(Duration::from_secs(1)))
            .for_session("abc")
            .for_session("xyz");
        assert_eq!(err.session_id(), Some("abc"));
        assert_eq!(err.category(), ErrorCategory::Store);
        assert_eq!(err.severity(), ErrorSeverity::Transient);

        let fault = Fault::from_error("fanout.worker", &err);
        assert_eq!(fault.session_id.as_deref(), Some("abc"));
        assert!(fault.message.starts_with("session abc: store await timeout"));
    }
}
