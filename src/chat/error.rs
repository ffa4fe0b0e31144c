//! Platform error taxonomy.
//!
//! Adapters map raw platform error codes onto [`ErrorKind`]; the engine only
//! ever branches on the kind. A small fixed set of kinds is *fatal*: the
//! hosted resource is permanently gone and the owning session must tear
//! itself down rather than retry.

use thiserror::Error;

/// Classified platform error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("unknown channel")]
    UnknownChannel,
    #[error("unknown message")]
    UnknownMessage,
    #[error("thread archived")]
    ThreadArchived,
    #[error("missing permission")]
    Forbidden,
    #[error("rate limited")]
    RateLimited,
    #[error("temporarily unavailable")]
    Unavailable,
    #[error("platform error")]
    Other,
}

/// An error reported by the chat platform.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_channel(id: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::UnknownChannel, format!("channel {id}"))
    }

    pub fn unknown_message(id: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::UnknownMessage, format!("message {id}"))
    }

    /// Whether the resource behind this error is permanently gone.
    ///
    /// Fatal errors end the owning session; everything else is retried on
    /// the next natural trigger.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnknownChannel | ErrorKind::UnknownMessage | ErrorKind::ThreadArchived
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ChatError::unknown_channel(1).is_fatal());
        assert!(ChatError::unknown_message(2).is_fatal());
        assert!(ChatError::new(ErrorKind::ThreadArchived, "t").is_fatal());
        assert!(!ChatError::new(ErrorKind::RateLimited, "slow down").is_fatal());
        assert!(!ChatError::new(ErrorKind::Forbidden, "no").is_fatal());
        assert!(!ChatError::new(ErrorKind::Other, "?").is_fatal());
    }
}
