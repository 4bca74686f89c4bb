//! Error types for the Krill runtime.
//!
//! Only construction-time problems surface here. Everything that can go
//! wrong at runtime (full mailbox, dead destination, exhausted slot pool)
//! is reported as a value — [`SendResult`](crate::SendResult) variants or
//! a `None` PID — and never as an error or a panic.

use thiserror::Error;

/// Result type alias for Krill operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported while building a runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration parameter.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected parameter.
        message: String,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::config("process_cap must be at least 1");
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(
            err.to_string(),
            "invalid configuration: process_cap must be at least 1"
        );
    }
}
