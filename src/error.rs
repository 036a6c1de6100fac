//! Custom error types for the application.
//!
//! `DaqError` is the single error type shared by every component. It follows the
//! station's recovery policy:
//!
//! - **`Connection`**: the serial link cannot be opened, read, or written. Fatal; the
//!   run is aborted and the link closed.
//! - **`AcknowledgmentTimeout`**: an expected device confirmation did not arrive in
//!   time. Logged; the cycle continues in degraded form.
//! - **`Capture`**: the camera yielded no frame. Logged; the cycle proceeds without
//!   an image.
//! - **`Config`** / **`Configuration`**: settings could not be loaded or are invalid.
//!   Fatal, reported before any hardware is touched.
//! - **`Sequence`**: the cycle state machine was driven with an event its current
//!   state does not accept. A programming error; fatal.
//! - **`Io`**, **`Storage`**, **`Image`**: persistence problems. Logged; never abort a
//!   cycle that already moved a physical sample.
//!
//! A measurement fragment that cannot be parsed is not an error at all: the
//! fragment parser is total and returns `None`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by station components.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {waited:?} waiting for '{expected}'")]
    AcknowledgmentTimeout { expected: String, waited: Duration },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Cycle sequencing error: {0}")]
    Sequence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl DaqError {
    /// Whether the error must abort the whole run rather than a single step.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::Connection(_)
                | DaqError::Config(_)
                | DaqError::Configuration(_)
                | DaqError::Sequence(_)
        )
    }
}

impl From<csv::Error> for DaqError {
    fn from(value: csv::Error) -> Self {
        DaqError::Storage(value.to_string())
    }
}

impl From<image::ImageError> for DaqError {
    fn from(value: image::ImageError) -> Self {
        DaqError::Image(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_config_errors_are_fatal() {
        assert!(DaqError::Connection("port gone".into()).is_fatal());
        assert!(DaqError::Configuration("bad baud".into()).is_fatal());

        assert!(!DaqError::Capture("no frame".into()).is_fatal());
        assert!(!DaqError::Storage("disk full".into()).is_fatal());
        assert!(!DaqError::AcknowledgmentTimeout {
            expected: "AT_HOME".into(),
            waited: Duration::from_secs(15),
        }
        .is_fatal());
    }

    #[test]
    fn timeout_message_names_expected_token() {
        let err = DaqError::AcknowledgmentTimeout {
            expected: "AT_CAPTURE".into(),
            waited: Duration::from_secs(15),
        };
        let msg = err.to_string();
        assert!(msg.contains("AT_CAPTURE"));
        assert!(msg.contains("15s"));
    }
}
