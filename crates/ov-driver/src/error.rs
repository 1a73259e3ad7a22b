//! Error taxonomy shared by every layer of the driver.

use std::panic::Location;

use thiserror::Error;

use crate::providers::MediaSlot;

/// Errors that can occur while provisioning or managing a host.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Endpoint unreachable, credentials rejected or API version unsupported.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A named hardware unit, profile or template does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Name collision on the fleet manager side.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// BMC generation outside the supported set.
    #[error("BMC model {0} is not supported")]
    UnsupportedModel(String),

    /// Virtual media insert failed.
    #[error("Virtual media mount failed on {slot}: {message}")]
    Mount { slot: MediaSlot, message: String },

    /// Virtual media eject failed.
    #[error("Virtual media eject failed on {slot}: {message}")]
    Eject { slot: MediaSlot, message: String },

    /// Reachability polling exhausted its attempt budget.
    #[error("{target} not reachable after {attempts} attempts ({timeout_secs}s budget)")]
    Timeout {
        target: String,
        attempts: u32,
        timeout_secs: u64,
    },

    /// Missing or invalid configuration, or a failed pre-flight check.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Remote shell command could not be run or exited non-zero.
    #[error("Remote shell error: {0}")]
    Shell(String),

    /// SSH key pair could not be generated or written.
    #[error("Key generation failed: {0}")]
    KeyGen(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error annotated with the operation and call site it surfaced from.
    #[error("{operation} failed at {location}: {source}")]
    Context {
        operation: &'static str,
        location: &'static Location<'static>,
        #[source]
        source: Box<DriverError>,
    },
}

impl DriverError {
    /// The innermost error, with every [`DriverError::Context`] layer removed.
    #[must_use]
    pub fn root(&self) -> &DriverError {
        let mut current = self;
        while let DriverError::Context { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// Attach call-site context to a [`DriverError`].
pub trait ResultExt<T> {
    /// Wrap the error with `operation` and the caller's source location.
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    #[track_caller]
    fn during(self, operation: &'static str) -> Result<T> {
        let location = Location::caller();
        self.map_err(|source| DriverError::Context {
            operation,
            location,
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_context_layers() {
        let err: Result<()> = Err(DriverError::Conflict("ov-docker-machine-a".into()));
        let err = err.during("create profile").during("create").unwrap_err();

        assert!(matches!(err.root(), DriverError::Conflict(_)));
        let message = err.to_string();
        assert!(message.starts_with("create failed at "));
        assert!(message.contains("error.rs"));
    }
}
