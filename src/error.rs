use std::error::Error as StdError;
use std::fmt;

use crate::platform::Capability;
use crate::sync::SyncDomain;

/// Errors raised by the pairing, tracking and sync components
#[derive(Debug)]
pub enum Error {
    /// The user declined an OS capability
    PermissionDenied(Capability),
    /// Network failure or unreadable response from the backend
    Transport(String),
    /// A sensor or data source could not produce data (e.g. no GPS fix)
    Unavailable(String),
    /// Backend answered with a non-success status
    Status { status: u16, body: String },
    /// Operation needs a device identity or role that does not exist yet
    NotConfigured(&'static str),
    /// One or more sync domains failed
    PartialSync(Vec<SyncDomain>),
    /// Setup arguments were rejected before contacting the backend
    InvalidSetup(String),
    /// Persisted key-value store could not be read or written
    Store(String),
    /// Background task scheduler refused an operation
    Scheduler(String),
    /// Configuration file missing or invalid
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PermissionDenied(cap) => write!(f, "Permission denied: {}", cap),
            Error::Transport(msg) => write!(f, "Transport failure: {}", msg),
            Error::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            Error::Status { status, body } => {
                write!(f, "Backend returned status {}: {}", status, body)
            }
            Error::NotConfigured(what) => write!(f, "Not configured: {}", what),
            Error::PartialSync(domains) => {
                let names: Vec<&str> = domains.iter().map(|d| d.as_str()).collect();
                write!(f, "Sync failed for domain(s): {}", names.join(", "))
            }
            Error::InvalidSetup(msg) => write!(f, "Invalid setup: {}", msg),
            Error::Store(msg) => write!(f, "Store error: {}", msg),
            Error::Scheduler(msg) => write!(f, "Scheduler error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl StdError for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PermissionDenied(Capability::BackgroundLocation);
        assert_eq!(err.to_string(), "Permission denied: background location");

        let err = Error::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));

        let err = Error::PartialSync(vec![SyncDomain::Contacts, SyncDomain::Location]);
        assert_eq!(
            err.to_string(),
            "Sync failed for domain(s): contacts, location"
        );
    }
}
