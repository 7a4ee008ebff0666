//! Error types for the reconciliation core
//!
//! Every operation in this crate reports through [`PlatformError`]. Context
//! is layered with [`ResultExt::context`], which keeps the underlying cause
//! reachable through `source()`.

use thiserror::Error;

/// Error type for platform operations
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The command could not be started at all
    #[error("running `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Filesystem access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The persisted agent identity cannot be used
    #[error("reading agent identity from {path}: {reason}")]
    Identity { path: String, reason: String },

    /// Tool output did not look like we expected
    #[error("parsing output: {0}")]
    Parse(String),

    /// A retried operation never succeeded
    #[error("giving up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PlatformError>,
    },

    /// The desired partitions do not fit on the device
    #[error("partitions need {required} bytes but {device} has {available}")]
    InsufficientSpace {
        device: String,
        required: u64,
        available: u64,
    },

    /// The desired layout cannot be laid out on any device
    #[error("invalid partition layout for {device}: {reason}")]
    InvalidLayout { device: String, reason: String },

    /// No physical interface carries the network's MAC address
    #[error("no device found for network '{network}' with MAC address '{mac}'")]
    InterfaceNotFound { network: String, mac: String },

    /// Network settings cannot be turned into an interface configuration
    #[error("invalid network '{network}': {reason}")]
    InvalidNetwork { network: String, reason: String },

    /// The OS has no interface with that name
    #[error("validating network interface '{0}' IP addresses, no interface configured with that name")]
    UnknownInterface(String),

    /// The OS reports a different address than the one we configured
    #[error("validating network interface '{interface}' IP addresses, expected: '{expected}', actual: '{actual}'")]
    AddressMismatch {
        interface: String,
        expected: String,
        actual: String,
    },

    /// Resolver configuration does not contain any desired server
    #[error("DNS resolver configuration does not contain any of the desired servers: {0:?}")]
    DnsNotConfigured(Vec<String>),

    /// The interface has no address to report yet
    #[error("no IP address found for interface '{0}'")]
    NoAddress(String),

    /// Convergence phases were entered out of order
    #[error("invalid convergence transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Address broadcasting failed or was abandoned
    #[error("broadcasting addresses: {0}")]
    Broadcast(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lower-level failure with the step that was being attempted
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PlatformError>,
    },
}

impl PlatformError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PlatformError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Standard error of the failed command, if this error came from one
    pub fn stderr(&self) -> Option<&str> {
        match self {
            PlatformError::CommandFailed { stderr, .. } => Some(stderr),
            PlatformError::Context { source, .. } => source.stderr(),
            PlatformError::RetriesExhausted { source, .. } => source.stderr(),
            _ => None,
        }
    }
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Attach a description of the step being attempted to an error
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| PlatformError::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| PlatformError::Context {
            context: f(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::AddressMismatch {
            interface: "eth0".to_string(),
            expected: "10.0.0.5".to_string(),
            actual: "10.0.0.9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "validating network interface 'eth0' IP addresses, expected: '10.0.0.5', actual: '10.0.0.9'"
        );

        let err = PlatformError::InterfaceNotFound {
            network: "default".to_string(),
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
        };
        assert!(err.to_string().contains("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_context_wraps_source() {
        let result: Result<()> = Err(PlatformError::Parse("bad line".to_string()));
        let err = result.context("Getting partitions").unwrap_err();

        assert_eq!(err.to_string(), "Getting partitions: parsing output: bad line");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_stderr_through_wrappers() {
        let inner = PlatformError::CommandFailed {
            command: "wipefs -a /dev/sdb1".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "device busy".to_string(),
        };
        let err = PlatformError::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert_eq!(err.stderr(), Some("device busy"));
        assert!(err.to_string().starts_with("giving up after 3 attempt(s)"));
    }
}
