//! Error types for the machine approver
//!
//! Only [`Error::Connect`] and [`Error::Config`] are fatal. Every other variant
//! is scoped to a single certificate request: it is logged against that
//! request and the request is left without a verdict.

use thiserror::Error;

/// Main error type for approver operations
#[derive(Debug, Error)]
pub enum Error {
    /// The initial event stream could not be obtained
    #[error("connect error: {message}")]
    Connect {
        /// Description of what failed
        message: String,
    },

    /// Request bytes are neither PEM nor a valid DER PKCS#10 structure
    #[error("decode error: {message}")]
    Decode {
        /// Description of what failed
        message: String,
    },

    /// The subject common name does not follow the instance naming pattern
    #[error("instance name not found in common name {common_name:?}")]
    IdentityNotFound {
        /// The common name that did not match
        common_name: String,
    },

    /// No compute instance matches the name
    #[error("no instance found with name {instance:?}")]
    NotFound {
        /// Instance name that was looked up
        instance: String,
    },

    /// More than one compute instance matches the name
    #[error("{count} instances found with name {instance:?}")]
    Ambiguous {
        /// Instance name that was looked up
        instance: String,
        /// Number of matching instances reported (at least two)
        count: usize,
    },

    /// Cloud API call failed (network, HTTP status, auth, malformed body)
    #[error("transport error: {message}")]
    Transport {
        /// Description of what failed
        message: String,
    },

    /// Writing the verdict to the Kubernetes API failed
    #[error("apply error for {request}: {message}")]
    Apply {
        /// Name of the certificate signing request
        request: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is invalid
        message: String,
    },
}

impl Error {
    /// Create a connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect {
            message: msg.into(),
        }
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create an identity-not-found error for the given common name
    pub fn identity_not_found(common_name: impl Into<String>) -> Self {
        Self::IdentityNotFound {
            common_name: common_name.into(),
        }
    }

    /// Create a not-found error for the given instance name
    pub fn not_found(instance: impl Into<String>) -> Self {
        Self::NotFound {
            instance: instance.into(),
        }
    }

    /// Create an ambiguity error for the given instance name
    pub fn ambiguous(instance: impl Into<String>, count: usize) -> Self {
        Self::Ambiguous {
            instance: instance.into(),
            count,
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Create an apply error for the given request
    pub fn apply(request: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Apply {
            request: request.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error must stop the process rather than a single request
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Config { .. })
    }

    /// Stable short name used as the `error_kind` log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Decode { .. } => "decode",
            Self::IdentityNotFound { .. } => "identity_not_found",
            Self::NotFound { .. } => "not_found",
            Self::Ambiguous { .. } => "ambiguous",
            Self::Transport { .. } => "transport",
            Self::Apply { .. } => "apply",
            Self::Config { .. } => "config",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::transport(e.to_string())
    }
}
