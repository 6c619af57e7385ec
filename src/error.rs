//! use cloudpki::error::CloudPkiError;

use thiserror::Error;

/// Represents errors that can occur while building, signing or encoding certificates.
///
/// Validation variants are produced before any remote call is made; only
/// [`CloudPkiError::RemoteSigningError`] originates from the key-management service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloudPkiError {
    /// A profile or constraints document is malformed or misses a required field.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A key-usage token does not name a known key usage bit.
    #[error("Invalid keyUsage: {0}")]
    UnknownUsageToken(String),

    /// An extended-key-usage token does not name a known purpose.
    #[error("Invalid extKeyUsage: {0}")]
    UnknownExtendedUsageToken(String),

    /// The operation does not support this kind of public key.
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// A chained certificate was requested but no issuer certificate could be resolved.
    #[error("Missing issuer certificate: {0}")]
    MissingIssuerCertificate(String),

    /// The remote key-management service failed to produce a public key or signature.
    #[error("Remote signing error: {message}")]
    RemoteSigningError {
        message: String,
        /// Whether the failure is worth retrying (timeouts, throttling, server errors).
        transient: bool,
    },

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CloudPkiError>;

impl CloudPkiError {
    pub fn remote(message: impl Into<String>) -> Self {
        CloudPkiError::RemoteSigningError {
            message: message.into(),
            transient: false,
        }
    }

    pub fn remote_transient(message: impl Into<String>) -> Self {
        CloudPkiError::RemoteSigningError {
            message: message.into(),
            transient: true,
        }
    }

    /// Returns `true` for remote failures that a bounded retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudPkiError::RemoteSigningError {
                transient: true,
                ..
            }
        )
    }
}

impl From<der::Error> for CloudPkiError {
    /// Converts a `der::Error` into a `CloudPkiError`.
    fn from(err: der::Error) -> Self {
        CloudPkiError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for CloudPkiError {
    fn from(err: rsa::Error) -> Self {
        CloudPkiError::InvalidInput(format!("RSA error: {err}"))
    }
}

impl From<rsa::pkcs1::Error> for CloudPkiError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        CloudPkiError::DecodingError(format!("PKCS#1 error: {err}"))
    }
}

impl From<pkcs8::spki::Error> for CloudPkiError {
    fn from(err: pkcs8::spki::Error) -> Self {
        CloudPkiError::DecodingError(format!("SPKI error: {err}"))
    }
}

impl From<pem::PemError> for CloudPkiError {
    fn from(err: pem::PemError) -> Self {
        CloudPkiError::DecodingError(format!("PEM error: {err}"))
    }
}

impl From<ssh_key::Error> for CloudPkiError {
    fn from(err: ssh_key::Error) -> Self {
        CloudPkiError::EncodingError(format!("SSH error: {err}"))
    }
}

impl From<serde_yaml::Error> for CloudPkiError {
    fn from(err: serde_yaml::Error) -> Self {
        CloudPkiError::ConfigurationError(err.to_string())
    }
}
