//! # Error Handling
//!
//! Error types for secret storage and envelope encryption, defined with
//! `thiserror`. Every backend maps its transport-specific failures onto this
//! taxonomy so callers can match on the condition rather than the provider.
//!
//! Messages never carry secret payloads or key material.

use thiserror::Error;

/// Result type for strongbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving backends, storing secrets or
/// encrypting data.
#[derive(Error, Debug)]
pub enum Error {
    /// A required configuration field is missing or invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A driver was requested that was never registered.
    #[error("Driver not found: {driver}")]
    DriverNotFound { driver: String },

    /// The secret service could not be reached or rejected our credentials.
    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The backend has no secret with this name.
    #[error("Secret not found: {name}")]
    SecretNotFound { name: String },

    /// The secret exists but the requested version does not.
    #[error("Version {version} of secret '{name}' not found")]
    VersionNotFound { name: String, version: u64 },

    /// AEAD authentication failed. No plaintext is ever returned alongside
    /// this error.
    #[error("Decryption failed: {message}")]
    DecryptionFailed { message: String },

    /// A secret version resource name did not end in a version number.
    #[error("Invalid resource name: {name}")]
    InvalidResourceName { name: String },

    /// Key material cannot be used with the cipher.
    #[error("Invalid key '{name}': {reason}")]
    InvalidKey { name: String, reason: String },

    /// The key provider reports a latest version older than the one a
    /// capsule was sealed under.
    #[error(
        "Refusing to downgrade key '{name}' from version {capsule_version} to {latest_version}"
    )]
    KeyDowngrade { name: String, capsule_version: u64, latest_version: u64 },

    /// Any other failure reported by a secret service.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a driver not found error.
    pub fn driver_not_found(driver: impl std::fmt::Display) -> Self {
        Self::DriverNotFound { driver: driver.to_string() }
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable { message: message.into() }
    }

    /// Create a secret not found error.
    pub fn secret_not_found(name: impl Into<String>) -> Self {
        Self::SecretNotFound { name: name.into() }
    }

    /// Create a version not found error.
    pub fn version_not_found(name: impl Into<String>, version: u64) -> Self {
        Self::VersionNotFound { name: name.into(), version }
    }

    /// Create a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed { message: message.into() }
    }

    /// Create an invalid resource name error.
    pub fn invalid_resource_name(name: impl Into<String>) -> Self {
        Self::InvalidResourceName { name: name.into() }
    }

    /// Create an invalid key error.
    pub fn invalid_key(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { name: name.into(), reason: reason.into() }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for lookups that found nothing (secret or version).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SecretNotFound { .. } | Self::VersionNotFound { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config(format!("Configuration loading failed: {}", error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let reasons: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, reasons.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        if message.is_empty() {
            Self::config(format!("Validation failed: {}", errors))
        } else {
            Self::config(format!("Validation failed: {}", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = Error::secret_not_found("db-key");
        assert!(matches!(err, Error::SecretNotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: db-key");

        let err = Error::version_not_found("db-key", 4);
        assert_eq!(err.to_string(), "Version 4 of secret 'db-key' not found");

        let err = Error::driver_not_found("hcp_vault");
        assert_eq!(err.to_string(), "Driver not found: hcp_vault");
    }

    #[test]
    fn test_not_found_is_distinct_from_decryption() {
        assert!(Error::secret_not_found("a").is_not_found());
        assert!(Error::version_not_found("a", 1).is_not_found());
        assert!(!Error::decryption_failed("tag mismatch").is_not_found());
        assert!(!Error::backend_unavailable("timeout").is_not_found());
    }

    #[test]
    fn test_downgrade_display() {
        let err =
            Error::KeyDowngrade { name: "db-key".into(), capsule_version: 3, latest_version: 2 };
        assert!(err.to_string().contains("from version 3 to 2"));
    }

    #[test]
    fn test_validation_errors_become_config_errors() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("url", validator::ValidationError::new("length"));

        let err = Error::from(errors);
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("url: length"));
    }
}
