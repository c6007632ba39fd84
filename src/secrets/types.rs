//! Secret value types.
//!
//! [`Secret`] is the unit every backend reads and writes. [`SecretString`]
//! wraps credentials loaded from configuration so they never end up in logs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One version of a named secret.
///
/// Versions start at 1 and increase strictly per name within a backend.
/// Versions are append-only: a stored version is never rewritten.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub version: u64,
    pub payload: Vec<u8>,
}

impl Secret {
    pub fn new(name: impl Into<String>, version: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), version, payload: payload.into() }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("payload", &format!("[{} bytes REDACTED]", self.payload.len()))
            .finish()
    }
}

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// Used for tokens, client secrets and the cache pepper key. Memory is zeroed
/// on drop; the value is only reachable through [`SecretString::expose_secret`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SecretString(value))
    }
}

impl SecretString {
    /// Creates a new SecretString from a string value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns the length of the secret without exposing the value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_hides_payload() {
        let secret = Secret::new("db-key", 2, b"hunter2".to_vec());
        let debug_output = format!("{:?}", secret);

        assert!(debug_output.contains("db-key"));
        assert!(debug_output.contains("7 bytes REDACTED"));
        assert!(!debug_output.contains("hunter2"));
    }

    #[test]
    fn test_secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("super-secret-value");

        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_secret_string_serialization_redacts() {
        let secret = SecretString::new("super-secret-value");
        let json = serde_json::to_string(&secret).unwrap();

        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_secret_string_deserialization_accepts_values() {
        let secret: SecretString = serde_json::from_str("\"my-actual-secret\"").unwrap();
        assert_eq!(secret.expose_secret(), "my-actual-secret");
        assert_eq!(secret.len(), 16);
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_secret_string_not_in_struct_json() {
        #[derive(Serialize)]
        struct TokenAuth {
            strategy: String,
            token: SecretString,
        }

        let auth = TokenAuth { strategy: "token".to_string(), token: SecretString::new("s.abc") };
        let json = serde_json::to_string(&auth).unwrap();

        assert!(json.contains("token"));
        assert!(json.contains("[REDACTED]"));
        assert!(!json.contains("s.abc"));
    }
}
