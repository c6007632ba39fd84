//! Self-describing ciphertext envelope.
//!
//! A [`Capsule`] carries the sealed bytes together with the name and version
//! of the key that sealed them, so it can be opened (or re-encrypted) long
//! after the key has been rotated. Its persisted form is a JSON object:
//!
//! ```json
//! {"Data": "<base64>", "KeyName": "db-key", "KeyVersion": 3}
//! ```
//!
//! The same shape is written to and read from Postgres `TEXT`, `JSON` and
//! `JSONB` columns. Binding into a JSON column needs an explicit cast
//! (`$1::jsonb`) since the value is encoded as text.

use super::cipher::MIN_SEALED_LEN;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use sqlx::{Decode, Encode, Postgres, Type, ValueRef};

/// Ciphertext plus the identity of the key version that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
    /// `nonce ‖ ciphertext ‖ tag`
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,

    #[serde(rename = "KeyName")]
    pub key_name: String,

    #[serde(rename = "KeyVersion")]
    pub key_version: u64,
}

impl Capsule {
    pub fn new(data: Vec<u8>, key_name: impl Into<String>, key_version: u64) -> Self {
        Self { data, key_name: key_name.into(), key_version }
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the persisted JSON form.
    pub fn from_json(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }

    /// True when `data` is long enough to hold a nonce and a tag.
    ///
    /// A well-formed capsule can still fail to open; this only rules out
    /// values that cannot possibly be valid.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() >= MIN_SEALED_LEN
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// SQLx trait implementations for database compatibility
impl Type<Postgres> for Capsule {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty) || <Json<Capsule> as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for Capsule {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
        let json = self.to_json()?;
        <&str as Encode<'q, Postgres>>::encode_by_ref(&json.as_str(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for Capsule {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let is_json = <Json<Capsule> as Type<Postgres>>::compatible(&value.type_info());
        if is_json {
            let Json(capsule) = <Json<Capsule> as Decode<'r, Postgres>>::decode(value)?;
            return Ok(capsule);
        }

        let text = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(Capsule::from_json(text)?)
    }
}
