//! Canonical CBOR encoding and the SHA-256 digest that addresses tickets.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "sha256:";

/// Encode `value` as self-described CBOR with map keys in canonical order.
///
/// The value goes through `serde_cbor::Value` first; its maps are ordered, so
/// equal maps encode to equal bytes regardless of insertion order.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    let value = serde_cbor::value::to_value(value)?;
    let mut buf = Vec::with_capacity(256);
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// SHA-256 digest, rendered as `sha256:<hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(bytes));
        Hash(out)
    }

    pub fn to_hex(&self) -> String {
        format!("{PREFIX}{}", hex::encode(self.0))
    }

    /// First twelve hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    pub fn from_hex_str(s: &str) -> Result<Self, HashParseError> {
        let digits = s.strip_prefix(PREFIX).ok_or(HashParseError::MissingPrefix)?;
        let mut buf = [0u8; 32];
        hex::decode_to_slice(digits, &mut buf)?;
        Ok(Hash(buf))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Hash::from_hex_str(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    #[error("digest must start with '{PREFIX}'")]
    MissingPrefix,
    #[error("digest is not 64 hex digits: {0}")]
    Hex(#[from] hex::FromHexError),
}
