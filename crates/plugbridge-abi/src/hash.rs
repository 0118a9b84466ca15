//! Interface hashing.
//!
//! The registry feeds its normalized schema through an [`InterfaceHasher`];
//! both sides exchange the resulting [`InterfaceHash`] when a channel opens
//! so a host built against one schema never talks to a core built from
//! another.
//!
//! Every item is written as a length-prefixed token so `("ab", "c")` and
//! `("a", "bc")` hash differently.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// A 256-bit interface hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHash([u8; 32]);

impl InterfaceHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex digits, enough to tell builds apart in logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for InterfaceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceHash({})", self.short())
    }
}

impl fmt::Display for InterfaceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHashError;

impl fmt::Display for ParseHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected 64 hex digits")
    }
}

impl std::error::Error for ParseHashError {}

impl FromStr for InterfaceHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ParseHashError);
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ParseHashError)?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for InterfaceHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for InterfaceHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Streaming builder for interface hashes.
pub struct InterfaceHasher {
    hasher: Sha256,
}

impl InterfaceHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Write a structural tag such as `"record"` or `"list"`.
    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.hasher.update([0xFF]);
        self.str(tag)
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.hasher.update((s.len() as u64).to_le_bytes());
        self.hasher.update(s.as_bytes());
        self
    }

    pub fn u32(&mut self, n: u32) -> &mut Self {
        self.hasher.update(n.to_le_bytes());
        self
    }

    pub fn finish(self) -> InterfaceHash {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        InterfaceHash(bytes)
    }
}

impl Default for InterfaceHasher {
    fn default() -> Self {
        Self::new()
    }
}
