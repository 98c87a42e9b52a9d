//! miniLock IDs: a Curve25519 public key plus a 1-byte BLAKE2s checksum, base58-encoded

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use blake2::digest::consts::U1;
use blake2::{Blake2s, Digest};
use minilock_core::MiniLockError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::base58;
use crate::PUBLIC_KEY_SIZE;

/// Length of the binary ID: public key followed by its checksum byte
pub const ID_BINARY_SIZE: usize = PUBLIC_KEY_SIZE + 1;

/// A public miniLock identity.
///
/// Two IDs are equal when their binary forms match.
#[derive(Clone)]
pub struct Id {
    public_key: [u8; PUBLIC_KEY_SIZE],
    checksum: u8,
    encoded: String,
}

impl Id {
    /// Build an ID from a raw public key, computing a fresh checksum.
    pub fn from_public_key(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let checksum = public_key_checksum(&public_key);
        let mut binary = [0u8; ID_BINARY_SIZE];
        binary[..PUBLIC_KEY_SIZE].copy_from_slice(&public_key);
        binary[PUBLIC_KEY_SIZE] = checksum;

        Self {
            public_key,
            checksum,
            encoded: base58::encode(&binary),
        }
    }

    /// Parse a base58 ID. Returns `None` on bad characters, a decoded length
    /// other than 33 bytes, or a checksum mismatch.
    pub fn from_base58(s: &str) -> Option<Self> {
        let binary = base58::decode(s)?;
        if binary.len() != ID_BINARY_SIZE {
            return None;
        }

        let (key, check) = binary.split_at(PUBLIC_KEY_SIZE);
        let public_key: [u8; PUBLIC_KEY_SIZE] = key.try_into().ok()?;
        if public_key_checksum(&public_key) != check[0] {
            return None;
        }

        Some(Self {
            public_key,
            checksum: check[0],
            encoded: s.to_string(),
        })
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public_key
    }

    /// The 33-byte binary form (public key || checksum).
    pub fn to_binary(&self) -> [u8; ID_BINARY_SIZE] {
        let mut binary = [0u8; ID_BINARY_SIZE];
        binary[..PUBLIC_KEY_SIZE].copy_from_slice(&self.public_key);
        binary[PUBLIC_KEY_SIZE] = self.checksum;
        binary
    }

    pub fn as_base58(&self) -> &str {
        &self.encoded
    }
}

/// BLAKE2s with a 1-byte digest length parameter (not a truncated BLAKE2s-256).
fn public_key_checksum(public_key: &[u8; PUBLIC_KEY_SIZE]) -> u8 {
    Blake2s::<U1>::digest(public_key)[0]
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key && self.checksum == other.checksum
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.public_key.hash(state);
        self.checksum.hash(state);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.encoded)
    }
}

impl FromStr for Id {
    type Err = MiniLockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_base58(s).ok_or_else(|| MiniLockError::InvalidId(s.to_string()))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Id::from_base58(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid miniLock ID: {s}")))
    }
}
