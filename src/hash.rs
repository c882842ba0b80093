//! Hash utilities for consistency files with selectable algorithms (SHA-256 and SHA-1).
//! The hash kind is chosen per workflow and recorded in the consistency-file header.
//! Defaults to SHA-256.

use std::{fmt::Display, hash::Hash, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1::Digest;

/// Supported hash algorithms for file content hashes (selector only, no data
/// attached). Defaults to SHA-256.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Sha256,
    Sha1,
}

impl HashKind {
    /// Byte length of the hash output.
    pub const fn size(&self) -> usize {
        match self {
            HashKind::Sha256 => 32,
            HashKind::Sha1 => 20,
        }
    }

    /// Hex string length of the hash output.
    pub const fn hex_len(&self) -> usize {
        match self {
            HashKind::Sha256 => 64,
            HashKind::Sha1 => 40,
        }
    }

    /// Lowercase name of the hash algorithm.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha256 => "sha256",
            HashKind::Sha1 => "sha1",
        }
    }
}

impl Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashKind::Sha256),
            "sha1" => Ok(HashKind::Sha1),
            _ => Err(format!("Invalid hash kind: {s}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Concrete content hash carrying the bytes for the selected algorithm.
/// Supports conversion to/from hex strings and byte slices.
pub enum ContentHash {
    Sha256([u8; 32]),
    Sha1([u8; 20]),
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            ContentHash::Sha256(bytes) => bytes.as_slice(),
            ContentHash::Sha1(bytes) => bytes.as_slice(),
        }
    }
}

/// Parse hex (64 for SHA-256, 40 for SHA-1) into `ContentHash`.
impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            64 => {
                let mut h = [0u8; 32];
                let bytes = hex::decode(s).map_err(|e| e.to_string())?;
                h.copy_from_slice(bytes.as_slice());
                Ok(ContentHash::Sha256(h))
            }
            40 => {
                let mut h = [0u8; 20];
                let bytes = hex::decode(s).map_err(|e| e.to_string())?;
                h.copy_from_slice(bytes.as_slice());
                Ok(ContentHash::Sha1(h))
            }
            _ => Err("Invalid hash length".to_string()),
        }
    }
}

impl ContentHash {
    /// Compute the hash of `data` using the given algorithm.
    pub fn of(kind: HashKind, data: &[u8]) -> ContentHash {
        match kind {
            HashKind::Sha256 => {
                let h = sha2::Sha256::digest(data);
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(h.as_ref());
                ContentHash::Sha256(bytes)
            }
            HashKind::Sha1 => {
                let h = sha1::Sha1::digest(data);
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(h.as_ref());
                ContentHash::Sha1(bytes)
            }
        }
    }

    /// Return the hash kind for this value.
    pub fn kind(&self) -> HashKind {
        match self {
            ContentHash::Sha256(_) => HashKind::Sha256,
            ContentHash::Sha1(_) => HashKind::Sha1,
        }
    }

    /// Hex form of the hash.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_ref())
    }
}
