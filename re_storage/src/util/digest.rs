use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use re_proto::build::bazel::remote::execution::v2::Digest;
use regex::Regex;
use sha2::{Digest as _, Sha256};

use crate::error::StoreError;

/// SHA-256 hash plus size of a blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DigestInfo {
    pub hash: [u8; 32],
    pub size_bytes: u64,
}

impl DigestInfo {
    pub const fn new(hash: [u8; 32], size_bytes: u64) -> Self {
        Self { hash, size_bytes }
    }

    /// Compute digest from bytes using SHA256
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);

        Self {
            hash: hasher.finalize().into(),
            size_bytes: data.len() as u64,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Position of this digest on a shard ring. The hash is already uniformly
    /// distributed, so its leading bytes are used directly.
    pub fn ring_position(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.hash[..8]);
        u64::from_be_bytes(prefix)
    }

    pub fn from_proto(digest: &Digest) -> Result<Self, StoreError> {
        let size_bytes = u64::try_from(digest.size_bytes).map_err(|_| {
            StoreError::InvalidDigest(format!(
                "negative size {} for {}",
                digest.size_bytes, digest.hash
            ))
        })?;
        Ok(Self {
            hash: parse_hash(&digest.hash)?,
            size_bytes,
        })
    }

    pub fn to_proto(&self) -> Digest {
        Digest {
            hash: self.hash_hex(),
            size_bytes: self.size_bytes as i64,
        }
    }
}

impl fmt::Display for DigestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash_hex(), self.size_bytes)
    }
}

impl fmt::Debug for DigestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DigestInfo({self})")
    }
}

impl FromStr for DigestInfo {
    type Err = StoreError;

    fn from_str(digest: &str) -> Result<Self, StoreError> {
        static DIGEST_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new("^([0-9a-f]{64}):([0-9]+)$").expect("Failed to compile digest regex")
        });

        let matches = DIGEST_RE
            .captures(digest)
            .ok_or_else(|| StoreError::InvalidDigest(format!("format not valid: {digest}")))?;
        let size_bytes = matches[2].parse::<u64>().map_err(|_| {
            StoreError::InvalidDigest(format!("size {} could not be parsed", &matches[2]))
        })?;

        Ok(Self {
            hash: parse_hash(&matches[1])?,
            size_bytes,
        })
    }
}

fn parse_hash(hash: &str) -> Result<[u8; 32], StoreError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(hash, &mut out)
        .map_err(|e| StoreError::InvalidDigest(format!("hash {hash}: {e}")))?;
    Ok(out)
}

pub fn compute_digest(data: &[u8]) -> DigestInfo {
    DigestInfo::compute(data)
}

/// Rejects `data` unless it hashes to exactly `digest`.
pub fn verify_digest(data: &[u8], digest: &DigestInfo) -> Result<(), StoreError> {
    let computed = compute_digest(data);

    if computed != *digest {
        return Err(StoreError::DigestMismatch {
            expected: *digest,
            actual: computed,
        });
    }

    Ok(())
}
