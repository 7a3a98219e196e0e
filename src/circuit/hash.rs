//! Content hashing with a fallback chain.
//!
//! The digest input is produced by the first encoding that succeeds:
//!
//! 1. canonical JSON of the full circuit
//! 2. YAML of the full circuit
//! 3. a metadata summary (dimensions plus the instruction listing)
//! 4. an emergency string built only from dimensions
//!
//! The last step cannot fail, so [`content_hash`] always returns a digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use super::types::{Circuit, Param};

/// Errors from a single encoding attempt.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Parameter {index} of '{op}' is not finite")]
    NonFinite { op: String, index: usize },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML encoding failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metadata unavailable: {0}")]
    Metadata(String),
}

/// Which step of the fallback chain produced the digest input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMethod {
    Canonical,
    Fallback,
    Metadata,
    Emergency,
}

impl HashMethod {
    /// Returns true if the digest no longer reflects the full content.
    pub fn is_degraded(&self) -> bool {
        matches!(self, HashMethod::Metadata | HashMethod::Emergency)
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashMethod::Canonical => "canonical",
            HashMethod::Fallback => "fallback",
            HashMethod::Metadata => "metadata",
            HashMethod::Emergency => "emergency",
        };
        write!(f, "{}", name)
    }
}

/// Dimensions used by the emergency encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: usize,
    pub depth: usize,
    pub size: usize,
}

/// Anything that can be content-hashed.
pub trait Fingerprint {
    /// Primary encoding.
    fn canonical_bytes(&self) -> Result<Vec<u8>, EncodeError>;

    /// Secondary encoding, tried when the primary one fails.
    fn fallback_bytes(&self) -> Result<Vec<u8>, EncodeError>;

    /// Lossy summary, tried when both full encodings fail.
    fn metadata_summary(&self) -> Result<String, EncodeError>;

    /// Dimensions for the emergency encoding. Must not fail.
    fn dimensions(&self) -> Dimensions;
}

impl Fingerprint for Circuit {
    fn canonical_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        // serde_json writes NaN and infinities as null, which would collide.
        for instruction in self.instructions() {
            for (index, param) in instruction.params.iter().enumerate() {
                if let Param::Value(v) = param {
                    if !v.is_finite() {
                        return Err(EncodeError::NonFinite {
                            op: instruction.op.clone(),
                            index,
                        });
                    }
                }
            }
        }
        Ok(serde_json::to_vec(self)?)
    }

    fn fallback_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    fn metadata_summary(&self) -> Result<String, EncodeError> {
        let listing: Vec<String> = self
            .instructions()
            .iter()
            .map(|i| format!("{}{:?}{:?}", i.op, i.targets, i.secondary))
            .collect();
        Ok(format!(
            "{}_{}_{}_{}",
            self.width(),
            self.depth(),
            self.size(),
            listing.join(";")
        ))
    }

    fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            depth: self.depth(),
            size: self.size(),
        }
    }
}

/// A SHA-256 content digest and the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    /// Lowercase hex, 64 characters.
    pub digest: String,
    pub method: HashMethod,
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Computes the content hash of `item`. Never fails.
pub fn content_hash<F: Fingerprint + ?Sized>(item: &F) -> ContentHash {
    let canonical_err = match item.canonical_bytes() {
        Ok(bytes) => {
            return ContentHash {
                digest: sha256_hex(&bytes),
                method: HashMethod::Canonical,
            }
        }
        Err(e) => e,
    };

    let fallback_err = match item.fallback_bytes() {
        Ok(bytes) => {
            warn!(error = %canonical_err, "Canonical encoding failed, hashed fallback encoding");
            return ContentHash {
                digest: sha256_hex(&bytes),
                method: HashMethod::Fallback,
            };
        }
        Err(e) => e,
    };

    match item.metadata_summary() {
        Ok(summary) => {
            warn!(
                canonical_error = %canonical_err,
                fallback_error = %fallback_err,
                "Full encodings failed, hashed metadata summary"
            );
            ContentHash {
                digest: sha256_hex(summary.as_bytes()),
                method: HashMethod::Metadata,
            }
        }
        Err(metadata_err) => {
            let dims = item.dimensions();
            warn!(
                canonical_error = %canonical_err,
                fallback_error = %fallback_err,
                metadata_error = %metadata_err,
                width = dims.width,
                depth = dims.depth,
                size = dims.size,
                "All encodings failed, using emergency hash"
            );
            let emergency = format!("emergency_{}_{}_{}", dims.width, dims.depth, dims.size);
            ContentHash {
                digest: sha256_hex(emergency.as_bytes()),
                method: HashMethod::Emergency,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Instruction;

    fn sample(angle: f64) -> Circuit {
        let mut c = Circuit::new("sample", 2, 0);
        c.push(Instruction::new("h", vec![0])).unwrap();
        c.push(Instruction::new("rz", vec![1]).with_params(vec![Param::Value(angle)]))
            .unwrap();
        c
    }

    /// Fails every encoding except the ones enabled.
    struct Broken {
        metadata: bool,
    }

    impl Fingerprint for Broken {
        fn canonical_bytes(&self) -> Result<Vec<u8>, EncodeError> {
            Err(EncodeError::Metadata("no canonical form".to_string()))
        }
        fn fallback_bytes(&self) -> Result<Vec<u8>, EncodeError> {
            Err(EncodeError::Metadata("no fallback form".to_string()))
        }
        fn metadata_summary(&self) -> Result<String, EncodeError> {
            if self.metadata {
                Ok("3_4_5_x".to_string())
            } else {
                Err(EncodeError::Metadata("no metadata".to_string()))
            }
        }
        fn dimensions(&self) -> Dimensions {
            Dimensions {
                width: 3,
                depth: 4,
                size: 5,
            }
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = content_hash(&sample(0.5));
        let b = content_hash(&sample(0.5));
        assert_eq!(a, b);
        assert_eq!(a.method, HashMethod::Canonical);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_hash_differs_for_different_circuits() {
        let a = content_hash(&sample(0.5));
        let b = content_hash(&sample(0.25));
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_non_finite_falls_back_to_yaml() {
        let hash = content_hash(&sample(f64::NAN));
        assert_eq!(hash.method, HashMethod::Fallback);
        assert_ne!(hash.digest, content_hash(&sample(f64::INFINITY)).digest);
    }

    #[test]
    fn test_metadata_fallback() {
        let hash = content_hash(&Broken { metadata: true });
        assert_eq!(hash.method, HashMethod::Metadata);
        assert_eq!(hash.digest, sha256_hex(b"3_4_5_x"));
    }

    #[test]
    fn test_emergency_hash() {
        let hash = content_hash(&Broken { metadata: false });
        assert_eq!(hash.method, HashMethod::Emergency);
        assert!(hash.method.is_degraded());
        assert_eq!(hash.digest, sha256_hex(b"emergency_3_4_5"));
    }
}
