//! Circuit model and content hashing.
//!
//! A [`Circuit`] is the artifact produced by every construction step and by
//! the composer. The pipeline core only reads its dimensions, renames its free
//! symbols and splices instructions; everything else about it belongs to the
//! templates that build it.
//!
//! Content identity is provided by [`content_hash`], which walks a fallback
//! chain of encodings and always produces a SHA-256 digest.

pub mod hash;
pub mod types;

pub use hash::{content_hash, ContentHash, Dimensions, EncodeError, Fingerprint, HashMethod};
pub use types::{Circuit, Instruction, Param, SEPARATOR_OP};
