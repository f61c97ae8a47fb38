//! Drift detection: a content hash cached on each written object, plus a
//! structural diff used for debug logging.

pub mod diff;
pub mod hash;

pub use hash::{HASH_ANNOTATION, HashError, compute_hash, equal, stored_hash};
