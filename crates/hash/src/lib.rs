//! Content fingerprinting for hoard.
//!
//! Every tracked file gets three digests computed in one read pass:
//!
//! - a **strong** SHA-512 of `prefix || content`,
//! - a **fast** XXH64 of `prefix || content`,
//! - the **multipart checksum** an S3-compatible store will report for
//!   `content` ([`MultipartChecksum`]).
//!
//! The prefix ([`namespace_prefix`]) binds the repository name and file length
//! into the first two. All three are folded into the object's storage key by
//! [`derive_key`].

mod bundle;
pub mod error;
mod key;
mod multipart;

pub use crate::bundle::{Digests, HashBundle, STRONG_LEN, fast_hash, namespace_prefix};
pub use crate::key::{KEY_MATERIAL_LEN, checksum_bytes, derive_key};
pub use crate::multipart::{DEFAULT_PART_SIZE, MultipartChecksum};
