//! Object key validation.
//!
//! Keys end up as file names in [`LocalBackend`](crate::backend::LocalBackend)
//! and as URL path segments in S3, so anything that could escape the store
//! root is rejected.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validates an object key and returns it as a relative path.
///
/// Keys may contain `/` separators; `.` components and repeated separators are
/// dropped. Null bytes, absolute keys and any `..` component are rejected
/// outright, as is a key that resolves to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use hoard_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("KBiWYVLx2EWhD6YoPcD9vviErQIBc17P").is_ok());
/// assert!(validate_key("repo/objects/abc").is_ok());
/// // Invalid keys
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/../b").is_err());
/// assert!(validate_key("/absolute").is_err());
/// assert!(validate_key("a\0b").is_err());
/// assert!(validate_key("").is_err());
/// // Keys get normalised
/// assert_eq!(validate_key("./a//b/").unwrap(), Path::new("a/b"));
/// ```
pub fn validate(key: &str) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidKey(key.to_string());
    if key.contains('\0') {
        exn::bail!(invalid());
    }
    let mut components = Vec::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(s) => components.push(s),
            Component::CurDir => {},
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => exn::bail!(invalid()),
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.into_iter().collect()),
    }
}
