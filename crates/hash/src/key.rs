//! Storage key derivation.
//!
//! A storage key is `base64url(strong || le64(fast) || md5(checksum))`
//! without padding: 88 bytes of key material, 118 characters of key.

use crate::bundle::{Digests, STRONG_LEN};
use crate::error::{ErrorKind, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use exn::ResultExt;

const CHECKSUM_LEN: usize = 16;
/// Number of raw bytes encoded into a storage key.
pub const KEY_MATERIAL_LEN: usize = STRONG_LEN + 8 + CHECKSUM_LEN;

/// Decode the digest portion of a multipart checksum.
///
/// Only the first 32 characters are read, so any `-N` part-count suffix is
/// ignored.
///
/// ```
/// use hoard_hash::checksum_bytes;
///
/// let plain = checksum_bytes("23804ec967f48520697662a204f5fe11").unwrap();
/// let suffixed = checksum_bytes("23804ec967f48520697662a204f5fe11-222").unwrap();
/// assert_eq!(plain, suffixed);
/// assert!(checksum_bytes("ab").is_err());
/// ```
pub fn checksum_bytes(checksum: &str) -> Result<[u8; CHECKSUM_LEN]> {
    let invalid = || ErrorKind::InvalidChecksum(checksum.to_string());
    let Some(digest_hex) = checksum.as_bytes().get(..CHECKSUM_LEN * 2) else {
        exn::bail!(invalid());
    };
    let mut bytes = [0u8; CHECKSUM_LEN];
    hex::decode_to_slice(digest_hex, &mut bytes).or_raise(invalid)?;
    Ok(bytes)
}

/// Combine the three digests into one opaque, URL-safe storage key.
///
/// Fails only if `checksum` does not start with 32 hexadecimal characters.
pub fn derive_key(strong: &[u8; STRONG_LEN], fast: u64, checksum: &str) -> Result<String> {
    let mut material = [0u8; KEY_MATERIAL_LEN];
    material[..STRONG_LEN].copy_from_slice(strong);
    material[STRONG_LEN..STRONG_LEN + 8].copy_from_slice(&fast.to_le_bytes());
    material[STRONG_LEN + 8..].copy_from_slice(&checksum_bytes(checksum)?);
    Ok(URL_SAFE_NO_PAD.encode(material))
}

impl Digests {
    /// Storage key for these digests. See [`derive_key()`].
    pub fn storage_key(&self) -> Result<String> {
        derive_key(&self.strong, self.fast, &self.checksum)
    }
}
