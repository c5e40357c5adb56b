//! Single-pass fingerprinting of file content.

use crate::error::{ErrorKind, Result};
use crate::multipart::MultipartChecksum;
use sha2::{Digest, Sha512};
use std::io::{self, Read, Result as IoResult, Write};
use tracing::instrument;
use xxhash_rust::xxh64::Xxh64;

/// Length in bytes of the strong (SHA-512) digest.
pub const STRONG_LEN: usize = 64;

const XXH64_SEED: u64 = 0;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// The three digests produced by one [`HashBundle`] pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digests {
    /// SHA-512 of `prefix || content`.
    pub strong: [u8; STRONG_LEN],
    /// XXH64 of `prefix || content`.
    pub fast: u64,
    /// Object-store checksum of `content` alone.
    pub checksum: String,
}

/// Build the namespacing prefix `namespace || ' ' || base36(len) || 0x00`.
///
/// Binding the repository name and the declared length into the strong and
/// fast digests keeps identical content in different repositories apart.
///
/// ```
/// use hoard_hash::namespace_prefix;
///
/// assert_eq!(namespace_prefix("photos", 35), b"photos z\0");
/// ```
pub fn namespace_prefix(namespace: &str, len: u64) -> Vec<u8> {
    let digits = base36(len);
    let mut prefix = Vec::with_capacity(namespace.len() + digits.len() + 2);
    prefix.extend_from_slice(namespace.as_bytes());
    prefix.push(b' ');
    prefix.extend_from_slice(&digits);
    prefix.push(0);
    prefix
}

fn base36(mut value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![b'0'];
    }
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits
}

/// Fans one read pass out to SHA-512, XXH64 and [`MultipartChecksum`].
///
/// The prefix only reaches the first two; the multipart checksum has to match
/// what the object store computes over the raw bytes it receives. A bundle can
/// be reused across files; every [`hash()`](Self::hash) starts from a clean
/// state.
pub struct HashBundle {
    strong: Sha512,
    fast: Xxh64,
    checksum: MultipartChecksum,
}

impl HashBundle {
    pub fn new(part_size: u64) -> Self {
        Self {
            strong: Sha512::new(),
            fast: Xxh64::new(XXH64_SEED),
            checksum: MultipartChecksum::new(part_size),
        }
    }

    /// Hash `prefix || reader` (strong + fast) and `reader` (checksum).
    ///
    /// Only fails when the reader does.
    #[instrument(level = "trace", skip_all, fields(prefix_len = prefix.len(), bytes = tracing::field::Empty))]
    pub fn hash<R: Read>(&mut self, prefix: &[u8], mut reader: R) -> Result<Digests> {
        self.reset();
        self.strong.update(prefix);
        self.fast.update(prefix);
        let copied = match io::copy(&mut reader, self) {
            Ok(copied) => copied,
            Err(err) => {
                self.reset();
                exn::bail!(ErrorKind::Io(err));
            },
        };
        tracing::Span::current().record("bytes", copied);
        let mut strong = [0u8; STRONG_LEN];
        strong.copy_from_slice(&self.strong.finalize_reset());
        let fast = self.fast.digest();
        self.fast.reset(XXH64_SEED);
        Ok(Digests {
            strong,
            fast,
            checksum: self.checksum.sum(),
        })
    }

    fn reset(&mut self) {
        Digest::reset(&mut self.strong);
        self.fast.reset(XXH64_SEED);
        self.checksum.reset();
    }
}

impl Write for HashBundle {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.strong.update(buf);
        self.fast.update(buf);
        self.checksum.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// XXH64 of `prefix || reader` without the other two digests.
pub fn fast_hash<R: Read>(prefix: &[u8], mut reader: R) -> Result<u64> {
    let mut fast = Xxh64::new(XXH64_SEED);
    fast.update(prefix);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => fast.update(&buffer[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        }
    }
    Ok(fast.digest())
}
