//! Local prediction of an object store's multipart-upload checksum.
//!
//! S3-compatible stores report the plain MD5 of an object uploaded as a single
//! part. For an object uploaded in `N > 1` parts they report the MD5 of the
//! concatenated per-part MD5 digests, suffixed with `-N`. Computing the same
//! value locally lets an upload be verified without downloading it again.

use md5::{Digest, Md5};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{Result as IoResult, Write};

/// Part size used when nothing else is configured (100 MiB).
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;

const MD5_LEN: usize = 16;

/// Streaming multipart checksum with a fixed part size.
///
/// Feed bytes with [`update()`](Self::update) (or through [`Write`]), then
/// call [`sum()`](Self::sum) exactly once per stream. `sum()` finalizes the
/// state and resets it, so the same value can be reused for the next stream
/// without reallocating.
///
/// # Examples
///
/// ```
/// use hoard_hash::MultipartChecksum;
///
/// let mut checksum = MultipartChecksum::new(4);
/// checksum.update(b"abcd");
/// // Exactly one part: plain MD5, no part-count suffix.
/// assert_eq!(checksum.sum(), "e2fc714c4727ee9395f324cd2e7f331f");
///
/// checksum.update(b"abcde");
/// assert!(checksum.sum().ends_with("-2"));
/// ```
#[derive(Clone)]
pub struct MultipartChecksum {
    part_size: u64,
    current: Md5,
    current_len: u64,
    parts: u64,
    outer: Md5,
    last_part: Option<[u8; MD5_LEN]>,
}

impl MultipartChecksum {
    /// Create a checksum state for parts of `part_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `part_size` is zero.
    pub fn new(part_size: u64) -> Self {
        assert!(part_size > 0, "multipart checksum part size must be non-zero");
        Self {
            part_size,
            current: Md5::new(),
            current_len: 0,
            parts: 0,
            outer: Md5::new(),
            last_part: None,
        }
    }

    #[inline]
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts completed so far (a trailing partial part is not
    /// counted until [`sum()`](Self::sum)).
    #[inline]
    pub fn parts(&self) -> u64 {
        self.parts
    }

    /// Append `data` to the logical stream. Never fails.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.part_size - self.current_len;
            let take = usize::try_from(room).map_or(data.len(), |room| room.min(data.len()));
            let (head, tail) = data.split_at(take);
            self.current.update(head);
            self.current_len += take as u64;
            data = tail;
            if self.current_len == self.part_size {
                self.finish_part();
            }
        }
    }

    /// Finalize and return the checksum, then reset for the next stream.
    ///
    /// - empty stream: MD5 of nothing, unsuffixed
    /// - a single part (including exactly `part_size` bytes): MD5 of the
    ///   content, unsuffixed
    /// - otherwise: `hex(md5(part digests)) + "-" + part count`
    pub fn sum(&mut self) -> String {
        let checksum = self.finalize();
        self.reset();
        checksum
    }

    /// Discard all state, keeping the part size.
    pub fn reset(&mut self) {
        self.current.reset();
        self.current_len = 0;
        self.parts = 0;
        self.outer.reset();
        self.last_part = None;
    }

    fn finish_part(&mut self) {
        let digest = take_digest(&mut self.current);
        self.current_len = 0;
        self.parts += 1;
        self.outer.update(digest);
        self.last_part = Some(digest);
    }

    fn finalize(&mut self) -> String {
        if self.current_len > 0 {
            let digest = take_digest(&mut self.current);
            self.current_len = 0;
            self.parts += 1;
            if self.parts == 1 {
                return hex::encode(digest);
            }
            self.outer.update(digest);
        } else {
            match (self.parts, self.last_part) {
                (0, _) => return hex::encode(take_digest(&mut self.current)),
                (1, Some(only)) => return hex::encode(only),
                _ => {},
            }
        }
        let outer = take_digest(&mut self.outer);
        format!("{}-{}", hex::encode(outer), self.parts)
    }
}

fn take_digest(hasher: &mut Md5) -> [u8; MD5_LEN] {
    let mut digest = [0u8; MD5_LEN];
    digest.copy_from_slice(&hasher.finalize_reset());
    digest
}

impl Debug for MultipartChecksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MultipartChecksum")
            .field("part_size", &self.part_size)
            .field("current_len", &self.current_len)
            .field("parts", &self.parts)
            .finish_non_exhaustive()
    }
}

impl Default for MultipartChecksum {
    fn default() -> Self {
        Self::new(DEFAULT_PART_SIZE)
    }
}

impl Write for MultipartChecksum {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}
