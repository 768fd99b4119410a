//! Content hashing.
//!
//! Hashes are only used for change detection, never for security. The
//! algorithm is the one Dropbox uses for its `content_hash` metadata field, so
//! a hash computed locally can be compared directly with the one a Dropbox
//! listing reports:
//!
//! 1. Split the content into 4 MiB blocks (the last one may be shorter).
//! 2. SHA-256 each block.
//! 3. Concatenate the raw block digests and SHA-256 the result.
//! 4. Hex-encode (lower case).

use sha2::{Digest, Sha256};

/// Size of one hashing block.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Compute the content hash of `content`.
///
/// # Examples
///
/// ```
/// use todosync_provider::content_hash;
///
/// assert_eq!(
///     content_hash(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
/// );
/// assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
/// ```
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(content);
    hasher.finalize()
}

/// Incremental version of [`content_hash`].
///
/// Consumed by [`finalize`](Self::finalize), so a hasher can never be reused
/// and carry state from one file into the next.
#[derive(Clone, Default)]
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (BLOCK_SIZE - self.block_len).min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];
            if self.block_len == BLOCK_SIZE {
                self.flush_block();
            }
        }
    }

    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            self.flush_block();
        }
        format!("{:x}", self.overall.finalize())
    }

    fn flush_block(&mut self) {
        let digest = std::mem::take(&mut self.block).finalize();
        self.overall.update(digest);
        self.block_len = 0;
    }
}
