//! SHA-256 content digests.
//!
//! The digest of a byte sequence is the same whether it is computed in one
//! shot or fed through [`ContentHasher`] in chunks of any size.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Block size used when hashing files from disk.
pub const FILE_BLOCK_SIZE: usize = 4 * 1024;

/// Incremental SHA-256 hasher producing lowercase hex digests.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    /// Empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.len
    }

    /// Lowercase hex SHA-256 of everything fed.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Digest of a whole buffer.
#[must_use]
pub fn digest_bytes(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Digest of a file on disk, read in [`FILE_BLOCK_SIZE`] blocks.
pub fn digest_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut block = [0u8; FILE_BLOCK_SIZE];
    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hasher.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            ContentHasher::new().finalize_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let content = sample(50_000);
        let whole = digest_bytes(&content);

        for chunk_size in [1, 7, 4096, 8192, 8193, 50_000] {
            let mut hasher = ContentHasher::new();
            for chunk in content.chunks(chunk_size) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.bytes_hashed(), 50_000);
            assert_eq!(hasher.finalize_hex(), whole, "chunk size {chunk_size}");
        }

        // Uneven split points
        let mut hasher = ContentHasher::new();
        hasher.update(&content[..3]);
        hasher.update(&content[3..12_345]);
        hasher.update(&[]);
        hasher.update(&content[12_345..]);
        assert_eq!(hasher.finalize_hex(), whole);
    }

    #[test]
    fn test_digest_file_matches_buffer() {
        let content = sample(FILE_BLOCK_SIZE * 3 + 17);
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(&content).expect("write temp file");

        let from_disk = digest_file(file.path()).expect("hash file");
        assert_eq!(from_disk, digest_bytes(&content));
        assert_eq!(from_disk.len(), 64);
    }
}
