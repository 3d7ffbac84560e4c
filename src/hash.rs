// src/hash.rs

//! Multi-algorithm hashing for source artifact pins
//!
//! Every source artifact is pinned under all configured algorithms at once.
//! A single streaming pass over the file feeds every digest, so adding an
//! algorithm costs no extra I/O. The pin grows monotonically: algorithms
//! added later are appended to existing records, never replace them.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Hash algorithms recorded for every source artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha3_256,
}

/// All algorithms computed for new artifacts, in pin order
pub const PINNED_ALGORITHMS: [HashAlgorithm; 3] = [
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha3_256,
];

impl HashAlgorithm {
    /// Name used as the key in recipe metadata
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha3_256 => "sha3-256",
        }
    }

    /// Hex digest length for this algorithm
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha3_256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Runs every pinned digest over the same input
pub struct MultiHasher {
    sha1: Sha1,
    sha256: Sha256,
    sha3: Sha3_256,
}

impl MultiHasher {
    pub fn new() -> Self {
        Self {
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha3: Sha3_256::new(),
        }
    }

    /// Feed a chunk to every digest
    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha3.update(data);
    }

    /// Finalize all digests, keyed by algorithm name
    pub fn finalize(self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(
            HashAlgorithm::Sha1.name().to_string(),
            format!("{:x}", self.sha1.finalize()),
        );
        out.insert(
            HashAlgorithm::Sha256.name().to_string(),
            format!("{:x}", self.sha256.finalize()),
        );
        out.insert(
            HashAlgorithm::Sha3_256.name().to_string(),
            format!("{:x}", self.sha3.finalize()),
        );
        out
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash everything a reader produces, in one pass
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<BTreeMap<String, String>> {
    let mut hasher = MultiHasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file under every pinned algorithm
pub fn hash_file(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let mut cursor = io::Cursor::new(b"hello world");
        let hashes = hash_reader(&mut cursor).unwrap();

        assert_eq!(hashes["sha1"], "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(
            hashes["sha256"],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            hashes["sha3-256"],
            "644bcc7e564373040999aac89e7622f3ca71fba1d972fd94a31c3bfbf24e3938"
        );
    }

    #[test]
    fn test_all_algorithms_present() {
        let mut cursor = io::Cursor::new(b"");
        let hashes = hash_reader(&mut cursor).unwrap();

        assert_eq!(hashes.len(), PINNED_ALGORITHMS.len());
        for algo in PINNED_ALGORITHMS {
            let value = &hashes[algo.name()];
            assert_eq!(value.len(), algo.hex_len());
        }
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = MultiHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        let incremental = hasher.finalize();

        let mut cursor = io::Cursor::new(b"hello world");
        let oneshot = hash_reader(&mut cursor).unwrap();

        assert_eq!(incremental, oneshot);
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.tar.gz");
        std::fs::write(&path, b"hello world").unwrap();

        let hashes = hash_file(&path).unwrap();
        assert_eq!(
            hashes["sha256"],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
