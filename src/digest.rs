//! Multi-digest accumulation over a single byte stream.
//!
//! A [`DigestSet`] holds one hasher per requested algorithm and is fed each
//! chunk exactly once while the chunk is on its way to the destination, so
//! computing several digests never forces a second read of the source.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::descriptor::FileDescriptor;

/// The digest algorithms the engine can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Length of the hex encoding of this algorithm's digest. A shorter
    /// string indicates a truncated computation and must be treated as a
    /// fatal error.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(anyhow!("Unknown digest algorithm: {}", other)),
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// One hasher per requested algorithm, all fed from the same pass.
pub struct DigestSet {
    hashers: Vec<(DigestAlgorithm, Hasher)>,
}

impl DigestSet {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        Self {
            hashers: algorithms
                .iter()
                .map(|&algorithm| (algorithm, Hasher::new(algorithm)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hashers.is_empty()
    }

    /// Feed one chunk to every hasher.
    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
    }

    /// Finalizes every hasher into the descriptor's digest map.
    ///
    /// Fails if any produced digest is not exactly the expected hex length
    /// for its algorithm; a short digest means the stream was truncated.
    pub fn finish_into(self, descriptor: &mut FileDescriptor) -> anyhow::Result<()> {
        for (algorithm, hasher) in self.hashers {
            let digest = hasher.finalize();
            if digest.len() != algorithm.hex_len() {
                bail!(
                    "Truncated {} digest for {}: expected {} hex chars, got {}",
                    algorithm,
                    descriptor.dest_path,
                    algorithm.hex_len(),
                    digest.len()
                );
            }
            descriptor.digests.insert(algorithm, digest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn descriptor() -> FileDescriptor {
        FileDescriptor::new(PathBuf::from("/tmp/abc"), "data/abc", 3, 0o644, 0, 0, 0)
    }

    #[test]
    fn known_digests_of_abc() {
        let mut set = DigestSet::new(&[
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
        ]);
        set.update(b"abc");
        let mut desc = descriptor();
        set.finish_into(&mut desc).unwrap();

        assert_eq!(
            desc.digests[&DigestAlgorithm::Md5],
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            desc.digests[&DigestAlgorithm::Sha1],
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            desc.digests[&DigestAlgorithm::Sha256],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn chunked_updates_match_single_update() {
        let mut whole = DigestSet::new(&[DigestAlgorithm::Sha256]);
        whole.update(b"hello world");
        let mut a = descriptor();
        whole.finish_into(&mut a).unwrap();

        let mut parts = DigestSet::new(&[DigestAlgorithm::Sha256]);
        parts.update(b"hello ");
        parts.update(b"world");
        let mut b = descriptor();
        parts.finish_into(&mut b).unwrap();

        assert_eq!(a.digests, b.digests);
    }

    #[test]
    fn hex_lengths() {
        assert_eq!(DigestAlgorithm::Md5.hex_len(), 32);
        assert_eq!(DigestAlgorithm::Sha1.hex_len(), 40);
        assert_eq!(DigestAlgorithm::Sha256.hex_len(), 64);
        assert_eq!(DigestAlgorithm::Sha512.hex_len(), 128);
    }

    #[test]
    fn parse_algorithm_names() {
        assert_eq!(
            "SHA256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }
}
