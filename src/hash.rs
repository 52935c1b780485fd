// hash.rs — Content hashing for digest sets and key ids
//
// Every digest in the engine is lowercase hex. Algorithm names follow the
// in-toto digest-set vocabulary ("sha256", "sha512").

use sha2::{Digest, Sha256, Sha512};

/// Hash algorithms the engine can compute locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Name used as the key inside a digest set.
    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of `data` under this algorithm.
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex_encode(&Sha256::digest(data)),
            HashAlgorithm::Sha512 => hex_encode(&Sha512::digest(data)),
        }
    }
}

/// Compute SHA-256 hex digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    HashAlgorithm::Sha256.digest_hex(data)
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
