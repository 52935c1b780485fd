// digest.rs — Multi-algorithm digest sets
//
// A `DigestSet` names one piece of content by one or more hashes. Two
// sets refer to the same artifact when they agree on at least one
// algorithm. Keys and values are lowercased on construction, so comparison
// is exact string equality afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::attest::error::DigestSetError;
use crate::hash::HashAlgorithm;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct DigestSet(BTreeMap<String, String>);

impl DigestSet {
    /// Build a digest set from `(algorithm, hex)` pairs.
    pub fn new<I, A, D>(entries: I) -> Result<Self, DigestSetError>
    where
        I: IntoIterator<Item = (A, D)>,
        A: Into<String>,
        D: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (algorithm, digest) in entries {
            let algorithm = algorithm.into().to_ascii_lowercase();
            let digest = digest.into().to_ascii_lowercase();
            if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(DigestSetError::InvalidDigest { algorithm });
            }
            map.insert(algorithm, digest);
        }
        if map.is_empty() {
            return Err(DigestSetError::Empty);
        }
        Ok(DigestSet(map))
    }

    /// Hash `data` once per algorithm.
    pub fn compute(data: &[u8], algorithms: &[HashAlgorithm]) -> Result<Self, DigestSetError> {
        Self::new(
            algorithms
                .iter()
                .map(|alg| (alg.name(), alg.digest_hex(data))),
        )
    }

    /// Hash a file once per algorithm.
    pub fn from_file(path: &Path, algorithms: &[HashAlgorithm]) -> Result<Self, DigestSetError> {
        let data = std::fs::read(path).map_err(|source| DigestSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::compute(&data, algorithms)
    }

    pub fn get(&self, algorithm: &str) -> Option<&str> {
        self.0
            .get(&algorithm.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// True when both sets carry the same digest for at least one algorithm.
    pub fn intersects(&self, other: &DigestSet) -> bool {
        self.0
            .iter()
            .any(|(alg, digest)| other.0.get(alg) == Some(digest))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(a, d)| (a.as_str(), d.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<BTreeMap<String, String>> for DigestSet {
    type Error = DigestSetError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        DigestSet::new(map)
    }
}

impl From<DigestSet> for BTreeMap<String, String> {
    fn from(set: DigestSet) -> Self {
        set.0
    }
}

impl fmt::Display for DigestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (alg, digest)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", alg, digest)?;
        }
        Ok(())
    }
}
