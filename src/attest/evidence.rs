// evidence.rs — Evidence collection
//
// Envelopes come from two places: attestation files on disk and an index
// that looks attestations up by subject digest (a transparency log, or a
// local archive directory standing in for one). Both are fetched at once;
// the merged list is always disk first, then index, each in its own order.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::attest::digest::DigestSet;
use crate::attest::envelope::Envelope;
use crate::attest::error::{EvidenceError, SourceError};
use crate::attest::statement::Statement;

/// Looks up envelopes whose statements are about a given artifact.
pub trait SubjectDigestIndex: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Raw envelope documents for `subject`. Implementations give up with
    /// `DeadlineExceeded` once `deadline` has passed.
    fn lookup(&self, subject: &DigestSet, deadline: Option<Instant>) -> Result<Vec<Vec<u8>>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Disk,
    Index,
}

/// An envelope whose shape decoded. Nothing about it is trusted yet.
#[derive(Debug, Clone)]
pub struct CandidateEnvelope {
    pub envelope: Envelope,
    pub origin: String,
    pub source: SourceKind,
}

/// One piece of evidence that was discarded, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub origin: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Evidence {
    pub envelopes: Vec<CandidateEnvelope>,
    pub dropped: Vec<DroppedItem>,
    pub source_errors: Vec<SourceError>,
}

/// An index query: which index, which artifact, and until when.
pub struct IndexQuery<'a> {
    pub index: &'a dyn SubjectDigestIndex,
    pub subject: DigestSet,
    pub deadline: Option<Instant>,
}

/// What one source produced before decoding.
#[derive(Default)]
struct Fetched {
    raw: Vec<(String, Vec<u8>)>,
    errors: Vec<SourceError>,
}

fn read_files(paths: &[PathBuf]) -> Fetched {
    let mut fetched = Fetched::default();
    for path in paths {
        match fs::read(path) {
            Ok(bytes) => fetched.raw.push((path.display().to_string(), bytes)),
            Err(source) => fetched.errors.push(SourceError::Read {
                path: path.clone(),
                source,
            }),
        }
    }
    fetched
}

fn query_index(query: &IndexQuery<'_>) -> Fetched {
    let name = query.index.name();
    match query.index.lookup(&query.subject, query.deadline) {
        Ok(entries) => Fetched {
            raw: entries
                .into_iter()
                .enumerate()
                .map(|(i, bytes)| (format!("{}#{}", name, i), bytes))
                .collect(),
            errors: vec![],
        },
        Err(e) => Fetched {
            raw: vec![],
            errors: vec![e],
        },
    }
}

fn panicked(source: &str) -> Fetched {
    Fetched {
        raw: vec![],
        errors: vec![SourceError::Transport {
            index: source.to_string(),
            reason: "fetch worker panicked".to_string(),
        }],
    }
}

/// Fetch both sources and merge them into one ordered candidate list.
///
/// Items that fail to decode are dropped and recorded. Source failures are
/// kept alongside whatever was collected; the call only fails when sources
/// failed and nothing at all was read.
pub fn collect(disk: &[PathBuf], index: Option<IndexQuery<'_>>) -> Result<Evidence, EvidenceError> {
    let (from_disk, from_index) = thread::scope(|s| {
        let disk_worker = s.spawn(|| read_files(disk));
        let index_worker = index.as_ref().map(|q| {
            let name = q.index.name().to_string();
            (name, s.spawn(move || query_index(q)))
        });

        let from_disk = disk_worker.join().unwrap_or_else(|_| panicked("local files"));
        let from_index = index_worker.map(|(name, worker)| worker.join().unwrap_or_else(|_| panicked(&name)));
        (from_disk, from_index)
    });

    let mut evidence = Evidence::default();
    let mut read_anything = false;
    for (fetched, kind) in [(Some(from_disk), SourceKind::Disk), (from_index, SourceKind::Index)] {
        let Some(fetched) = fetched else { continue };
        read_anything |= !fetched.raw.is_empty();
        for (origin, bytes) in fetched.raw {
            match Envelope::from_json(&bytes) {
                Ok(envelope) => evidence.envelopes.push(CandidateEnvelope {
                    envelope,
                    origin,
                    source: kind,
                }),
                Err(e) => {
                    warn!(origin = %origin, error = %e, "dropping undecodable envelope");
                    evidence.dropped.push(DroppedItem {
                        origin,
                        reason: e.to_string(),
                    });
                }
            }
        }
        for e in fetched.errors {
            warn!(error = %e, "evidence source failed");
            evidence.source_errors.push(e);
        }
    }

    if !read_anything && !evidence.source_errors.is_empty() {
        return Err(EvidenceError::NoEvidence {
            errors: evidence.source_errors,
        });
    }

    info!(
        envelopes = evidence.envelopes.len(),
        dropped = evidence.dropped.len(),
        source_errors = evidence.source_errors.len(),
        "evidence collected"
    );
    Ok(evidence)
}

/// A directory of envelope files (`*.json`) searched by subject digest.
///
/// Files are visited in name order. A file that is not an in-toto envelope,
/// or whose statement is about another artifact, is skipped.
pub struct DirectoryIndex {
    name: String,
    root: PathBuf,
}

impl DirectoryIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        DirectoryIndex {
            name: format!("archive {}", root.display()),
            root,
        }
    }

    fn entries(&self) -> Result<Vec<PathBuf>, SourceError> {
        let transport = |e: std::io::Error| SourceError::Transport {
            index: self.name.clone(),
            reason: e.to_string(),
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(transport)? {
            let path = entry.map_err(transport)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn matches(path: &Path, bytes: &[u8], subject: &DigestSet) -> bool {
        let statement = Envelope::from_json(bytes)
            .map_err(|e| e.to_string())
            .and_then(|env| Statement::from_envelope(&env).map_err(|e| e.to_string()));
        match statement {
            Ok(statement) => statement.subjects().any(|s| s.intersects(subject)),
            Err(reason) => {
                debug!(path = %path.display(), %reason, "skipping archive entry");
                false
            }
        }
    }
}

impl SubjectDigestIndex for DirectoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, subject: &DigestSet, deadline: Option<Instant>) -> Result<Vec<Vec<u8>>, SourceError> {
        let mut found = Vec::new();
        for path in self.entries()? {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(SourceError::DeadlineExceeded {
                    index: self.name.clone(),
                });
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable archive entry");
                    continue;
                }
            };
            if Self::matches(&path, &bytes, subject) {
                found.push(bytes);
            }
        }
        debug!(index = %self.name, subject = %subject, found = found.len(), "archive lookup done");
        Ok(found)
    }
}
