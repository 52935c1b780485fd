// error.rs — Error types for the attestation engine
//
// Per-item failures (`EnvelopeError`, `StatementError`) drop one piece of
// evidence and never abort a run. `PolicyError` is a configuration fault
// and aborts the run before any evidence is judged. `SourceError` and
// `EvidenceError` describe evidence collection.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Invalid digest set.
#[derive(Debug, thiserror::Error)]
pub enum DigestSetError {
    #[error("digest set is empty")]
    Empty,

    #[error("digest set entry `{algorithm}` has an empty or non-hex value")]
    InvalidDigest { algorithm: String },

    #[error("hashing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Envelope decode and signature-level failures.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The bytes are not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Decode(String),

    /// No signature verified against any acceptable verifier.
    #[error("no signature matched an acceptable verifier")]
    NoMatchingVerifier,

    /// Some verifiers matched, but fewer than required.
    #[error("{matched} verifier(s) matched, {threshold} required")]
    ThresholdNotMet { matched: usize, threshold: usize },
}

/// Payload-to-statement decode failures.
#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("unsupported payload type `{0}`")]
    UnsupportedPayloadType(String),

    #[error("malformed statement: {0}")]
    Malformed(String),
}

/// Policy configuration errors. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("policy envelope: {0}")]
    Envelope(#[source] EnvelopeError),

    #[error("policy declares no steps")]
    NoSteps,

    #[error("step `{step}` references unknown functionary `{reference}`")]
    UnknownFunctionary { step: String, reference: String },

    #[error("step `{step}` takes artifacts from unknown step `{upstream}`")]
    UnknownStep { step: String, upstream: String },

    #[error("step `{step}` declares no {missing}")]
    EmptyStep { step: String, missing: &'static str },

    #[error("public key `{key_id}`: {reason}")]
    InvalidPublicKey { key_id: String, reason: String },

    #[error("public key declared as `{declared}` has key id `{computed}`")]
    KeyIdMismatch { declared: String, computed: String },

    #[error("trust bundle `{bundle}`: {reason}")]
    InvalidTrustBundle { bundle: String, reason: String },

    #[error("policy expired at {expires}")]
    PolicyExpired { expires: DateTime<Utc> },
}

/// A failure of one evidence source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A local attestation file could not be read.
    #[error("reading attestation {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The lookup service could not be asked.
    #[error("querying {index}: {reason}")]
    Transport { index: String, reason: String },

    /// The lookup did not finish before the caller's deadline.
    #[error("querying {index}: deadline exceeded")]
    DeadlineExceeded { index: String },
}

/// Evidence collection failed outright.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("no evidence could be collected ({} source error(s))", errors.len())]
    NoEvidence { errors: Vec<SourceError> },
}
