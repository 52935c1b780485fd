// attest/ — Attestation verification and policy evaluation
//
// digest.rs     — Digest sets (multi-algorithm artifact identity)
// envelope.rs   — DSSE envelopes and the pre-authentication encoding
// statement.rs  — In-toto statements, subjects and materials
// policy.rs     — Policy documents: steps, functionaries, keys, roots
// trust.rs      — Trust model: keys, certificate bundles, functionary binding
// signatures.rs — Envelope signature verification
// evaluate.rs   — Step satisfaction and artifact continuity
// evidence.rs   — Evidence collection from disk and a subject-digest index
// run.rs        — One verification run, from policy and evidence to verdict
// error.rs      — Error types

pub mod digest;
pub mod envelope;
pub mod error;
pub mod evaluate;
pub mod evidence;
pub mod policy;
pub mod run;
pub mod signatures;
pub mod statement;
pub mod trust;

#[cfg(test)]
pub(crate) mod fixtures;
