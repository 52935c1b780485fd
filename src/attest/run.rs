// run.rs — One verification run, from policy and evidence to verdict
//
// A VerificationContext is built once per run: the policy is validated,
// checked for expiry, its keys and bundles are loaded, and every step's
// functionaries are resolved. Only then is evidence looked at, so a broken
// policy aborts the run whatever was collected.
//
// Per-envelope failures (bad shape, no matching verifier, undecodable
// statement) drop that envelope, are logged, and are returned alongside the
// report. They never abort the run.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

use crate::attest::digest::DigestSet;
use crate::attest::error::{EnvelopeError, PolicyError, SourceError};
use crate::attest::evaluate::{self, EvaluationReport};
use crate::attest::evidence::{self, CandidateEnvelope, DirectoryIndex, DroppedItem, Evidence, IndexQuery};
use crate::attest::policy::Policy;
use crate::attest::signatures::EnvelopeVerifier;
use crate::attest::statement::{Statement, VerifiedStatement};
use crate::attest::trust::TrustModel;
use crate::crypto::PublicKey;
use crate::hash::HashAlgorithm;

/// Digests computed for the artifact under verification.
const ARTIFACT_ALGORITHMS: &[HashAlgorithm] = &[HashAlgorithm::Sha256, HashAlgorithm::Sha512];

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Distinct signing keys each envelope needs.
    pub threshold: usize,
    /// Keep statements that decoded but verified under no identity. They are
    /// reported but can never satisfy a step.
    pub retain_unauthenticated: bool,
    /// Instant used for policy expiry and certificate validity.
    pub at: SystemTime,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            threshold: 1,
            retain_unauthenticated: false,
            at: SystemTime::now(),
        }
    }
}

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: EvaluationReport,
    pub statements: Vec<VerifiedStatement>,
    pub dropped: Vec<DroppedItem>,
    pub source_errors: Vec<SourceError>,
}

/// Policy, trust model and options for one run. Read-only once built.
#[derive(Debug)]
pub struct VerificationContext {
    policy: Policy,
    trust: TrustModel,
    options: VerifyOptions,
}

impl VerificationContext {
    pub fn new(policy: Policy, options: VerifyOptions) -> Result<Self, PolicyError> {
        policy.validate()?;
        policy.check_expiry(DateTime::<Utc>::from(options.at))?;
        let trust = TrustModel::from_policy(&policy)?;
        evaluate::resolve_steps(&policy, &trust)?;
        Ok(VerificationContext {
            policy,
            trust,
            options,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn trust(&self) -> &TrustModel {
        &self.trust
    }

    /// Check each candidate's signatures and decode its statement.
    pub fn verify_envelopes(
        &self,
        candidates: &[CandidateEnvelope],
    ) -> (Vec<VerifiedStatement>, Vec<DroppedItem>) {
        let verifier = EnvelopeVerifier::new(&self.trust, self.options.threshold, self.options.at);
        let mut statements = Vec::new();
        let mut dropped = Vec::new();
        let mut discard = |candidate: &CandidateEnvelope, reason: String| {
            warn!(origin = %candidate.origin, source = ?candidate.source, reason = %reason, "dropping envelope");
            dropped.push(DroppedItem {
                origin: candidate.origin.clone(),
                reason,
            });
        };

        for candidate in candidates {
            let verifiers = match verifier.verify(&candidate.envelope) {
                Ok(verifiers) => verifiers,
                Err(e @ EnvelopeError::Decode(_)) => {
                    discard(candidate, e.to_string());
                    continue;
                }
                Err(e) if !self.options.retain_unauthenticated => {
                    discard(candidate, e.to_string());
                    continue;
                }
                Err(e) => {
                    warn!(
                        origin = %candidate.origin,
                        source = ?candidate.source,
                        reason = %e,
                        "keeping unauthenticated statement"
                    );
                    Vec::new()
                }
            };

            match Statement::from_envelope(&candidate.envelope) {
                Ok(statement) => statements.push(VerifiedStatement {
                    statement,
                    verifiers,
                    origin: candidate.origin.clone(),
                }),
                Err(e) => discard(candidate, e.to_string()),
            }
        }
        (statements, dropped)
    }

    pub fn evaluate(&self, statements: &[VerifiedStatement]) -> Result<EvaluationReport, PolicyError> {
        evaluate::evaluate(&self.policy, &self.trust, statements)
    }

    /// Verify collected evidence and judge it.
    pub fn run(&self, evidence: Evidence) -> Result<RunOutcome, PolicyError> {
        let (statements, rejected) = self.verify_envelopes(&evidence.envelopes);
        let mut dropped = evidence.dropped;
        dropped.extend(rejected);
        let report = self.evaluate(&statements)?;
        Ok(RunOutcome {
            report,
            statements,
            dropped,
            source_errors: evidence.source_errors,
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum Verdict {
    Verified,
    Unverified(Vec<String>),
}

/// Inputs of the `verify` command.
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    pub policy: PathBuf,
    pub policy_key: Option<PathBuf>,
    pub attestations: Vec<PathBuf>,
    pub artifact: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub lookup_timeout: Option<Duration>,
    pub options: VerifyOptions,
}

/// Load a policy, signed or plain.
pub fn load_policy(path: &std::path::Path, policy_key: Option<&std::path::Path>) -> Result<Policy> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    match policy_key {
        Some(key_path) => {
            let pem = fs::read(key_path).with_context(|| format!("reading {}", key_path.display()))?;
            let key = PublicKey::from_pem(&pem)
                .with_context(|| format!("parsing policy key {}", key_path.display()))?;
            Policy::from_signed_envelope(&bytes, &key)
                .with_context(|| format!("loading signed policy {}", path.display()))
        }
        None => {
            warn!(policy = %path.display(), "policy signature not checked (no policy key given)");
            Policy::from_json(&bytes).with_context(|| format!("loading policy {}", path.display()))
        }
    }
}

fn artifact_digests(path: &std::path::Path) -> Result<DigestSet> {
    DigestSet::from_file(path, ARTIFACT_ALGORITHMS)
        .with_context(|| format!("digesting {}", path.display()))
}

/// Run the `verify` command end to end and print the verdict.
pub fn run_verify(request: &VerifyRequest) -> Result<Verdict> {
    let policy = load_policy(&request.policy, request.policy_key.as_deref())?;
    let context = VerificationContext::new(policy, request.options.clone())
        .context("policy configuration")?;

    eprintln!("[attest] Policy: {}", request.policy.display());
    eprintln!(
        "[attest] Steps: {}, keys: {}, bundles: {}",
        context.policy().steps.len(),
        context.trust().keys().count(),
        context.trust().bundles().count()
    );

    let subject = match &request.artifact {
        Some(path) => {
            let digests = artifact_digests(path)?;
            eprintln!("[attest] Artifact: {} ({})", path.display(), digests);
            Some(digests)
        }
        None => None,
    };

    let archive = match (&request.archive, &subject) {
        (Some(dir), Some(_)) => Some(DirectoryIndex::new(dir)),
        (Some(_), None) => bail!("--archive needs --artifact to look attestations up by"),
        (None, _) => None,
    };
    let query = archive.as_ref().zip(subject).map(|(index, subject)| IndexQuery {
        index,
        subject,
        deadline: request.lookup_timeout.map(|t| Instant::now() + t),
    });

    let evidence = evidence::collect(&request.attestations, query).context("collecting evidence")?;
    eprintln!(
        "[attest] Evidence: {} envelope(s), {} undecodable, {} source error(s)",
        evidence.envelopes.len(),
        evidence.dropped.len(),
        evidence.source_errors.len()
    );
    for e in &evidence.source_errors {
        eprintln!("[attest]   source error: {}", e);
    }

    let outcome = context.run(evidence).context("evaluating policy")?;
    info!(
        statements = outcome.statements.len(),
        dropped = outcome.dropped.len(),
        "evaluation finished"
    );
    let unauthenticated = outcome
        .statements
        .iter()
        .filter(|s| !s.is_authenticated())
        .count();
    eprintln!(
        "[attest] Verified statements: {} ({} dropped)",
        outcome.statements.len() - unauthenticated,
        outcome.dropped.len()
    );
    if unauthenticated > 0 {
        eprintln!(
            "[attest] Retained {} unauthenticated statement(s); they satisfy no step",
            unauthenticated
        );
    }
    for satisfied in &outcome.report.satisfied {
        eprintln!("[attest] Step {}: OK", satisfied.step);
    }

    let failures = outcome.report.failures();
    if failures.is_empty() {
        eprintln!();
        eprintln!("✅ VERIFIED");
        Ok(Verdict::Verified)
    } else {
        eprintln!();
        eprintln!("❌ UNVERIFIED — {} failure(s):", failures.len());
        for f in &failures {
            eprintln!("   • {}", f);
        }
        Ok(Verdict::Unverified(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::evidence::SourceKind;
    use crate::attest::fixtures::{
        signed_statement, trust_policy, with_certificate, Ed25519Signer, TestCa, TestSigner,
    };
    use crate::attest::policy::{Functionary, RequiredAttestation, Step};
    use crate::hash;

    fn build_step(functionary: Functionary) -> Step {
        Step {
            name: "build".to_string(),
            functionaries: vec![functionary],
            attestations: vec![RequiredAttestation {
                attestation_type: "build".to_string(),
            }],
            artifacts_from: vec![],
        }
    }

    fn one_step_policy(signer: &Ed25519Signer) -> Policy {
        let mut policy = trust_policy(&[signer], &[]);
        policy.steps.insert(
            "build".to_string(),
            build_step(Functionary::PublicKey {
                public_key_id: signer.key_id(),
            }),
        );
        policy
    }

    fn candidate(envelope: crate::attest::envelope::Envelope, origin: &str) -> CandidateEnvelope {
        CandidateEnvelope {
            envelope,
            origin: origin.to_string(),
            source: SourceKind::Disk,
        }
    }

    #[test]
    fn undecodable_envelope_beside_valid_ones_still_passes() {
        let k1 = Ed25519Signer::generate();
        let context = VerificationContext::new(one_step_policy(&k1), VerifyOptions::default()).unwrap();

        let mut broken = signed_statement("build", &["aaa"], &[], &[&k1]);
        broken.payload = b"not json".to_vec();
        let evidence = Evidence {
            envelopes: vec![
                candidate(broken, "broken.json"),
                candidate(signed_statement("build", &["aaa"], &[], &[&k1]), "a.json"),
                candidate(signed_statement("build", &["bbb"], &[], &[&k1]), "b.json"),
            ],
            ..Default::default()
        };

        let outcome = context.run(evidence).unwrap();
        assert!(outcome.report.passed());
        assert_eq!(outcome.statements.len(), 2);
        assert_eq!(outcome.dropped.len(), 1);
        assert_eq!(outcome.dropped[0].origin, "broken.json");
    }

    #[test]
    fn unauthenticated_statements_dropped_by_default() {
        let k1 = Ed25519Signer::generate();
        let stranger = Ed25519Signer::generate();
        let envelopes = vec![candidate(
            signed_statement("build", &["aaa"], &[], &[&stranger]),
            "stranger.json",
        )];

        let context = VerificationContext::new(one_step_policy(&k1), VerifyOptions::default()).unwrap();
        let (statements, dropped) = context.verify_envelopes(&envelopes);
        assert!(statements.is_empty());
        assert_eq!(dropped.len(), 1);

        let retaining = VerificationContext::new(
            one_step_policy(&k1),
            VerifyOptions {
                retain_unauthenticated: true,
                ..Default::default()
            },
        )
        .unwrap();
        let (statements, dropped) = retaining.verify_envelopes(&envelopes);
        assert_eq!(statements.len(), 1);
        assert!(!statements[0].is_authenticated());
        assert!(dropped.is_empty());
        assert!(!retaining.evaluate(&statements).unwrap().passed());
    }

    #[test]
    fn root_functionary_accepts_leaf_that_is_also_a_policy_key() {
        let ca = TestCa::new("root");
        let leaf = ca.leaf("builder", &[]);
        let mut policy = trust_policy(&[&leaf], &[("ca", &ca)]);
        policy.steps.insert(
            "build".to_string(),
            build_step(Functionary::Root {
                root_id: "ca".to_string(),
                cert_constraint: None,
            }),
        );
        let context = VerificationContext::new(policy, VerifyOptions::default()).unwrap();

        let env = with_certificate(signed_statement("build", &["aaa"], &[], &[&leaf]), &leaf, &[]);
        let evidence = Evidence {
            envelopes: vec![candidate(env, "build.json")],
            ..Default::default()
        };

        let outcome = context.run(evidence).unwrap();
        assert!(outcome.report.passed(), "{:?}", outcome.report.failures());
        assert_eq!(outcome.statements[0].verifiers.len(), 2);
    }

    #[test]
    fn broken_policy_aborts_before_evidence() {
        let k1 = Ed25519Signer::generate();
        let mut policy = one_step_policy(&k1);
        policy
            .steps
            .get_mut("build")
            .unwrap()
            .functionaries
            .push(Functionary::Root {
                root_id: "ca-missing".to_string(),
                cert_constraint: None,
            });

        assert!(matches!(
            VerificationContext::new(policy, VerifyOptions::default()),
            Err(PolicyError::UnknownFunctionary { .. })
        ));
    }

    #[test]
    fn expired_policy_is_rejected_at_run_time() {
        let k1 = Ed25519Signer::generate();
        let mut policy = one_step_policy(&k1);
        policy.expires = Some(DateTime::<Utc>::from(SystemTime::now() - Duration::from_secs(60)));

        assert!(matches!(
            VerificationContext::new(policy, VerifyOptions::default()),
            Err(PolicyError::PolicyExpired { .. })
        ));
    }

    #[test]
    fn run_verify_reads_files_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let k1 = Ed25519Signer::generate();

        let policy_path = dir.path().join("policy.json");
        fs::write(&policy_path, serde_json::to_vec(&one_step_policy(&k1)).unwrap()).unwrap();

        let artifact = dir.path().join("app.tar");
        fs::write(&artifact, b"artifact bytes").unwrap();
        let digest = hash::sha256_hex(b"artifact bytes");

        let archive = dir.path().join("archive");
        fs::create_dir(&archive).unwrap();
        let env = signed_statement("build", &[&digest], &[], &[&k1]);
        fs::write(archive.join("build.json"), env.to_json().unwrap()).unwrap();

        let request = VerifyRequest {
            policy: policy_path.clone(),
            artifact: Some(artifact),
            archive: Some(archive),
            lookup_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert_eq!(run_verify(&request).unwrap(), Verdict::Verified);

        let without_evidence = VerifyRequest {
            policy: policy_path,
            ..Default::default()
        };
        match run_verify(&without_evidence).unwrap() {
            Verdict::Unverified(failures) => assert!(failures[0].contains("missing `build`")),
            Verdict::Verified => panic!("passed without evidence"),
        }
    }

    #[test]
    fn signed_policy_needs_matching_key() {
        let dir = tempfile::tempdir().unwrap();
        let k1 = Ed25519Signer::generate();
        let owner = Ed25519Signer::generate();

        let payload = serde_json::to_vec(&one_step_policy(&k1)).unwrap();
        let env = crate::attest::fixtures::sign_envelope("application/json", &payload, &[&owner]);
        let policy_path = dir.path().join("policy.signed.json");
        fs::write(&policy_path, env.to_json().unwrap()).unwrap();

        let owner_key = dir.path().join("owner.pem");
        fs::write(&owner_key, owner.public_pem()).unwrap();
        let k1_key = dir.path().join("k1.pem");
        fs::write(&k1_key, k1.public_pem()).unwrap();

        assert!(load_policy(&policy_path, Some(&owner_key)).is_ok());
        assert!(load_policy(&policy_path, Some(&k1_key)).is_err());
    }
}
