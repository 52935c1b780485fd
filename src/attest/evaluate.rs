// evaluate.rs — Policy evaluation
//
// Pure and deterministic: steps are judged in name order, evidence in the
// order given, and every failure is collected. No clock, no I/O.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::attest::error::PolicyError;
use crate::attest::policy::{Policy, Step};
use crate::attest::statement::VerifiedStatement;
use crate::attest::trust::{ResolvedFunctionary, TrustModel};

/// Why one required attestation type of a step is not covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Statements of this type exist, but none was signed by a functionary
    /// the step accepts.
    NoAuthorizedFunctionary { attestation_type: String },
    /// No statement of this type was presented at all.
    MissingAttestation { attestation_type: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoAuthorizedFunctionary { attestation_type } => write!(
                f,
                "no authorized functionary signed a `{}` attestation",
                attestation_type
            ),
            FailureReason::MissingAttestation { attestation_type } => {
                write!(f, "missing `{}` attestation", attestation_type)
            }
        }
    }
}

/// The statement picked to cover one required type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenAttestation {
    pub attestation_type: String,
    /// Index into the evaluated statement list.
    pub evidence: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatisfiedStep {
    pub step: String,
    pub chosen: Vec<ChosenAttestation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub reasons: Vec<FailureReason>,
}

/// No output of `from` was consumed as an input of `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityFailure {
    pub from: String,
    pub to: String,
}

impl fmt::Display for ContinuityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artifact continuity broken between `{}` and `{}`",
            self.from, self.to
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub satisfied: Vec<SatisfiedStep>,
    pub unsatisfied: Vec<StepFailure>,
    pub broken_links: Vec<ContinuityFailure>,
}

impl EvaluationReport {
    pub fn passed(&self) -> bool {
        self.unsatisfied.is_empty() && self.broken_links.is_empty()
    }

    /// Every failure as one human-readable line.
    pub fn failures(&self) -> Vec<String> {
        let steps = self.unsatisfied.iter().flat_map(|failure| {
            failure
                .reasons
                .iter()
                .map(move |r| format!("step `{}`: {}", failure.step, r))
        });
        steps
            .chain(self.broken_links.iter().map(|l| l.to_string()))
            .collect()
    }
}

/// Resolve every step's functionaries. Done before any evidence is judged so
/// a configuration fault aborts regardless of what was collected.
pub fn resolve_steps<'a>(
    policy: &'a Policy,
    trust: &'a TrustModel,
) -> Result<BTreeMap<&'a str, Vec<ResolvedFunctionary<'a>>>, PolicyError> {
    policy
        .steps
        .iter()
        .map(|(name, step)| Ok((name.as_str(), trust.resolve(name, step)?)))
        .collect()
}

fn is_candidate(
    statement: &VerifiedStatement,
    attestation_type: &str,
    functionaries: &[ResolvedFunctionary<'_>],
) -> bool {
    statement.statement.predicate_type == attestation_type
        && statement
            .verifiers
            .iter()
            .any(|id| functionaries.iter().any(|f| f.authorizes(id)))
}

fn judge_step(
    name: &str,
    step: &Step,
    functionaries: &[ResolvedFunctionary<'_>],
    statements: &[VerifiedStatement],
) -> Result<SatisfiedStep, StepFailure> {
    let mut chosen = Vec::new();
    let mut reasons = Vec::new();

    for required in &step.attestations {
        let wanted = required.attestation_type.as_str();
        match statements
            .iter()
            .position(|s| is_candidate(s, wanted, functionaries))
        {
            Some(evidence) => chosen.push(ChosenAttestation {
                attestation_type: wanted.to_string(),
                evidence,
            }),
            None if statements.iter().any(|s| s.statement.predicate_type == wanted) => {
                reasons.push(FailureReason::NoAuthorizedFunctionary {
                    attestation_type: wanted.to_string(),
                })
            }
            None => reasons.push(FailureReason::MissingAttestation {
                attestation_type: wanted.to_string(),
            }),
        }
    }

    if reasons.is_empty() {
        Ok(SatisfiedStep {
            step: name.to_string(),
            chosen,
        })
    } else {
        Err(StepFailure {
            step: name.to_string(),
            reasons,
        })
    }
}

/// Does some output of `upstream` appear among the inputs of `downstream`?
fn linked(upstream: &SatisfiedStep, downstream: &SatisfiedStep, statements: &[VerifiedStatement]) -> bool {
    let outputs: Vec<_> = upstream
        .chosen
        .iter()
        .flat_map(|c| statements[c.evidence].statement.subjects())
        .collect();
    downstream
        .chosen
        .iter()
        .flat_map(|c| statements[c.evidence].statement.materials())
        .any(|input| outputs.iter().any(|out| out.intersects(&input)))
}

/// Judge `statements` against `policy`.
///
/// Statements without verifiers are accepted in the input but can never be
/// chosen.
pub fn evaluate(
    policy: &Policy,
    trust: &TrustModel,
    statements: &[VerifiedStatement],
) -> Result<EvaluationReport, PolicyError> {
    let resolved = resolve_steps(policy, trust)?;

    let mut report = EvaluationReport::default();
    for (name, step) in &policy.steps {
        match judge_step(name, step, &resolved[name.as_str()], statements) {
            Ok(satisfied) => report.satisfied.push(satisfied),
            Err(failure) => {
                debug!(step = %name, reasons = failure.reasons.len(), "step not satisfied");
                report.unsatisfied.push(failure);
            }
        }
    }

    let satisfied: BTreeMap<&str, &SatisfiedStep> = report
        .satisfied
        .iter()
        .map(|s| (s.step.as_str(), s))
        .collect();
    let mut broken = Vec::new();
    for (name, step) in &policy.steps {
        for upstream in &step.artifacts_from {
            // A link is only judged when both ends hold; otherwise the step
            // failure already explains the rejection.
            let (Some(from), Some(to)) = (satisfied.get(upstream.as_str()), satisfied.get(name.as_str())) else {
                continue;
            };
            if !linked(from, to, statements) {
                debug!(from = %upstream, to = %name, "artifact continuity broken");
                broken.push(ContinuityFailure {
                    from: upstream.clone(),
                    to: name.clone(),
                });
            }
        }
    }
    report.broken_links = broken;

    Ok(report)
}
