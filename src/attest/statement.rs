// statement.rs — In-toto statements and the verified-statement unit the
// evaluator consumes
//
// A statement names its subjects (outputs) by digest set and carries a typed
// predicate. Inputs (materials) are read from the predicate when it follows
// either SLSA provenance layout:
//
// * v0.2: `predicate.materials[].digest`
// * v1:   `predicate.buildDefinition.resolvedDependencies[].digest`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attest::digest::DigestSet;
use crate::attest::envelope::{Envelope, IN_TOTO_PAYLOAD_TYPE};
use crate::attest::error::StatementError;
use crate::attest::signatures::VerifiedIdentity;

pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub subject: Vec<Subject>,
    pub predicate_type: String,
    #[serde(default)]
    pub predicate: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub name: String,
    pub digest: DigestSet,
}

impl Statement {
    /// Decode the payload of an envelope. The envelope is not trusted here.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, StatementError> {
        if envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
            return Err(StatementError::UnsupportedPayloadType(
                envelope.payload_type.clone(),
            ));
        }
        Self::from_slice(&envelope.payload)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, StatementError> {
        let statement: Statement = serde_json::from_slice(payload)
            .map_err(|e| StatementError::Malformed(e.to_string()))?;

        if statement.statement_type != STATEMENT_TYPE_V01
            && statement.statement_type != STATEMENT_TYPE_V1
        {
            return Err(StatementError::Malformed(format!(
                "unknown statement type `{}`",
                statement.statement_type
            )));
        }
        if statement.subject.is_empty() {
            return Err(StatementError::Malformed("no subjects".to_string()));
        }
        if statement.predicate_type.is_empty() {
            return Err(StatementError::Malformed("empty predicateType".to_string()));
        }
        Ok(statement)
    }

    /// Digest sets of the artifacts this statement is about.
    pub fn subjects(&self) -> impl Iterator<Item = &DigestSet> {
        self.subject.iter().map(|s| &s.digest)
    }

    /// Digest sets of the inputs the predicate declares. Entries without a
    /// usable digest are skipped.
    pub fn materials(&self) -> Vec<DigestSet> {
        let v02 = self.predicate.get("materials");
        let v1 = self
            .predicate
            .get("buildDefinition")
            .and_then(|b| b.get("resolvedDependencies"));

        [v02, v1]
            .into_iter()
            .flatten()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|entry| entry.get("digest"))
            .filter_map(|digest| serde_json::from_value::<DigestSet>(digest.clone()).ok())
            .collect()
    }
}

/// A decoded statement and the identities whose signatures verified it.
///
/// An empty `verifiers` list means the statement decoded but was never
/// authenticated; such a statement cannot satisfy any step.
#[derive(Debug, Clone)]
pub struct VerifiedStatement {
    pub statement: Statement,
    pub verifiers: Vec<VerifiedIdentity>,
    /// Where the envelope came from (file path or index entry).
    pub origin: String,
}

impl VerifiedStatement {
    pub fn is_authenticated(&self) -> bool {
        !self.verifiers.is_empty()
    }
}
