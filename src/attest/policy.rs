// policy.rs — Policy documents
//
//   {
//     "expires": "2030-01-01T00:00:00Z",
//     "publickeys": { "<keyid>": { "keyid": "<keyid>", "key": "<base64 PEM>" } },
//     "roots": { "<bundle>": { "certificate": "<base64 PEM>", "intermediates": ["<base64 PEM>"] } },
//     "steps": {
//       "build": {
//         "name": "build",
//         "functionaries": [
//           { "type": "publickey", "publickeyid": "<keyid>" },
//           { "type": "root", "rootid": "<bundle>", "certConstraint": { "commonname": "*" } }
//         ],
//         "attestations": [{ "type": "https://slsa.dev/provenance/v1" }],
//         "artifactsFrom": ["checkout"]
//       }
//     }
//   }
//
// Maps are ordered, so every walk over steps, keys or bundles is
// deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attest::envelope::{self, Envelope};
use crate::attest::error::PolicyError;
use crate::attest::signatures;
use crate::crypto::PublicKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, rename = "publickeys")]
    pub public_keys: BTreeMap<String, PolicyPublicKey>,
    #[serde(default)]
    pub roots: BTreeMap<String, PolicyRoot>,
    pub steps: BTreeMap<String, Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPublicKey {
    #[serde(rename = "keyid")]
    pub key_id: String,
    /// PEM `PUBLIC KEY` block.
    #[serde(with = "envelope::b64")]
    pub key: Vec<u8>,
}

/// A named trust bundle: one root plus the intermediates that chain to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRoot {
    #[serde(with = "envelope::b64")]
    pub certificate: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "envelope::b64_list")]
    pub intermediates: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub name: String,
    pub functionaries: Vec<Functionary>,
    pub attestations: Vec<RequiredAttestation>,
    /// Upstream steps whose outputs must feed this step's inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts_from: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAttestation {
    #[serde(rename = "type")]
    pub attestation_type: String,
}

/// Who may sign for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Functionary {
    #[serde(rename = "publickey")]
    PublicKey {
        #[serde(rename = "publickeyid")]
        public_key_id: String,
    },
    #[serde(rename = "root")]
    Root {
        #[serde(rename = "rootid")]
        root_id: String,
        #[serde(
            default,
            rename = "certConstraint",
            skip_serializing_if = "Option::is_none"
        )]
        cert_constraint: Option<CertConstraint>,
    },
}

impl Functionary {
    /// The key or bundle id this functionary points at.
    pub fn reference(&self) -> &str {
        match self {
            Functionary::PublicKey { public_key_id } => public_key_id,
            Functionary::Root { root_id, .. } => root_id,
        }
    }
}

/// Extra requirements on a certificate-based signer. Absent or empty fields
/// are unconstrained; `"*"` accepts anything; listed values must all be
/// present on the certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertConstraint {
    #[serde(default, rename = "commonname", skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, rename = "dnsnames", skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
}

impl Policy {
    /// Parse and structurally validate a plain policy document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_slice(bytes)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse a policy that arrives wrapped in an envelope, accepting it only
    /// if `key` signed it.
    pub fn from_signed_envelope(bytes: &[u8], key: &PublicKey) -> Result<Self, PolicyError> {
        let env = Envelope::from_json(bytes).map_err(PolicyError::Envelope)?;
        signatures::verify_with_key(&env, key).map_err(PolicyError::Envelope)?;
        debug!(
            payload_type = %env.payload_type,
            key_id = key.key_id(),
            "policy envelope signature verified"
        );
        Self::from_json(&env.payload)
    }

    /// Structural checks that need no key material: every step is
    /// satisfiable in principle and every continuity link names a real step.
    /// Functionary references are checked when the trust model resolves them.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.steps.is_empty() {
            return Err(PolicyError::NoSteps);
        }
        for (name, step) in &self.steps {
            if step.functionaries.is_empty() {
                return Err(PolicyError::EmptyStep {
                    step: name.clone(),
                    missing: "functionaries",
                });
            }
            if step.attestations.is_empty() {
                return Err(PolicyError::EmptyStep {
                    step: name.clone(),
                    missing: "attestations",
                });
            }
            if let Some(upstream) = step
                .artifacts_from
                .iter()
                .find(|up| !self.steps.contains_key(up.as_str()))
            {
                return Err(PolicyError::UnknownStep {
                    step: name.clone(),
                    upstream: upstream.clone(),
                });
            }
        }
        Ok(())
    }

    /// Reject a policy whose expiry is at or before `now`.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> Result<(), PolicyError> {
        match self.expires {
            Some(expires) if expires <= now => Err(PolicyError::PolicyExpired { expires }),
            _ => Ok(()),
        }
    }
}
