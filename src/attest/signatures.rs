// signatures.rs — Envelope signature verification
//
// Every signature is tried against every policy key, and signatures that
// carry a certificate are checked against every trust bundle. The result
// is the list of identities that verified, in first-match order and
// without duplicates. Payload content is never looked at here.

use std::collections::BTreeSet;
use std::time::SystemTime;

use rustls_pki_types::CertificateDer;
use tracing::{debug, trace};

use crate::attest::envelope::{Envelope, Signature};
use crate::attest::error::EnvelopeError;
use crate::attest::trust::{certificates_from_pem, CertificateIdentity, TrustModel};
use crate::crypto::PublicKey;

/// An identity whose signature over an envelope checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedIdentity {
    /// A policy public key, by key id.
    PublicKey { key_id: String },
    /// A certificate signer: its key id, the bundles its chain reaches, and
    /// the names on the certificate.
    Certificate {
        key_id: String,
        bundles: Vec<String>,
        identity: CertificateIdentity,
    },
}

impl VerifiedIdentity {
    pub fn key_id(&self) -> &str {
        match self {
            VerifiedIdentity::PublicKey { key_id } | VerifiedIdentity::Certificate { key_id, .. } => {
                key_id
            }
        }
    }
}

/// A signature's certificate material, decoded up front so malformed PEM
/// fails the whole envelope before any cryptography runs.
struct PresentedChain {
    leaf: CertificateDer<'static>,
    key: Option<PublicKey>,
    intermediates: Vec<CertificateDer<'static>>,
}

fn decode_chain(index: usize, sig: &Signature) -> Result<Option<PresentedChain>, EnvelopeError> {
    let Some(cert_pem) = &sig.certificate else {
        return Ok(None);
    };
    let leaf = certificates_from_pem(cert_pem)
        .map_err(|e| EnvelopeError::Decode(format!("signature {} certificate: {}", index, e)))?
        .remove(0);

    let mut intermediates = Vec::new();
    for pem_bytes in &sig.intermediates {
        intermediates.extend(certificates_from_pem(pem_bytes).map_err(|e| {
            EnvelopeError::Decode(format!("signature {} intermediate: {}", index, e))
        })?);
    }

    // A certificate whose key we cannot use is not a decode error; it just
    // cannot match.
    let key = x509_parser::parse_x509_certificate(&leaf)
        .ok()
        .and_then(|(_, cert)| PublicKey::from_spki_der(cert.public_key().raw).ok());

    Ok(Some(PresentedChain {
        leaf,
        key,
        intermediates,
    }))
}

/// Verifies envelopes against one run's trust model.
pub struct EnvelopeVerifier<'a> {
    trust: &'a TrustModel,
    threshold: usize,
    at: SystemTime,
}

impl<'a> EnvelopeVerifier<'a> {
    /// `threshold` is the number of distinct signing keys an envelope needs
    /// (values below 1 are treated as 1). `at` is the instant certificate
    /// validity is judged at.
    pub fn new(trust: &'a TrustModel, threshold: usize, at: SystemTime) -> Self {
        EnvelopeVerifier {
            trust,
            threshold: threshold.max(1),
            at,
        }
    }

    /// Return the identities that verified `envelope`.
    pub fn verify(&self, envelope: &Envelope) -> Result<Vec<VerifiedIdentity>, EnvelopeError> {
        let chains = envelope
            .signatures
            .iter()
            .enumerate()
            .map(|(i, sig)| decode_chain(i, sig))
            .collect::<Result<Vec<_>, _>>()?;

        let message = envelope.pae();
        let mut matched: Vec<VerifiedIdentity> = Vec::new();
        // A leaf key can also be a policy key; both identities are kept.
        let mut record = |identity: VerifiedIdentity| {
            if !matched.contains(&identity) {
                matched.push(identity);
            }
        };

        for (i, (sig, chain)) in envelope.signatures.iter().zip(&chains).enumerate() {
            for key in self.trust.keys() {
                if key.verify(&message, &sig.sig) {
                    trace!(signature = i, key_id = key.key_id(), "signature matched policy key");
                    record(VerifiedIdentity::PublicKey {
                        key_id: key.key_id().to_string(),
                    });
                }
            }

            if let Some(identity) = chain.as_ref().and_then(|c| self.verify_certificate(&message, sig, c)) {
                trace!(signature = i, key_id = identity.key_id(), "signature matched certificate chain");
                record(identity);
            }
        }

        let signers = matched
            .iter()
            .map(VerifiedIdentity::key_id)
            .collect::<BTreeSet<_>>()
            .len();
        match signers {
            0 => Err(EnvelopeError::NoMatchingVerifier),
            n if n < self.threshold => Err(EnvelopeError::ThresholdNotMet {
                matched: n,
                threshold: self.threshold,
            }),
            _ => Ok(matched),
        }
    }

    fn verify_certificate(
        &self,
        message: &[u8],
        sig: &Signature,
        chain: &PresentedChain,
    ) -> Option<VerifiedIdentity> {
        let key = chain.key.as_ref()?;
        if !key.verify(message, &sig.sig) {
            return None;
        }

        let bundles: Vec<String> = self
            .trust
            .bundles()
            .filter(|b| b.validates(&chain.leaf, &chain.intermediates, self.at))
            .map(|b| b.id().to_string())
            .collect();
        if bundles.is_empty() {
            debug!(key_id = key.key_id(), "certificate signature valid but chains to no trust bundle");
            return None;
        }

        let identity = match CertificateIdentity::from_der(&chain.leaf) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(error = %e, "cannot read names from signer certificate");
                return None;
            }
        };

        Some(VerifiedIdentity::Certificate {
            key_id: key.key_id().to_string(),
            bundles,
            identity,
        })
    }
}

/// Accept `envelope` only if one of its signatures verifies under `key`.
pub fn verify_with_key(envelope: &Envelope, key: &PublicKey) -> Result<(), EnvelopeError> {
    let message = envelope.pae();
    if envelope.signatures.iter().any(|s| key.verify(&message, &s.sig)) {
        Ok(())
    } else {
        Err(EnvelopeError::NoMatchingVerifier)
    }
}
