// trust.rs — Trust model: named public keys, named certificate bundles,
// and the resolution of step functionaries against them
//
// Built once per run from the policy and read-only afterwards. Chain
// validation is a pure function of (leaf, root, intermediates, time).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rustls_pki_types::{CertificateDer, UnixTime};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::attest::error::PolicyError;
use crate::attest::policy::{CertConstraint, Functionary, Policy, Step};
use crate::attest::signatures::VerifiedIdentity;
use crate::crypto::PublicKey;

/// id-kp-codeSigning (1.3.6.1.5.5.7.3.3). Enforced only when the leaf
/// carries an extended key usage extension.
const CODE_SIGNING_EKU: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03];

/// Longest intermediate path walked when checking a bundle.
const MAX_CHAIN_DEPTH: usize = 8;

/// Split a PEM document into DER certificates.
pub fn certificates_from_pem(pem_bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    let blocks = pem::parse_many(pem_bytes).map_err(|e| e.to_string())?;
    let certs: Vec<_> = blocks
        .into_iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(|b| CertificateDer::from(b.into_contents()))
        .collect();
    if certs.is_empty() {
        return Err("no CERTIFICATE block found".to_string());
    }
    Ok(certs)
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, String> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| e.to_string())
}

/// A root certificate and the intermediates that chain to it.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    id: String,
    root: CertificateDer<'static>,
    intermediates: Vec<CertificateDer<'static>>,
}

impl TrustBundle {
    /// Parse and check a bundle: the root must be self-signed and each
    /// intermediate must reach the root through the bundle.
    pub fn from_pem(id: &str, root_pem: &[u8], intermediates_pem: &[Vec<u8>]) -> Result<Self, PolicyError> {
        let invalid = |reason: String| PolicyError::InvalidTrustBundle {
            bundle: id.to_string(),
            reason,
        };

        let root = certificates_from_pem(root_pem)
            .map_err(|e| invalid(format!("root: {}", e)))?
            .remove(0);
        let mut intermediates = Vec::new();
        for pem_bytes in intermediates_pem {
            intermediates.extend(
                certificates_from_pem(pem_bytes).map_err(|e| invalid(format!("intermediate: {}", e)))?,
            );
        }

        let bundle = TrustBundle {
            id: id.to_string(),
            root,
            intermediates,
        };
        bundle.check().map_err(invalid)?;
        Ok(bundle)
    }

    fn check(&self) -> Result<(), String> {
        let root = parse(&self.root)?;
        if root.subject().as_raw() != root.issuer().as_raw() || root.verify_signature(None).is_err() {
            return Err("root certificate is not self-signed".to_string());
        }
        webpki::anchor_from_trusted_cert(&self.root)
            .map_err(|e| format!("root is not usable as a trust anchor: {:?}", e))?;

        let pool = self
            .intermediates
            .iter()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, cert) in pool.iter().enumerate() {
            if !chains_to_root(cert, &root, &pool, MAX_CHAIN_DEPTH) {
                return Err(format!(
                    "intermediate {} ({}) does not chain to the root",
                    i,
                    cert.subject()
                ));
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Does `leaf` chain to this bundle's root at time `at`? `presented`
    /// are extra intermediates supplied alongside the signature.
    pub fn validates(
        &self,
        leaf: &CertificateDer<'_>,
        presented: &[CertificateDer<'static>],
        at: SystemTime,
    ) -> bool {
        let pool: Vec<CertificateDer<'static>> = self
            .intermediates
            .iter()
            .chain(presented)
            .cloned()
            .collect();
        validate_chain(leaf, &self.root, &pool, at)
    }
}

fn issued_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    cert.issuer().as_raw() == issuer.subject().as_raw()
        && cert.verify_signature(Some(issuer.public_key())).is_ok()
}

fn chains_to_root(
    cert: &X509Certificate<'_>,
    root: &X509Certificate<'_>,
    pool: &[X509Certificate<'_>],
    depth: usize,
) -> bool {
    if issued_by(cert, root) {
        return true;
    }
    if depth == 0 {
        return false;
    }
    pool.iter().any(|issuer| {
        !std::ptr::eq(issuer, cert)
            && issued_by(cert, issuer)
            && chains_to_root(issuer, root, pool, depth - 1)
    })
}

/// Validate `leaf` against a single root with the given intermediate pool.
pub fn validate_chain(
    leaf: &CertificateDer<'_>,
    root: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    at: SystemTime,
) -> bool {
    let Ok(anchor) = webpki::anchor_from_trusted_cert(root) else {
        return false;
    };
    let Ok(end_entity) = webpki::EndEntityCert::try_from(leaf) else {
        return false;
    };
    let Ok(since_epoch) = at.duration_since(UNIX_EPOCH) else {
        return false;
    };

    let anchors = [anchor];
    let result = end_entity.verify_for_usage(
        webpki::ALL_VERIFICATION_ALGS,
        &anchors,
        intermediates,
        UnixTime::since_unix_epoch(since_epoch),
        webpki::KeyUsage::required_if_present(CODE_SIGNING_EKU),
        None,
        None,
    );
    if let Err(e) = &result {
        debug!(error = ?e, "certificate chain rejected");
    }
    result.is_ok()
}

/// Names a certificate presents, for functionary constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub common_name: Option<String>,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub emails: Vec<String>,
    pub uris: Vec<String>,
}

impl CertificateIdentity {
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        let cert = parse(der)?;
        let subject = cert.subject();

        let mut identity = CertificateIdentity {
            common_name: subject
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string),
            organizations: subject
                .iter_organization()
                .filter_map(|o| o.as_str().ok())
                .map(str::to_string)
                .collect(),
            ..Default::default()
        };

        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => identity.dns_names.push(dns.to_string()),
                    GeneralName::RFC822Name(email) => identity.emails.push(email.to_string()),
                    GeneralName::URI(uri) => identity.uris.push(uri.to_string()),
                    _ => {}
                }
            }
        }
        Ok(identity)
    }

    /// Check the constraint against these names.
    pub fn satisfies(&self, constraint: &CertConstraint) -> bool {
        let common_name = match constraint.common_name.as_deref() {
            None | Some("*") => true,
            Some(expected) => self.common_name.as_deref() == Some(expected),
        };
        common_name
            && all_present(&constraint.dns_names, &self.dns_names)
            && all_present(&constraint.emails, &self.emails)
            && all_present(&constraint.organizations, &self.organizations)
            && all_present(&constraint.uris, &self.uris)
    }
}

fn all_present(required: &[String], actual: &[String]) -> bool {
    required
        .iter()
        .all(|want| want == "*" || actual.iter().any(|have| have == want))
}

/// A functionary bound to the key or bundle it names.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedFunctionary<'a> {
    Key(&'a PublicKey),
    Bundle {
        bundle: &'a TrustBundle,
        constraint: Option<&'a CertConstraint>,
    },
}

impl ResolvedFunctionary<'_> {
    /// Does a verified identity count as this functionary?
    pub fn authorizes(&self, identity: &VerifiedIdentity) -> bool {
        match (self, identity) {
            (ResolvedFunctionary::Key(key), VerifiedIdentity::PublicKey { key_id }) => {
                key.key_id() == key_id
            }
            (
                ResolvedFunctionary::Bundle { bundle, constraint },
                VerifiedIdentity::Certificate {
                    bundles, identity, ..
                },
            ) => {
                bundles.iter().any(|b| b == bundle.id())
                    && constraint.map_or(true, |c| identity.satisfies(c))
            }
            _ => false,
        }
    }
}

/// Keys and bundles declared by one policy.
#[derive(Debug, Clone, Default)]
pub struct TrustModel {
    keys: BTreeMap<String, PublicKey>,
    bundles: BTreeMap<String, TrustBundle>,
}

impl TrustModel {
    /// Load every key and bundle the policy declares. A key that does not
    /// parse, or whose id differs from the declared one, is a configuration
    /// error, as is a malformed bundle.
    pub fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let mut keys = BTreeMap::new();
        for (id, declared) in &policy.public_keys {
            let key = PublicKey::from_pem(&declared.key).map_err(|e| PolicyError::InvalidPublicKey {
                key_id: id.clone(),
                reason: e.to_string(),
            })?;
            for claimed in [id, &declared.key_id] {
                if claimed != key.key_id() {
                    return Err(PolicyError::KeyIdMismatch {
                        declared: claimed.clone(),
                        computed: key.key_id().to_string(),
                    });
                }
            }
            keys.insert(id.clone(), key);
        }

        let mut bundles = BTreeMap::new();
        for (id, root) in &policy.roots {
            bundles.insert(
                id.clone(),
                TrustBundle::from_pem(id, &root.certificate, &root.intermediates)?,
            );
        }

        debug!(keys = keys.len(), bundles = bundles.len(), "trust model loaded");
        Ok(TrustModel { keys, bundles })
    }

    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.keys.values()
    }

    pub fn bundles(&self) -> impl Iterator<Item = &TrustBundle> {
        self.bundles.values()
    }

    pub fn key(&self, id: &str) -> Option<&PublicKey> {
        self.keys.get(id)
    }

    pub fn bundle(&self, id: &str) -> Option<&TrustBundle> {
        self.bundles.get(id)
    }

    /// Bind each of the step's functionaries. An unknown reference can
    /// never be satisfied and is reported as a configuration error.
    pub fn resolve<'a>(
        &'a self,
        step_name: &str,
        step: &'a Step,
    ) -> Result<Vec<ResolvedFunctionary<'a>>, PolicyError> {
        step.functionaries
            .iter()
            .map(|f| {
                let resolved = match f {
                    Functionary::PublicKey { public_key_id } => {
                        self.key(public_key_id).map(ResolvedFunctionary::Key)
                    }
                    Functionary::Root {
                        root_id,
                        cert_constraint,
                    } => self.bundle(root_id).map(|bundle| ResolvedFunctionary::Bundle {
                        bundle,
                        constraint: cert_constraint.as_ref(),
                    }),
                };
                resolved.ok_or_else(|| PolicyError::UnknownFunctionary {
                    step: step_name.to_string(),
                    reference: f.reference().to_string(),
                })
            })
            .collect()
    }
}
