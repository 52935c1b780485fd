// fixtures.rs — Test fixtures: throwaway keys, certificate chains, signed
// envelopes and statements

use std::collections::BTreeMap;

use ed25519_dalek::pkcs8::EncodePublicKey as _;
use ed25519_dalek::Signer as _;
use p256::pkcs8::DecodePrivateKey as _;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose,
};
use rustls_pki_types::CertificateDer;
use serde_json::{json, Value};

use crate::attest::envelope::{Envelope, Signature, IN_TOTO_PAYLOAD_TYPE};
use crate::attest::policy::{Policy, PolicyPublicKey, PolicyRoot};
use crate::attest::signatures::VerifiedIdentity;
use crate::attest::statement::{Statement, VerifiedStatement, STATEMENT_TYPE_V1};
use crate::attest::trust::TrustModel;
use crate::crypto::{self, PublicKey};

/// Anything that can sign an envelope in a test.
pub trait TestSigner {
    fn sign(&self, message: &[u8]) -> Vec<u8>;
    fn public_pem(&self) -> String;

    fn public_key(&self) -> PublicKey {
        PublicKey::from_pem(self.public_pem().as_bytes()).unwrap()
    }

    fn key_id(&self) -> String {
        self.public_key().key_id().to_string()
    }
}

pub struct Ed25519Signer(ed25519_dalek::SigningKey);

impl Ed25519Signer {
    pub fn generate() -> Self {
        Ed25519Signer(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }
}

impl TestSigner for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.0.sign(message).to_bytes().to_vec()
    }

    fn public_pem(&self) -> String {
        let der = self.0.verifying_key().to_public_key_der().unwrap();
        crypto::spki_to_pem(der.as_bytes())
    }
}

/// P-256 signer producing DER signatures.
pub struct EcdsaSigner(p256::ecdsa::SigningKey);

impl EcdsaSigner {
    pub fn generate() -> Self {
        EcdsaSigner(p256::ecdsa::SigningKey::random(&mut OsRng))
    }

    /// Fixed-size r||s signature instead of DER.
    pub fn sign_fixed(&self, message: &[u8]) -> Vec<u8> {
        let sig: p256::ecdsa::Signature = self.0.sign(message);
        sig.to_bytes().to_vec()
    }
}

impl TestSigner for EcdsaSigner {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: p256::ecdsa::Signature = self.0.sign(message);
        sig.to_der().as_bytes().to_vec()
    }

    fn public_pem(&self) -> String {
        let der = self.0.verifying_key().to_public_key_der().unwrap();
        crypto::spki_to_pem(der.as_bytes())
    }
}

/// Sign `payload` with each signer, in order.
pub fn sign_envelope(payload_type: &str, payload: &[u8], signers: &[&dyn TestSigner]) -> Envelope {
    let message = crate::attest::envelope::pae(payload_type, payload);
    Envelope {
        payload: payload.to_vec(),
        payload_type: payload_type.to_string(),
        signatures: signers
            .iter()
            .map(|s| Signature {
                keyid: Some(s.key_id()),
                sig: s.sign(&message),
                certificate: None,
                intermediates: vec![],
            })
            .collect(),
    }
}

/// Attach `leaf`'s certificate, and the given intermediates, to every
/// signature of `envelope`.
pub fn with_certificate(mut envelope: Envelope, leaf: &TestLeaf, intermediates: &[&TestCa]) -> Envelope {
    for sig in &mut envelope.signatures {
        sig.keyid = None;
        sig.certificate = Some(leaf.pem().into_bytes());
        sig.intermediates = intermediates.iter().map(|ca| ca.pem().into_bytes()).collect();
    }
    envelope
}

/// A policy holding the given keys and root bundles, with no steps.
pub fn trust_policy(keys: &[&dyn TestSigner], roots: &[(&str, &TestCa)]) -> Policy {
    Policy {
        expires: None,
        public_keys: keys
            .iter()
            .map(|k| {
                (
                    k.key_id(),
                    PolicyPublicKey {
                        key_id: k.key_id(),
                        key: k.public_pem().into_bytes(),
                    },
                )
            })
            .collect(),
        roots: roots
            .iter()
            .map(|(id, ca)| {
                (
                    id.to_string(),
                    PolicyRoot {
                        certificate: ca.pem().into_bytes(),
                        intermediates: vec![],
                    },
                )
            })
            .collect(),
        steps: BTreeMap::new(),
    }
}

pub fn trust_model(keys: &[&dyn TestSigner], roots: &[(&str, &TestCa)]) -> TrustModel {
    TrustModel::from_policy(&trust_policy(keys, roots)).unwrap()
}

/// In-toto statement JSON. Subjects and materials are sha256 digests.
pub fn statement_json(predicate_type: &str, subjects: &[&str], materials: &[&str]) -> Value {
    json!({
        "_type": STATEMENT_TYPE_V1,
        "subject": subjects
            .iter()
            .enumerate()
            .map(|(i, d)| json!({ "name": format!("artifact-{}", i), "digest": { "sha256": d } }))
            .collect::<Vec<_>>(),
        "predicateType": predicate_type,
        "predicate": {
            "materials": materials
                .iter()
                .map(|d| json!({ "uri": "input", "digest": { "sha256": d } }))
                .collect::<Vec<_>>(),
        },
    })
}

/// A signed in-toto envelope around [`statement_json`].
pub fn signed_statement(
    predicate_type: &str,
    subjects: &[&str],
    materials: &[&str],
    signers: &[&dyn TestSigner],
) -> Envelope {
    let payload = statement_json(predicate_type, subjects, materials).to_string();
    sign_envelope(IN_TOTO_PAYLOAD_TYPE, payload.as_bytes(), signers)
}

/// A statement as the evaluator sees it, verified by the given key ids.
pub fn verified(
    predicate_type: &str,
    subjects: &[&str],
    materials: &[&str],
    key_ids: &[&str],
) -> VerifiedStatement {
    let payload = statement_json(predicate_type, subjects, materials).to_string();
    VerifiedStatement {
        statement: Statement::from_slice(payload.as_bytes()).unwrap(),
        verifiers: key_ids
            .iter()
            .map(|k| VerifiedIdentity::PublicKey {
                key_id: k.to_string(),
            })
            .collect(),
        origin: format!("test:{}", predicate_type),
    }
}

/// A certificate authority (root or intermediate).
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

fn name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Example Builds");
    dn
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    params
}

impl TestCa {
    /// A self-signed root.
    pub fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name).self_signed(&key).unwrap();
        TestCa { cert, key }
    }

    /// An intermediate CA issued by this one.
    pub fn intermediate(&self, common_name: &str) -> TestCa {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name)
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        TestCa { cert, key }
    }

    /// A code-signing leaf issued by this CA.
    pub fn leaf(&self, common_name: &str, dns_names: &[&str]) -> TestLeaf {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(dns_names.iter().map(|d| d.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.distinguished_name = name(common_name);
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();

        let signing = p256::ecdsa::SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap();
        TestLeaf {
            cert,
            signer: EcdsaSigner(signing),
        }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }
}

/// A leaf certificate and its signing key.
pub struct TestLeaf {
    cert: rcgen::Certificate,
    signer: EcdsaSigner,
}

impl TestLeaf {
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }
}

impl TestSigner for TestLeaf {
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signer.sign(message)
    }

    fn public_pem(&self) -> String {
        self.signer.public_pem()
    }
}
