// crypto.rs — Public keys, key ids and signature checks
//
// Keys arrive as PEM `PUBLIC KEY` blocks (SubjectPublicKeyInfo). Ed25519 and
// ECDSA P-256 are supported; ECDSA signatures are accepted in ASN.1 DER or
// fixed-size r||s form.
//
// KEY ID: lowercase hex SHA-256 of the key's PEM encoding with LF line
// endings, so ids computed here agree with ids other tools derive from the
// same key.

use ed25519_dalek::pkcs8::DecodePublicKey as _;
use ed25519_dalek::Verifier as _;

use crate::hash;

const PUBLIC_KEY_TAG: &str = "PUBLIC KEY";

/// Errors raised while loading a public key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("expected a `PUBLIC KEY` PEM block, found `{0}`")]
    UnexpectedPemTag(String),

    #[error("unsupported or malformed public key (only Ed25519 and ECDSA P-256 are accepted)")]
    Unsupported,
}

#[derive(Debug, Clone)]
enum KeyMaterial {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

/// A parsed public key together with its key id.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key_id: String,
    spki_der: Vec<u8>,
    material: KeyMaterial,
}

impl PublicKey {
    /// Parse the first `PUBLIC KEY` block of a PEM document.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, KeyError> {
        let block = pem::parse(pem_bytes).map_err(|e| KeyError::Pem(e.to_string()))?;
        if block.tag() != PUBLIC_KEY_TAG {
            return Err(KeyError::UnexpectedPemTag(block.tag().to_string()));
        }
        Self::from_spki_der(block.contents())
    }

    /// Parse a DER SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, KeyError> {
        let material = if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
            KeyMaterial::Ed25519(key)
        } else if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
            KeyMaterial::EcdsaP256(key)
        } else {
            return Err(KeyError::Unsupported);
        };

        Ok(PublicKey {
            key_id: key_id_for_spki(der),
            spki_der: der.to_vec(),
            material,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Check `signature` over `message`. Malformed signatures simply fail.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match &self.material {
            KeyMaterial::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false),
            KeyMaterial::EcdsaP256(key) => p256::ecdsa::Signature::from_der(signature)
                .or_else(|_| p256::ecdsa::Signature::from_slice(signature))
                .map(|sig| key.verify(message, &sig).is_ok())
                .unwrap_or(false),
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.spki_der == other.spki_der
    }
}

impl Eq for PublicKey {}

/// PEM (`PUBLIC KEY`, LF line endings) of a DER SubjectPublicKeyInfo.
pub fn spki_to_pem(spki_der: &[u8]) -> String {
    let block = pem::Pem::new(PUBLIC_KEY_TAG, spki_der.to_vec());
    pem::encode_config(
        &block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Key id of a DER SubjectPublicKeyInfo.
pub fn key_id_for_spki(spki_der: &[u8]) -> String {
    hash::sha256_hex(spki_to_pem(spki_der).as_bytes())
}
