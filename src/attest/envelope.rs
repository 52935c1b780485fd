// envelope.rs — DSSE envelopes
//
// An envelope carries an opaque payload, its type, and detached signatures
// over `PAE(payloadType, payload)`. Byte fields travel as base64; standard
// and URL-safe alphabets are both accepted on input, standard is written.
// Certificate-based signers attach their PEM certificate (and any
// intermediates) to the signature itself.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::attest::error::EnvelopeError;

/// Payload type of in-toto statements.
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    pub payload_type: String,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Unauthenticated hint; never used to pick or skip a verifier. Written
    /// back whenever it was present, even when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    #[serde(with = "b64")]
    pub sig: Vec<u8>,
    /// PEM signer certificate.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub certificate: Option<Vec<u8>>,
    /// PEM intermediates presented by the signer.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "b64_list")]
    pub intermediates: Vec<Vec<u8>>,
}

impl Envelope {
    /// Parse and structurally validate an envelope.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }

    fn validate(&self) -> Result<(), EnvelopeError> {
        if self.payload_type.is_empty() {
            return Err(EnvelopeError::Decode("empty payloadType".to_string()));
        }
        if self.payload.is_empty() {
            return Err(EnvelopeError::Decode("missing payload".to_string()));
        }
        if self.signatures.is_empty() {
            return Err(EnvelopeError::Decode("no signatures".to_string()));
        }
        if let Some(i) = self.signatures.iter().position(|s| s.sig.is_empty()) {
            return Err(EnvelopeError::Decode(format!("signature {} is empty", i)));
        }
        Ok(())
    }

    /// The bytes every signature covers.
    pub fn pae(&self) -> Vec<u8> {
        pae(&self.payload_type, &self.payload)
    }
}

/// DSSE pre-authentication encoding:
/// `"DSSEv1" SP LEN(type) SP type SP LEN(body) SP body`.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    );
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_any(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD
        .decode(s)
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
}

pub(crate) mod b64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        decode_any(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) if !s.is_empty() => decode_any(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

pub(crate) mod b64_list {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&STANDARD.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Option::<Vec<String>>::deserialize(d)?
            .unwrap_or_default()
            .iter()
            .map(|s| decode_any(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        format!(
            r#"{{"payload":"{}","payloadType":"{}","signatures":[{{"keyid":"k1","sig":"{}"}}]}}"#,
            STANDARD.encode(br#"{"hello":"world"}"#),
            IN_TOTO_PAYLOAD_TYPE,
            STANDARD.encode([7u8; 64]),
        )
    }

    #[test]
    fn pae_matches_dsse_vector() {
        // Vector from the DSSE protocol description.
        let encoded = pae("http://example.com/HelloWorld", b"hello world");
        assert_eq!(
            encoded,
            b"DSSEv1 29 http://example.com/HelloWorld 11 hello world".to_vec()
        );
    }

    #[test]
    fn decode_then_encode_reproduces_input() {
        let json = sample_json();
        let env = Envelope::from_json(json.as_bytes()).unwrap();
        assert_eq!(env.payload, br#"{"hello":"world"}"#.to_vec());
        assert_eq!(env.signatures[0].keyid.as_deref(), Some("k1"));
        assert_eq!(env.to_json().unwrap(), json);
    }

    #[test]
    fn empty_keyid_is_written_back() {
        let json = format!(
            r#"{{"payload":"{}","payloadType":"t","signatures":[{{"keyid":"","sig":"{}"}}]}}"#,
            STANDARD.encode(b"x"),
            STANDARD.encode([1u8; 8]),
        );
        let env = Envelope::from_json(json.as_bytes()).unwrap();
        assert_eq!(env.signatures[0].keyid.as_deref(), Some(""));
        assert_eq!(env.to_json().unwrap(), json);
    }

    #[test]
    fn accepts_url_safe_base64() {
        let payload = vec![0xfb, 0xff, 0xfe];
        let json = format!(
            r#"{{"payload":"{}","payloadType":"t","signatures":[{{"sig":"{}"}}]}}"#,
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode([0xffu8; 8]),
        );
        let env = Envelope::from_json(json.as_bytes()).unwrap();
        assert_eq!(env.payload, payload);
        assert_eq!(env.signatures[0].sig, vec![0xff; 8]);
    }

    #[test]
    fn missing_payload_is_a_decode_error() {
        let json = r#"{"payloadType":"t","signatures":[{"sig":"AAAA"}]}"#;
        assert!(matches!(
            Envelope::from_json(json.as_bytes()),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn empty_signature_list_is_a_decode_error() {
        let json = format!(
            r#"{{"payload":"{}","payloadType":"t","signatures":[]}}"#,
            STANDARD.encode(b"x")
        );
        let err = Envelope::from_json(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no signatures"));
    }

    #[test]
    fn unparseable_signature_encoding_is_a_decode_error() {
        let json = format!(
            r#"{{"payload":"{}","payloadType":"t","signatures":[{{"sig":"***"}}]}}"#,
            STANDARD.encode(b"x")
        );
        assert!(matches!(
            Envelope::from_json(json.as_bytes()),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn certificate_fields_survive_round_trip() {
        let env = Envelope {
            payload: b"body".to_vec(),
            payload_type: "t".to_string(),
            signatures: vec![Signature {
                keyid: None,
                sig: vec![1, 2, 3],
                certificate: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
                intermediates: vec![b"int".to_vec()],
            }],
        };
        let json = env.to_json().unwrap();
        assert!(!json.contains("keyid"));
        assert_eq!(Envelope::from_json(json.as_bytes()).unwrap(), env);
    }
}
