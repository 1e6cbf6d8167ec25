//! Detachable message signatures
//!
//! The digest covers the RFC 8785 canonical form of the message document with
//! the `signatures` property removed, minus the message type's non-canonical
//! properties, optionally restricted to the properties named by the signature's
//! field selector. Ed25519 signs the SHA-256 of that canonical text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::digest::{digest, SHA256};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::codec::{CustomSerializers, FromJson, JsonObject, ObjectWriter, ParseError, ToJson};
use super::types::CustomData;

pub const SIGNATURES_PROPERTY: &str = "signatures";
pub const ED25519_METHOD: &str = "Ed25519";
pub const JCS_ENCODING: &str = "JCS";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signed document must be a JSON object")]
    NotAnObject,

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
}

/// One detached signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    key_id: String,
    value: String,
    signing_method: String,
    encoding_method: String,
    fields: Option<Vec<String>>,
    custom_data: Option<CustomData>,
}

impl Signature {
    /// Base64 of the signer's public key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Base64 of the signature bytes.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn signing_method(&self) -> &str {
        &self.signing_method
    }

    pub fn encoding_method(&self) -> &str {
        &self.encoding_method
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn custom_data(&self) -> Option<&CustomData> {
        self.custom_data.as_ref()
    }
}

impl FromJson for Signature {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let object = JsonObject::new(value)?;
        let key_id = object.mandatory::<String>("keyId")?;
        let signature = object.mandatory::<String>("value")?;
        let signing_method = object
            .optional::<String>("signingMethod")?
            .unwrap_or_else(|| ED25519_METHOD.to_string());
        let encoding_method = object
            .optional::<String>("encodingMethod")?
            .unwrap_or_else(|| JCS_ENCODING.to_string());
        let fields = object
            .get("fields")
            .map(|v| {
                v.as_array()
                    .ok_or_else(|| ParseError::new("fields", "expected an array"))?
                    .iter()
                    .enumerate()
                    .map(|(i, f)| String::from_json(f).map_err(|e| e.within(&format!("fields[{i}]"))))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let custom_data = object.optional::<CustomData>("customData")?;
        Ok(Self {
            key_id,
            value: signature,
            signing_method,
            encoding_method,
            fields,
            custom_data,
        })
    }
}

impl ToJson for Signature {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        ObjectWriter::new::<Self>(custom)
            .field("keyId", Value::String(self.key_id.clone()))
            .field("value", Value::String(self.value.clone()))
            .field("signingMethod", Value::String(self.signing_method.clone()))
            .field("encodingMethod", Value::String(self.encoding_method.clone()))
            .optional(
                "fields",
                self.fields
                    .as_ref()
                    .map(|f| Value::Array(f.iter().cloned().map(Value::String).collect())),
            )
            .optional("customData", self.custom_data.as_ref().map(|c| c.to_json(custom)))
            .finish(self)
    }
}

/// Signature multiset.
///
/// Kept sorted so that equality and hashing do not depend on the order in
/// which signers appended their signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signatures(Vec<Signature>);

impl Signatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, signature: Signature) -> Self {
        let mut list = self.0.clone();
        list.push(signature);
        list.sort();
        Self(list)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Signature> {
        self.0.iter()
    }
}

impl FromIterator<Signature> for Signatures {
    fn from_iter<I: IntoIterator<Item = Signature>>(iter: I) -> Self {
        let mut list: Vec<_> = iter.into_iter().collect();
        list.sort();
        Self(list)
    }
}

impl<'a> IntoIterator for &'a Signatures {
    type Item = &'a Signature;
    type IntoIter = std::slice::Iter<'a, Signature>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromJson for Signatures {
    fn from_json(value: &Value) -> Result<Self, ParseError> {
        let items = value
            .as_array()
            .ok_or_else(|| ParseError::value("expected an array"))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| Signature::from_json(item).map_err(|e| e.within(&format!("[{i}]"))))
            .collect()
    }
}

impl ToJson for Signatures {
    fn to_json(&self, custom: &CustomSerializers) -> Value {
        Value::Array(self.0.iter().map(|s| s.to_json(custom)).collect())
    }
}

/// Digest over the canonical, signable part of a document.
pub fn canonical_digest(
    document: &Value,
    non_canonical: &[&str],
    selector: Option<&[String]>,
) -> Result<Vec<u8>, SignatureError> {
    let Value::Object(map) = document else {
        return Err(SignatureError::NotAnObject);
    };
    let signable: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNATURES_PROPERTY)
        .filter(|(key, _)| !non_canonical.contains(&key.as_str()))
        .filter(|(key, _)| selector.map_or(true, |fields| fields.iter().any(|f| f == *key)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let bytes = serde_jcs::to_vec(&Value::Object(signable))
        .map_err(|e| SignatureError::Canonicalization(e.to_string()))?;
    Ok(digest(&SHA256, &bytes).as_ref().to_vec())
}

/// Ed25519 signing key
pub struct SigningKey {
    pair: Ed25519KeyPair,
}

impl SigningKey {
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, SignatureError> {
        let pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self { pair })
    }

    pub fn from_pkcs8(der: &[u8]) -> Result<Self, SignatureError> {
        let pair =
            Ed25519KeyPair::from_pkcs8_maybe_unchecked(der).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self { pair })
    }

    pub fn key_id(&self) -> String {
        BASE64.encode(self.pair.public_key().as_ref())
    }

    pub fn sign_document(
        &self,
        document: &Value,
        non_canonical: &[&str],
        fields: Option<Vec<String>>,
    ) -> Result<Signature, SignatureError> {
        let digest = canonical_digest(document, non_canonical, fields.as_deref())?;
        let value = BASE64.encode(self.pair.sign(&digest).as_ref());
        Ok(Signature {
            key_id: self.key_id(),
            value,
            signing_method: ED25519_METHOD.to_string(),
            encoding_method: JCS_ENCODING.to_string(),
            fields,
            custom_data: None,
        })
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").field("key_id", &self.key_id()).finish()
    }
}

/// Outcome of checking one signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureVerification {
    pub key_id: String,
    pub valid: bool,
}

fn verify_one(document: &Value, non_canonical: &[&str], signature: &Signature) -> bool {
    if signature.signing_method != ED25519_METHOD || signature.encoding_method != JCS_ENCODING {
        debug!(key_id = %signature.key_id, method = %signature.signing_method, "unsupported signature method");
        return false;
    }
    let (Ok(public_key), Ok(value)) = (BASE64.decode(&signature.key_id), BASE64.decode(&signature.value)) else {
        return false;
    };
    let Ok(digest) = canonical_digest(document, non_canonical, signature.fields()) else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(&digest, &value)
        .is_ok()
}

/// Checks every signature against the document it arrived in.
pub fn verify_document(
    document: &Value,
    non_canonical: &[&str],
    signatures: &Signatures,
) -> Vec<SignatureVerification> {
    signatures
        .iter()
        .map(|signature| SignatureVerification {
            key_id: signature.key_id.clone(),
            valid: verify_one(document, non_canonical, signature),
        })
        .collect()
}

/// Whether a receiver insists on signed messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignaturePolicy {
    pub require_signatures: bool,
}

impl SignaturePolicy {
    pub fn evaluate(&self, verifications: &[SignatureVerification]) -> Result<(), String> {
        if let Some(failed) = verifications.iter().find(|v| !v.valid) {
            return Err(format!("signature of key '{}' failed verification", failed.key_id));
        }
        if self.require_signatures && verifications.is_empty() {
            return Err("message is not signed".to_string());
        }
        Ok(())
    }
}

/// Messages that can carry detached signatures
pub trait Signable: Sized {
    /// Document the signatures are computed over.
    fn signable_document(&self) -> Value;

    fn non_canonical_fields(&self) -> &'static [&'static str];

    fn signatures(&self) -> &Signatures;

    fn with_signature(&self, signature: Signature) -> Self;

    fn sign(&self, key: &SigningKey) -> Result<Self, SignatureError> {
        self.sign_fields(key, None)
    }

    fn sign_fields(&self, key: &SigningKey, fields: Option<Vec<String>>) -> Result<Self, SignatureError> {
        let signature = key.sign_document(&self.signable_document(), self.non_canonical_fields(), fields)?;
        Ok(self.with_signature(signature))
    }

    fn verify_signatures(&self) -> Vec<SignatureVerification> {
        verify_document(&self.signable_document(), self.non_canonical_fields(), self.signatures())
    }
}
