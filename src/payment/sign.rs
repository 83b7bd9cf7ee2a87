//! Signature primitives shared by provider adapters.
//!
//! Every adapter owns its scheme; this module only holds the building blocks:
//! canonical parameter strings, MD5 digests, RSA-SHA256 (PKCS#1 v1.5),
//! HMAC-SHA256 and AES-256-GCM envelope decryption.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::collections::BTreeMap;

use super::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// `k1=v1&k2=v2` over key-sorted params, skipping empty values and `exclude` keys.
pub fn canonical_query<'a, I>(params: I, exclude: &[&str]) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let sorted: BTreeMap<&str, &str> = params
        .into_iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Byte-wise comparison without early exit
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Private key from PEM (PKCS#8 or PKCS#1) or bare base64 DER
pub fn load_private_key(material: &str) -> Result<RsaPrivateKey, PaymentError> {
    let material = material.trim();
    let invalid = |e: String| PaymentError::ChannelConfigInvalid(format!("private key: {e}"));
    if material.starts_with("-----BEGIN") {
        return RsaPrivateKey::from_pkcs8_pem(material)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(material))
            .map_err(|e| invalid(e.to_string()));
    }
    let der = BASE64
        .decode(strip_whitespace(material))
        .map_err(|e| invalid(e.to_string()))?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
        .map_err(|e| invalid(e.to_string()))
}

/// Public key from PEM (SPKI or PKCS#1) or bare base64 DER
pub fn load_public_key(material: &str) -> Result<RsaPublicKey, PaymentError> {
    let material = material.trim();
    let invalid = |e: String| PaymentError::ChannelConfigInvalid(format!("public key: {e}"));
    if material.starts_with("-----BEGIN") {
        return RsaPublicKey::from_public_key_pem(material)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(material))
            .map_err(|e| invalid(e.to_string()));
    }
    let der = BASE64
        .decode(strip_whitespace(material))
        .map_err(|e| invalid(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| invalid(e.to_string()))
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// SHA256withRSA, base64 encoded
pub fn rsa_sign(key: &RsaPrivateKey, message: &str) -> String {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key.sign(message.as_bytes());
    BASE64.encode(signature.to_bytes())
}

pub fn rsa_verify(key: &RsaPublicKey, message: &str, signature_b64: &str) -> Result<(), PaymentError> {
    let raw = BASE64
        .decode(signature_b64.trim())
        .map_err(|_| PaymentError::SignatureInvalid("signature is not base64".into()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|_| PaymentError::SignatureInvalid("malformed RSA signature".into()))?;
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(message.as_bytes(), &signature)
        .map_err(|_| PaymentError::SignatureInvalid("RSA signature mismatch".into()))
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, PaymentError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| PaymentError::ChannelConfigInvalid(format!("hmac key: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a hex HMAC-SHA256 tag
pub fn hmac_sha256_verify_hex(key: &[u8], message: &[u8], tag_hex: &str) -> Result<(), PaymentError> {
    let tag = hex::decode(tag_hex.trim())
        .map_err(|_| PaymentError::SignatureInvalid("signature is not hex".into()))?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| PaymentError::ChannelConfigInvalid(format!("hmac key: {e}")))?;
    mac.update(message);
    mac.verify_slice(&tag)
        .map_err(|_| PaymentError::SignatureInvalid("HMAC mismatch".into()))
}

/// AES-256-GCM open of a base64 ciphertext (tag appended)
pub fn aes_gcm_decrypt(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    ciphertext_b64: &str,
) -> Result<Vec<u8>, PaymentError> {
    if nonce.len() != 12 {
        return Err(PaymentError::GatewayResponseInvalid("nonce must be 12 bytes".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| PaymentError::ChannelConfigInvalid("api v3 key must be 32 bytes".into()))?;
    let ciphertext = BASE64
        .decode(ciphertext_b64.trim())
        .map_err(|_| PaymentError::GatewayResponseInvalid("ciphertext is not base64".into()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| PaymentError::SignatureInvalid("resource decryption failed".into()))
}
