//! HMAC-SHA256 session ID signing.
//!
//! A signed ID has the form `<base36-random>.<hex-hmac-sha256>`, the MAC
//! being computed over the random part with the configured secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{HttpError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an HMAC-SHA256 tag.
const SIGNATURE_LEN: usize = 64;

/// Signs and verifies session IDs under one secret.
#[derive(Clone)]
pub struct SessionSigner {
    mac: HmacSha256,
}

impl SessionSigner {
    /// Key a signer with `secret`.
    pub fn new(secret: &str) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| HttpError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Hex HMAC of `token`.
    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        format!("{:x}", mac.finalize().into_bytes())
    }

    /// `token.signature`.
    pub fn signed_id(&self, token: &str) -> String {
        format!("{token}.{}", self.sign(token))
    }

    /// A signed ID over a fresh random token.
    pub fn fresh_id(&self) -> String {
        self.signed_id(&random_token())
    }

    /// Whether `id` is a well-formed signed ID under this secret.
    pub fn verify(&self, id: &str) -> bool {
        let Some((token, signature)) = id.rsplit_once('.') else {
            return false;
        };
        if token.is_empty() {
            return false;
        }
        let Some(signature) = decode_hex(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSigner(..)")
    }
}

/// A base36 random token.
pub fn random_token() -> String {
    base36(rand::random::<u64>())
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Decode a signature as rendered by [`SessionSigner::sign`]: exactly 64
/// lowercase hex digits.
fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() != SIGNATURE_LEN || !text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
