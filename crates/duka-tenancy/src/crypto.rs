use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, TenancyError};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 24;

/// At-rest encryption for tenant gateway credentials, webhook payloads, and
/// global-party phone numbers.
///
/// Ciphertext layout: `hex(nonce || aead_ciphertext)`. The deterministic
/// `index_hash` is a keyed HMAC used where equality lookups or uniqueness
/// constraints are needed on encrypted values (sender numbers, phones) —
/// the plaintext never lands in an index.
pub struct SecretBox {
    cipher: XChaCha20Poly1305,
    index_key: Vec<u8>,
}

impl SecretBox {
    /// `key` must be at least 32 bytes; validated at config load.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() < 32 {
            return Err(TenancyError::Crypto(
                "encryption key must be at least 32 bytes".to_string(),
            ));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..32])
            .map_err(|e| TenancyError::Crypto(e.to_string()))?;
        Ok(Self {
            cipher,
            index_key: key.to_vec(),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| TenancyError::Crypto(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = hex::decode(stored)
            .map_err(|_| TenancyError::Crypto("ciphertext is not valid hex".to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(TenancyError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce, ct) = raw.split_at(NONCE_LEN);
        let pt = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ct)
            .map_err(|_| TenancyError::Crypto("decryption failed".to_string()))?;
        String::from_utf8(pt)
            .map_err(|_| TenancyError::Crypto("decrypted value is not UTF-8".to_string()))
    }

    /// Deterministic keyed hash for lookups on encrypted columns.
    pub fn index_hash(&self, value: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.index_key)
            .expect("HMAC accepts any key length");
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_box() -> SecretBox {
        SecretBox::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let sb = secret_box();
        let ct = sb.encrypt("+254700000001").unwrap();
        assert_ne!(ct, "+254700000001");
        assert_eq!(sb.decrypt(&ct).unwrap(), "+254700000001");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let sb = secret_box();
        let a = sb.encrypt("secret").unwrap();
        let b = sb.encrypt("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn index_hash_is_deterministic_and_keyed() {
        let sb = secret_box();
        assert_eq!(sb.index_hash("+254700000001"), sb.index_hash("+254700000001"));
        let other = SecretBox::new(&[9u8; 32]).unwrap();
        assert_ne!(sb.index_hash("+254700000001"), other.index_hash("+254700000001"));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let sb = secret_box();
        let mut ct = sb.encrypt("secret").unwrap();
        let tail = ct.split_off(ct.len() - 2);
        ct.push_str(if tail == "aa" { "bb" } else { "aa" });
        assert!(sb.decrypt(&ct).is_err());
    }

    #[test]
    fn short_key_rejected() {
        assert!(SecretBox::new(&[1u8; 16]).is_err());
    }
}
