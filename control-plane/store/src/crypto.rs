use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kite_control_plane_core::{Error, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// AES-256-GCM cipher for secret-typed columns.
///
/// Output is base64-encoded `nonce || ciphertext || tag` so it fits in a
/// TEXT column. The key is derived from the process encryption secret with
/// SHA-256.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("cipher init: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Upstream(anyhow::anyhow!("encrypt: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let combined = BASE64
            .decode(encoded)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("base64 decode: {e}")))?;
        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Upstream(anyhow::anyhow!("ciphertext too short")));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| Error::Upstream(anyhow::anyhow!("cipher init: {e}")))?;
        let nonce = Nonce::from_slice(&combined[..NONCE_SIZE]);

        let plaintext = cipher
            .decrypt(nonce, &combined[NONCE_SIZE..])
            .map_err(|e| Error::Upstream(anyhow::anyhow!("decrypt: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| Error::Upstream(anyhow::anyhow!("utf-8: {e}")))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = SecretCipher::new("process-secret");
        let encrypted = cipher.encrypt("apiVersion: v1\nkind: Config").unwrap();
        assert_ne!(encrypted, "apiVersion: v1\nkind: Config");
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "apiVersion: v1\nkind: Config");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let encrypted = SecretCipher::new("a").encrypt("secret").unwrap();
        assert!(SecretCipher::new("b").decrypt(&encrypted).is_err());
    }

    #[test]
    fn empty_values_pass_through() {
        let cipher = SecretCipher::new("k");
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }
}
