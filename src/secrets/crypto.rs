use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{bail, Context, Result};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const PBKDF2_MARKER: &str = "TAKO_ENCRYPTED_V1:";
const ARGON2_MARKER: &str = "TAKO_PASSPHRASE_V1:";

const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT_LEN: usize = 32;
const ARGON2_SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Envelope {
    salt: String,
    nonce: String,
    ciphertext: String,
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn unb64(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .context("invalid base64 in secrets envelope")
}

fn derive_key_pbkdf2(passphrase: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn derive_key_argon2(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let params = Params::new(64 * 1024, 3, 4, Some(KEY_LEN))
        .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("argon2 key derivation failed: {}", e))?;
    Ok(key)
}

fn seal(key: &[u8; KEY_LEN], plaintext: &str) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("encryption failed: {}", e))?;

    Ok((ciphertext, nonce_bytes))
}

fn unseal(key: &[u8; KEY_LEN], nonce_bytes: &[u8], ciphertext: &[u8]) -> Result<String> {
    if nonce_bytes.len() != NONCE_LEN {
        bail!("wrong passphrase or corrupted data");
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("wrong passphrase or corrupted data"))?;

    String::from_utf8(plaintext).context("wrong passphrase or corrupted data")
}

/// `EncryptWithPassphrase`: Argon2id-derived key, `TAKO_PASSPHRASE_V1:`
/// marker. This is the default path used by the `secrets` CLI surface.
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<String> {
    let mut salt = [0u8; ARGON2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_key_argon2(passphrase, &salt)?;
    let (ciphertext, nonce) = seal(&key, plaintext)?;

    let envelope = Envelope {
        salt: b64(&salt),
        nonce: b64(&nonce),
        ciphertext: b64(&ciphertext),
    };

    Ok(format!("{}{}", ARGON2_MARKER, serde_json::to_string(&envelope)?))
}

/// `DecryptWithPassphrase`. Dispatches on the marker prefix so
/// both `TAKO_PASSPHRASE_V1:` (Argon2id) and `TAKO_ENCRYPTED_V1:` (PBKDF2)
/// payloads can be read back with the same entry point.
pub fn decrypt(payload: &str, passphrase: &str) -> Result<String> {
    if let Some(body) = payload.strip_prefix(ARGON2_MARKER) {
        let envelope: Envelope = serde_json::from_str(body).context("malformed secrets envelope")?;
        let salt = unb64(&envelope.salt)?;
        let nonce = unb64(&envelope.nonce)?;
        let ciphertext = unb64(&envelope.ciphertext)?;
        let key = derive_key_argon2(passphrase, &salt)?;
        return unseal(&key, &nonce, &ciphertext);
    }

    if let Some(body) = payload.strip_prefix(PBKDF2_MARKER) {
        let envelope: Envelope = serde_json::from_str(body).context("malformed secrets envelope")?;
        let salt = unb64(&envelope.salt)?;
        let nonce = unb64(&envelope.nonce)?;
        let ciphertext = unb64(&envelope.ciphertext)?;
        let key = derive_key_pbkdf2(passphrase, &salt);
        return unseal(&key, &nonce, &ciphertext);
    }

    bail!("unrecognized secrets envelope: missing TAKO_ENCRYPTED_V1:/TAKO_PASSPHRASE_V1: marker");
}

/// PBKDF2-SHA256 variant (`TAKO_ENCRYPTED_V1:`), kept for environments that
/// set a faster KDF deliberately.
pub fn encrypt_pbkdf2(plaintext: &str, passphrase: &str) -> Result<String> {
    let mut salt = [0u8; PBKDF2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_key_pbkdf2(passphrase, &salt);
    let (ciphertext, nonce) = seal(&key, plaintext)?;

    let envelope = Envelope {
        salt: b64(&salt),
        nonce: b64(&nonce),
        ciphertext: b64(&ciphertext),
    };

    Ok(format!("{}{}", PBKDF2_MARKER, serde_json::to_string(&envelope)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_round_trip() {
        let encrypted = encrypt("s3cret", "correct horse").unwrap();
        assert!(encrypted.starts_with(ARGON2_MARKER));
        assert_eq!(decrypt(&encrypted, "correct horse").unwrap(), "s3cret");
    }

    #[test]
    fn argon2_wrong_passphrase_errors() {
        let encrypted = encrypt("s3cret", "correct horse").unwrap();
        let err = decrypt(&encrypted, "wrong").unwrap_err();
        assert!(err.to_string().contains("wrong passphrase or corrupted data"));
    }

    #[test]
    fn pbkdf2_round_trip() {
        let encrypted = encrypt_pbkdf2("other secret", "hunter2").unwrap();
        assert!(encrypted.starts_with(PBKDF2_MARKER));
        assert_eq!(decrypt(&encrypted, "hunter2").unwrap(), "other secret");
    }

    #[test]
    fn rejects_unmarked_payload() {
        let err = decrypt("not a valid envelope", "pw").unwrap_err();
        assert!(err.to_string().contains("marker"));
    }
}
