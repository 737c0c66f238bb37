use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

/// Size of the AES-256-GCM key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Bytes of entropy behind opaque bearer tokens (refresh and CI).
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Decodes the base64 master key; it must be exactly 32 bytes.
pub fn decode_key(encoded: &str) -> AppResult<[u8; KEY_SIZE]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::Message("refresh token key is not valid base64".into()))?;
    bytes
        .try_into()
        .map_err(|_| AppError::Message("refresh token key must decode to 32 bytes".into()))
}

/// Encrypts `plaintext` with a fresh random nonce, returning
/// `nonce || ciphertext`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> AppResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| AppError::Message(format!("encryption failed: {e}")))?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext` envelope produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], envelope: &[u8]) -> AppResult<Vec<u8>> {
    if envelope.len() <= NONCE_SIZE {
        return Err(AppError::Message("ciphertext envelope too short".into()));
    }
    let (nonce, ciphertext) = envelope.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| AppError::Message(format!("decryption failed: {e}")))
}

/// URL-safe opaque bearer token: 32 random bytes, base64 without padding.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Six-digit numeric verification code, zero-padded.
pub fn generate_numeric_code() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    format!("{:06}", u32::from_be_bytes(bytes) % 1_000_000)
}

/// Random 16-byte salt for code hashing.
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// `sha256(salt || code)`, hex-encoded.
pub fn hash_code(salt: &[u8], code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// sha256 hex of an opaque token, used as the stored lookup key for
/// CI bearer tokens.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time equality over byte strings of equal length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
