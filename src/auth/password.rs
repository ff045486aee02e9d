//! PBKDF2 password hashing

use crate::utils::TubeloadError;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
const SALT_BYTES: usize = 16;

/// `bytes` random bytes, hex encoded
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn generate_salt() -> String {
    random_hex(SALT_BYTES)
}

/// Hash `password` with `salt`. The salt string's bytes are the KDF salt.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    URL_SAFE.encode(key)
}

pub fn verify_password(password: &str, salt: &str, expected: &str) -> bool {
    let computed = hash_password(password, salt);
    computed.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// `hash_password` on the blocking pool, off the async workers
pub async fn hash_password_blocking(password: &str, salt: &str) -> Result<String, TubeloadError> {
    let (password, salt) = (password.to_owned(), salt.to_owned());
    tokio::task::spawn_blocking(move || hash_password(&password, &salt))
        .await
        .map_err(|e| TubeloadError::Internal(e.into()))
}

/// `verify_password` on the blocking pool, off the async workers
pub async fn verify_password_blocking(
    password: &str,
    salt: &str,
    expected: &str,
) -> Result<bool, TubeloadError> {
    let (password, salt, expected) = (password.to_owned(), salt.to_owned(), expected.to_owned());
    tokio::task::spawn_blocking(move || verify_password(&password, &salt, &expected))
        .await
        .map_err(|e| TubeloadError::Internal(e.into()))
}
