use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

const SCHEME: &str = "pbkdf2_sha256";
const SALT_BYTES: usize = 16;
const KEY_BYTES: usize = 32;

/// Encodes as `pbkdf2_sha256$<rounds>$<salt>$<key>` with base64 salt and key.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt: [u8; SALT_BYTES] = rand::random();
    let rounds = rounds.max(1);
    let key = derive_key(password, &salt, rounds);
    format!(
        "{SCHEME}${rounds}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(key)
    )
}

pub fn verify_password(password: &str, encoded: &str) -> AppResult<bool> {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::Internal("malformed password hash".to_string()));
    };
    if scheme != SCHEME {
        return Err(AppError::Internal(format!("unsupported password scheme '{scheme}'")));
    }
    let rounds: u32 = rounds
        .parse()
        .map_err(|_| AppError::Internal("malformed password hash rounds".to_string()))?;
    if rounds == 0 {
        return Err(AppError::Internal("malformed password hash rounds".to_string()));
    }
    let salt = STANDARD_NO_PAD
        .decode(salt)
        .map_err(|error| AppError::Internal(error.to_string()))?;
    let expected = STANDARD_NO_PAD
        .decode(expected)
        .map_err(|error| AppError::Internal(error.to_string()))?;

    let actual = derive_key(password, &salt, rounds);
    Ok(constant_time_eq(&actual, &expected))
}

fn derive_key(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);
    key
}

/// Length is not secret; content comparison does not short-circuit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
