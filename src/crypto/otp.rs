//! One-time passcode generation and verification
//!
//! Codes are six decimal digits drawn uniformly from the OS RNG. Only an
//! Argon2id PHC string of the code is ever stored; the salt and parameters
//! travel inside that string.

use argon2::{
    password_hash::{rand_core::OsRng as HashRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::types::{Result, SignerError};

/// Number of digits in a passcode
pub const CODE_LEN: usize = 6;

/// Exclusive upper bound of the code space
const CODE_SPACE: u32 = 1_000_000;

/// Largest multiple of `CODE_SPACE` that fits in a u32; draws at or above it
/// are rejected so the modulo below stays uniform.
const REJECTION_BOUND: u32 = u32::MAX - (u32::MAX % CODE_SPACE);

/// Generate a zero-padded six digit code
pub fn generate_code() -> Result<String> {
    let mut buf = [0u8; 4];
    loop {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| SignerError::Crypto(format!("OS RNG unavailable: {e}")))?;
        let draw = u32::from_le_bytes(buf);
        if draw < REJECTION_BOUND {
            return Ok(format!("{:0width$}", draw % CODE_SPACE, width = CODE_LEN));
        }
    }
}

/// Hash a code with Argon2id
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_code(code: &str) -> Result<String> {
    let salt = SaltString::generate(&mut HashRng);

    Argon2::default()
        .hash_password(code.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SignerError::Crypto(format!("Failed to hash code: {e}")))
}

/// Verify a candidate code against a stored hash
///
/// The digest comparison inside `verify_password` is constant time, and the
/// candidate is always run through the full KDF regardless of its shape.
pub fn verify_code(hash: &str, candidate: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| SignerError::Crypto(format!("Invalid code hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed_hash)
        .is_ok())
}

/// `hash_code` on the blocking pool; Argon2 is deliberately slow.
pub async fn hash_code_blocking(code: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_code(&code)).await?
}

/// `verify_code` on the blocking pool.
pub async fn verify_code_blocking(hash: String, candidate: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_code(&hash, &candidate)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code().unwrap();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_rejection_bound_is_a_multiple_of_code_space() {
        assert_eq!(REJECTION_BOUND % CODE_SPACE, 0);
        assert!(REJECTION_BOUND > u32::MAX - CODE_SPACE);
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_code("004217").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("004217"));

        assert!(verify_code(&hash, "004217").unwrap());
        assert!(!verify_code(&hash, "004218").unwrap());
        assert!(!verify_code(&hash, "4217").unwrap());
        assert!(!verify_code(&hash, "").unwrap());
    }

    #[test]
    fn test_same_code_hashes_differently() {
        let hash1 = hash_code("123456").unwrap();
        let hash2 = hash_code("123456").unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_code(&hash1, "123456").unwrap());
        assert!(verify_code(&hash2, "123456").unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(verify_code("not-a-valid-hash", "123456").is_err());
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let hash = hash_code_blocking("777000".into()).await.unwrap();
        assert!(verify_code_blocking(hash.clone(), "777000".into()).await.unwrap());
        assert!(!verify_code_blocking(hash, "777001".into()).await.unwrap());
    }
}
