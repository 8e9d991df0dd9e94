/// Password hashing and credential verification using Argon2id
///
/// Implements password hashing following OWASP recommendations:
/// - Algorithm: Argon2id (memory-hard, resistant to GPU attacks)
/// - Salt: 16 bytes random, embedded in the PHC string
/// - Verification: constant-time comparison of the derived hash
///
/// Unknown logins are verified against a dummy hash with the same
/// parameters, so a failed lookup costs as much as a wrong password.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;
use tollgate_core::PasswordConfig;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Checks login/password pairs against stored hashes
#[derive(Clone)]
pub struct CredentialVerifier {
    params: Params,
    dummy_hash: String,
}

impl CredentialVerifier {
    pub fn new(config: &PasswordConfig) -> Result<Self, PasswordError> {
        let params = Params::new(config.memory_cost, config.time_cost, config.parallelism, Some(32))
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        let dummy_password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hash_with_params(&dummy_password, params.clone())?;

        Ok(Self { params, dummy_hash })
    }

    /// Hash a plaintext password, returning a PHC string
    ///
    /// The hash includes algorithm, parameters and salt, so no separate
    /// storage is needed.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        hash_with_params(password, self.params.clone())
    }

    /// Verify a plaintext password against a stored hash
    ///
    /// * `Ok(true)` - Password matches
    /// * `Ok(false)` - Password does not match
    /// * `Err(PasswordError)` - The stored hash is unusable
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

        // Parameters are read from the PHC string itself
        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }

    /// Verify against `stored` if the user exists, otherwise burn the same
    /// amount of work on the dummy hash and report a mismatch.
    pub fn verify_or_dummy(&self, password: &str, stored: Option<&str>) -> Result<bool, PasswordError> {
        match stored {
            Some(hash) => self.verify(password, hash),
            None => {
                self.verify(password, &self.dummy_hash)?;
                Ok(false)
            }
        }
    }
}

fn hash_with_params(password: &str, params: Params) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

const MIN_PASSWORD_CHARS: usize = 8;

/// Character classes a strong password must draw from
const REQUIRED_CLASSES: &[(fn(char) -> bool, &str)] = &[
    (char::is_uppercase, "an uppercase letter"),
    (char::is_lowercase, "a lowercase letter"),
    (is_digit, "a digit"),
    (is_symbol, "a special character"),
];

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn is_symbol(c: char) -> bool {
    !c.is_alphanumeric()
}

/// Check a password against the strength policy
///
/// Only applied when `PasswordConfig::enforce_strength` is set. Returns the
/// first unmet requirement.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        ));
    }

    for (matches, class) in REQUIRED_CLASSES {
        if !password.chars().any(*matches) {
            return Err(format!("password must contain {class}"));
        }
    }

    Ok(())
}
