//! # Credentials
//!
//! Password hashing and the account naming rules.
//!
//! Hashes are scrypt PHC strings (`$scrypt$ln=..,r=..,p=..$salt$hash`) with a fresh
//! random salt each time. The cost parameters travel inside the string, so hashes made
//! with an older work factor still verify after the configured one changes.
//! Derived keys are compared in constant time by `password_hash`.
use std::sync::LazyLock;

use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use regex::Regex;
use scrypt::{Params, Scrypt};
use thiserror::Error;

pub const DEFAULT_LOG_N: u8 = 15;
const BLOCK_SIZE: u32 = 8;
const PARALLELISM: u32 = 1;
const KEY_LEN: usize = 32;

pub const MIN_PASSWORD_LEN: usize = 8;

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").expect("valid username regex"));
static UPPERCASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]").expect("valid uppercase regex"));
static LOWERCASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z]").expect("valid lowercase regex"));
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").expect("valid digit regex"));
static SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[@$!%*?&#]").expect("valid special regex"));

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid scrypt parameters: {0}")]
    InvalidParams(String),

    #[error("Password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    params: Params,
}

impl Credentials {
    pub fn new(log_n: u8) -> Result<Self, CredentialError> {
        let params = Params::new(log_n, BLOCK_SIZE, PARALLELISM, KEY_LEN)
            .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;

        Ok(Self { params })
    }

    pub fn hash(&self, secret: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);

        Scrypt
            .hash_password_customized(secret.as_bytes(), None, None, self.params, &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }
}

/// A malformed stored hash counts as a mismatch.
pub fn verify(stored_hash: &str, supplied_secret: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Scrypt
            .verify_password(supplied_secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn check_username(username: &str) -> Result<(), &'static str> {
    if USERNAME.is_match(username) {
        Ok(())
    } else {
        Err("must be 3-64 characters of letters, digits, '_', '.' or '-'")
    }
}

pub fn check_password_strength(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err("must be at least 8 characters long");
    }
    if !UPPERCASE.is_match(password) {
        return Err("must contain at least one uppercase letter");
    }
    if !LOWERCASE.is_match(password) {
        return Err("must contain at least one lowercase letter");
    }
    if !DIGIT.is_match(password) {
        return Err("must contain at least one number");
    }
    if !SPECIAL.is_match(password) {
        return Err("must contain at least one special character (@$!%*?&#)");
    }

    Ok(())
}
