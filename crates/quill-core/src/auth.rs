//! Password hashing collaborator.
//!
//! Digests are opaque and one-way; only the settings layer and the CLI
//! facade touch them.

use thiserror::Error;

/// Errors from the hashing backend.
#[derive(Error, Debug)]
pub enum AuthError {
    /// bcrypt failure (invalid cost, malformed digest).
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Hash a plaintext password into an opaque digest.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(plain, bcrypt::DEFAULT_COST)?)
}

/// Check a plaintext password against a stored digest.
pub fn verify_password(plain: &str, digest: &str) -> Result<bool, AuthError> {
    Ok(bcrypt::verify(plain, digest)?)
}
