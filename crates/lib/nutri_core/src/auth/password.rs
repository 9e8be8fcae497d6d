//! Password hashing via bcrypt with an application-wide pepper.

use tracing::debug;

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Cost factors bcrypt accepts.
pub const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

/// bcrypt reads at most this many bytes of input.
pub const BCRYPT_MAX_INPUT_BYTES: usize = 72;

/// Salted + peppered one-way password hasher.
///
/// The pepper is appended to the plaintext before bcrypt runs; the salt lives
/// inside the resulting hash string.
#[derive(Clone)]
pub struct PasswordHasher {
    pepper: String,
    cost: u32,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(pepper: impl Into<String>, cost: u32) -> Self {
        Self {
            pepper: pepper.into(),
            cost,
        }
    }

    fn peppered(&self, password: &str) -> String {
        format!("{password}{}", self.pepper)
    }

    /// Longest password, in bytes, that still leaves room for the pepper.
    pub fn max_password_bytes(&self) -> usize {
        BCRYPT_MAX_INPUT_BYTES.saturating_sub(self.pepper.len())
    }

    /// Hash a password. Passwords that would push the pepper past bcrypt's
    /// input limit are a `ValidationError` rather than silently truncated.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let max = self.max_password_bytes();
        if password.len() > max {
            return Err(AuthError::ValidationError(format!(
                "Password must be at most {max} bytes"
            )));
        }
        bcrypt::non_truncating_hash(self.peppered(password), self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a stored hash.
    ///
    /// A malformed hash or an overlong password counts as a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::non_truncating_verify(self.peppered(password), hash) {
            Ok(ok) => ok,
            Err(e) => {
                debug!(error = %e, "password verification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher(pepper: &str) -> PasswordHasher {
        PasswordHasher::new(pepper, 4)
    }

    #[test]
    fn verifies_matching_password() {
        let h = hasher("pepper");
        let hash = h.hash("correct-pw").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(h.verify("correct-pw", &hash));
        assert!(!h.verify("wrong-pw", &hash));
    }

    #[test]
    fn pepper_is_part_of_the_hash() {
        let hash = hasher("pepper-a").hash("correct-pw").unwrap();
        assert!(!hasher("pepper-b").verify("correct-pw", &hash));
    }

    #[test]
    fn overlong_password_is_rejected_not_truncated() {
        let h = hasher("pepper");
        assert_eq!(h.max_password_bytes(), 66);
        assert!(h.hash(&"a".repeat(66)).is_ok());
        assert!(matches!(
            h.hash(&"a".repeat(67)),
            Err(AuthError::ValidationError(_))
        ));

        // A long password must not verify against a hash of its 66-byte prefix.
        let hash = h.hash(&"a".repeat(66)).unwrap();
        assert!(!h.verify(&"a".repeat(80), &hash));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!hasher("p").verify("pw", "not-a-bcrypt-hash"));
    }
}
