//! Double-submit CSRF token primitives.
//!
//! Tokens are not stored server-side; a request is valid when the cookie value
//! and the header value are identical.

use base64::Engine;
use rand::RngCore;

/// Random bytes per token (encoded to 43 URL-safe characters).
const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random CSRF token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare a cookie token with a header token byte-for-byte in constant time.
///
/// Empty values never match.
pub fn tokens_match(cookie: &str, header: &str) -> bool {
    let (a, b) = (cookie.as_bytes(), header.as_bytes());
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn match_is_exact() {
        let t = generate_token();
        assert!(tokens_match(&t, &t.clone()));
        assert!(!tokens_match(&t, &t.to_uppercase()));
        assert!(!tokens_match(&t, &t[..10]));
        assert!(!tokens_match("", ""));
    }
}
