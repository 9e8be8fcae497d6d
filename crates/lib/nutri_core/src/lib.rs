//! # nutri_core
//!
//! Authentication and session-security core for Nutrilog.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
