//! Authentication module for API token verification.

mod extractor;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

pub use extractor::{ApiTokenAuth, AuthError};

/// The shared API token, held as a `SecretString` so it never reaches logs.
///
/// Without a configured token every request is refused.
#[derive(Clone)]
pub struct ApiToken(Option<SecretString>);

impl ApiToken {
    pub fn new(token: Option<SecretString>) -> Self {
        Self(token)
    }

    /// Compare the provided token with the configured one in constant time.
    pub fn verify(&self, provided: &str) -> bool {
        match &self.0 {
            Some(secret) => secret
                .expose_secret()
                .as_bytes()
                .ct_eq(provided.as_bytes())
                .into(),
            None => false,
        }
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => write!(f, "ApiToken([REDACTED])"),
            None => write!(f, "ApiToken(None)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matches_only_exact_token() {
        let token = ApiToken::new(Some(SecretString::from("s3cret-token".to_string())));
        assert!(token.verify("s3cret-token"));
        assert!(!token.verify("s3cret-toke"));
        assert!(!token.verify(""));
    }

    #[test]
    fn test_unset_token_refuses_everything() {
        let token = ApiToken::new(None);
        assert!(!token.verify(""));
        assert!(!token.verify("anything"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = ApiToken::new(Some(SecretString::from("s3cret-token".to_string())));
        assert_eq!(format!("{:?}", token), "ApiToken([REDACTED])");
    }
}
