//! Secret values with automatic zeroization and masked display

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of leading characters kept by [`mask`]
const PREVIEW_CHARS: usize = 8;

/// Hex characters kept from the SHA-256 digest in [`SecretString::fingerprint`]
const FINGERPRINT_CHARS: usize = 16;

/// Mask a sensitive value for logs and error messages (e.g. "Atza|IwEB...")
pub fn mask(value: &str) -> String {
    if value.is_empty() {
        return "<empty>".to_string();
    }
    let preview: String = value.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", preview)
}

/// Secret string (tokens, client secrets) - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop, Clone, PartialEq, Eq)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Masked preview safe for display
    pub fn preview(&self) -> String {
        mask(&self.value)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Stable non-reversible key for the secret (truncated SHA-256, hex)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.value.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_CHARS);
        digest
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_eight_chars() {
        assert_eq!(mask("Atza|IwEBIFakeTokenValue"), "Atza|IwE...");
        assert_eq!(mask("short"), "short...");
        assert_eq!(mask(""), "<empty>");
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::new("super-secret-refresh-token");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(secret.expose(), "super-secret-refresh-token");
        assert_eq!(secret.preview(), "super-se...");
    }

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let token = SecretString::new("client:abcdefghijklmnopqrstuvwxyz");
        let fingerprint = token.fingerprint();
        assert_eq!(fingerprint.len(), 16);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fingerprint, SecretString::new(token.expose()).fingerprint());
        assert_ne!(fingerprint, SecretString::new("client:other").fingerprint());
        assert!(!fingerprint.contains("client"));
    }
}
