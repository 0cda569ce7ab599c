use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;

pub const TOKEN_BYTES: usize = 16;

/// Proof of ownership for one lease acquisition.
///
/// Every release, refresh and extend is conditional on the stored token
/// matching, so a holder whose lease expired cannot touch a record that
/// another holder acquired afterwards.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HolderToken(String);

impl HolderToken {
    /// 128 random bits from the thread-local CSPRNG, URL-safe base64 encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill(&mut bytes[..]);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wraps a caller-chosen token. Callers reusing a token across obtains are
    /// asserting that both acquisitions belong to the same logical holder.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are bearer credentials for the lease; keep them out of debug logs.
impl fmt::Debug for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "HolderToken({prefix}..)")
    }
}

impl AsRef<str> for HolderToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_tokens_are_128_bit_and_url_safe() {
        let token = HolderToken::generate();
        assert_eq!(token.as_str().len(), 22);
        assert!(
            token
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        let decoded = URL_SAFE_NO_PAD.decode(token.as_str()).expect("decode");
        assert_eq!(decoded.len(), TOKEN_BYTES);
    }

    #[test]
    fn generated_tokens_do_not_repeat() {
        let tokens: HashSet<_> = (0..1000).map(|_| HolderToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn debug_output_truncates_token() {
        let token = HolderToken::from_string("abcdefghijklmnop");
        assert_eq!(format!("{token:?}"), "HolderToken(abcdef..)");
        assert_eq!(token.to_string(), "abcdefghijklmnop");
    }
}
