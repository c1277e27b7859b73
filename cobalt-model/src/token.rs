//! Credential wrapper that keeps the token out of debug output.

use std::fmt;
use std::sync::Arc;

/// An authentication token.
///
/// The `Debug` and `Display` representations are a fixed sentinel so a
/// token can never leak through a logged payload or error chain. The raw
/// value is only reachable through [`Token::expose`].
#[derive(Clone)]
pub struct Token {
    inner: Arc<str>,
    bot: bool,
}

impl Token {
    /// Wrap a bot token. `Bot ` prefixes are stripped and re-added where
    /// the REST authorization header needs them.
    pub fn bot(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let trimmed = raw.strip_prefix("Bot ").unwrap_or(raw).trim();
        Self {
            inner: Arc::from(trimmed),
            bot: true,
        }
    }

    /// Wrap a user-account token.
    pub fn user(raw: impl AsRef<str>) -> Self {
        Self {
            inner: Arc::from(raw.as_ref().trim()),
            bot: false,
        }
    }

    /// Whether this token authenticates a bot account.
    pub fn is_bot(&self) -> bool {
        self.bot
    }

    /// The raw token value, for serialization into IDENTIFY/RESUME.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// The REST authorization header value (`Bot <token>` for bots).
    pub fn authorization(&self) -> String {
        if self.bot {
            format!("Bot {}", self.inner)
        } else {
            self.inner.to_string()
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&"<token>").finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<token>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let token = Token::bot("NzI5MzYxNzc1.secret.value");
        let dump = format!("{token:?} {token}");
        assert!(!dump.contains("secret"));
        assert!(dump.contains("<token>"));
    }

    #[test]
    fn bot_prefix_normalized() {
        let token = Token::bot("Bot abc123");
        assert_eq!(token.expose(), "abc123");
        assert_eq!(token.authorization(), "Bot abc123");
    }

    #[test]
    fn user_token_has_no_prefix() {
        let token = Token::user("usertok");
        assert_eq!(token.authorization(), "usertok");
        assert!(!token.is_bot());
    }
}
