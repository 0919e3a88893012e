use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Stable key for one tenant session (a normalized phone-number-like id).
///
/// Normalization trims whitespace, drops a leading `+` and any `@server`
/// suffix. What remains must be ASCII alphanumerics, `-` or `_`, which also
/// makes the identity safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let trimmed = raw.trim();
        let local = trimmed.split('@').next().unwrap_or_default();
        let local = local.strip_prefix('+').unwrap_or(local).trim();

        if local.is_empty() {
            return Err(SessionError::InvalidIdentity(format!(
                "identity must not be empty (got {raw:?})"
            )));
        }
        if let Some(bad) = local
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionError::InvalidIdentity(format!(
                "identity contains invalid character {bad:?}"
            )));
        }

        Ok(Self(local.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe rendering: the last four characters replaced by `xxxx`.
    pub fn masked(&self) -> String {
        let keep = self.0.len().saturating_sub(4);
        format!("{}xxxx", &self.0[..keep])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plus_and_server_suffix() {
        assert_eq!(Identity::parse("628111").unwrap().as_str(), "628111");
        assert_eq!(Identity::parse(" +628111 ").unwrap().as_str(), "628111");
        assert_eq!(
            Identity::parse("628111@s.whatsapp.net").unwrap().as_str(),
            "628111"
        );
    }

    #[test]
    fn rejects_empty_and_path_like_input() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("  + ").is_err());
        assert!(Identity::parse("@g.us").is_err());
        assert!(Identity::parse("../etc/passwd").is_err());
        assert!(Identity::parse("62 811").is_err());
        assert!(Identity::parse("a/b").is_err());
    }

    #[test]
    fn masks_last_four() {
        assert_eq!(Identity::parse("628111222").unwrap().masked(), "62811xxxx");
        assert_eq!(Identity::parse("12").unwrap().masked(), "xxxx");
    }

    #[test]
    fn serde_round_trip_validates() {
        let id: Identity = serde_json::from_str("\"+628111\"").unwrap();
        assert_eq!(id.as_str(), "628111");
        assert!(serde_json::from_str::<Identity>("\"a/b\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"628111\"");
    }
}
