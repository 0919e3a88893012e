use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const INDIVIDUAL_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Individual,
    Group,
}

/// Classified recipient of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    kind: DestinationKind,
    id: String,
}

impl Destination {
    /// Classify a raw recipient string.
    ///
    /// Any `@server` suffix is discarded; group ids are `<creator>-<timestamp>`
    /// pairs, so a hyphen marks a group and everything else is an individual.
    /// Only the empty string is rejected.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::InvalidDestination(
                "destination must not be empty".to_string(),
            ));
        }
        let id = raw.split('@').next().unwrap_or_default().trim();

        let kind = if id.contains('-') {
            DestinationKind::Group
        } else {
            DestinationKind::Individual
        };

        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_group(&self) -> bool {
        self.kind == DestinationKind::Group
    }

    /// Protocol-level address (`id@server`).
    pub fn address(&self) -> String {
        let server = match self.kind {
            DestinationKind::Individual => INDIVIDUAL_SERVER,
            DestinationKind::Group => GROUP_SERVER,
        };
        format!("{}@{server}", self.id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_id_is_group() {
        let dest = Destination::parse("628111-1580000000").unwrap();
        assert_eq!(dest.kind(), DestinationKind::Group);
        assert_eq!(dest.address(), "628111-1580000000@g.us");
    }

    #[test]
    fn plain_number_is_individual() {
        let dest = Destination::parse("628111").unwrap();
        assert_eq!(dest.kind(), DestinationKind::Individual);
        assert_eq!(dest.address(), "628111@s.whatsapp.net");
    }

    #[test]
    fn server_suffix_is_replaced_by_classification() {
        let dest = Destination::parse("628111@g.us").unwrap();
        assert_eq!(dest.kind(), DestinationKind::Individual);
        assert_eq!(dest.id(), "628111");

        let dest = Destination::parse("628111-99@s.whatsapp.net").unwrap();
        assert!(dest.is_group());
    }

    #[test]
    fn classification_is_total_over_non_empty_input() {
        for raw in [
            "a", "-", "x-", "-x", "a-b-c", "🙂", "12 34", "a--b", "@g.us", "@", "   ",
        ] {
            let dest = Destination::parse(raw).unwrap();
            assert_eq!(dest.is_group(), raw.contains('-'), "input {raw:?}");
            assert_eq!(Destination::parse(raw).unwrap(), dest);
        }
    }

    #[test]
    fn only_empty_destination_rejected() {
        assert!(Destination::parse("").is_err());

        let dest = Destination::parse("@g.us").unwrap();
        assert_eq!(dest.kind(), DestinationKind::Individual);
        assert_eq!(dest.id(), "");
        assert!(!Destination::parse("   ").unwrap().is_group());
    }
}
