use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a transcript entry.
///
/// `Loading` marks the transient placeholder shown while a reply is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    Loading,
}

impl Sender {
    pub fn is_settled(self) -> bool {
        !matches!(self, Sender::Loading)
    }

    pub fn label(self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Bot => "Bot",
            Sender::Loading => "Bot",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Sender::User => "user",
            Sender::Bot => "bot",
            Sender::Loading => "loading",
        };
        f.write_str(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_serializes_as_lowercase_tag() {
        assert_eq!(serde_json::to_string(&Sender::Loading).unwrap(), "\"loading\"");
        let back: Sender = serde_json::from_str("\"bot\"").unwrap();
        assert_eq!(back, Sender::Bot);
    }

    #[test]
    fn unknown_sender_is_rejected() {
        assert!(serde_json::from_str::<Sender>("\"assistant\"").is_err());
    }
}
