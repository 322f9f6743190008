use crate::entity::Sender;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const GREETING: &str = "Hi! Ask me anything about our product catalog.";
pub const LOADING_TEXT: &str = "Typing...";
pub const FALLBACK_REPLY: &str = "no response received";
pub const UNREACHABLE_REPLY: &str = "unable to reach the chatbot service";

/// Upper bound on turns sent with the memory extension.
pub const HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(id: u64, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn user(id: u64, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::User)
    }

    pub fn bot(id: u64, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::Bot)
    }

    pub fn loading(id: u64) -> Self {
        Self::new(id, LOADING_TEXT, Sender::Loading)
    }

    pub fn greeting() -> Self {
        Self::bot(1, GREETING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One prior exchange entry, as the endpoint's memory extension expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryTurn {
    /// Maps a settled message to a history turn. Placeholders have no counterpart.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let role = match msg.sender {
            Sender::User => HistoryRole::User,
            Sender::Bot => HistoryRole::Assistant,
            Sender::Loading => return None,
        };
        Some(Self {
            role,
            content: msg.text.clone(),
        })
    }
}

/// The most recent settled turns of `messages`, oldest first, capped at [`HISTORY_LIMIT`].
pub fn recent_history(messages: &[Message]) -> Vec<HistoryTurn> {
    let turns: Vec<HistoryTurn> = messages.iter().filter_map(HistoryTurn::from_message).collect();
    let skip = turns.len().saturating_sub(HISTORY_LIMIT);
    turns.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_survives_json_round_trip() {
        let transcript = vec![
            Message::greeting(),
            Message::user(2, "what does the blue kettle cost?"),
            Message::bot(3, "It is $24.99."),
        ];

        let raw = serde_json::to_string(&transcript).unwrap();
        let back: Vec<Message> = serde_json::from_str(&raw).unwrap();

        assert_eq!(back, transcript);
    }

    #[test]
    fn timestamp_is_stored_as_rfc3339_string() {
        let msg = Message::user(7, "hello");
        let value = serde_json::to_value(&msg).unwrap();

        let stamp = value["timestamp"].as_str().expect("timestamp should be a string");
        let parsed = DateTime::parse_from_rfc3339(stamp).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), msg.timestamp);
        assert_eq!(value["sender"], "user");
    }

    #[test]
    fn history_skips_placeholders_and_keeps_latest_turns() {
        let mut messages = vec![Message::greeting()];
        for i in 0..20u64 {
            messages.push(Message::user(2 + i * 2, format!("q{i}")));
            messages.push(Message::bot(3 + i * 2, format!("a{i}")));
        }
        messages.push(Message::loading(100));

        let history = recent_history(&messages);

        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last().unwrap().content, "a19");
        assert_eq!(history.first().unwrap().content, "q12");
        assert_eq!(history.first().unwrap().role, HistoryRole::User);
    }

    #[test]
    fn history_role_uses_assistant_for_bot() {
        let turn = HistoryTurn::from_message(&Message::greeting()).unwrap();
        assert_eq!(serde_json::to_value(&turn).unwrap()["role"], "assistant");
        assert!(HistoryTurn::from_message(&Message::loading(4)).is_none());
    }
}
