use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/query";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: String,
    pub db_path: PathBuf,
    pub send_history: bool,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup("CHATLINE_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        // We use ~/.chatline/chatline.db unless told otherwise
        let db_path = match lookup("CHATLINE_DB").filter(|v| !v.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = lookup("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir).join(".chatline").join("chatline.db")
            }
        };

        let send_history = match lookup("CHATLINE_SEND_HISTORY") {
            None => false,
            Some(raw) => parse_flag(&raw)?,
        };

        Ok(Self {
            endpoint,
            db_path,
            send_history,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => bail!("CHATLINE_SEND_HISTORY must be a boolean, got {other:?}"),
    }
}
