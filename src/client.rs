use crate::chat::HistoryTurn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body posted to the query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryTurn>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: None,
            conversation_id: None,
        }
    }

    pub fn with_memory(mut self, history: Vec<HistoryTurn>, conversation_id: String) -> Self {
        self.history = Some(history);
        self.conversation_id = Some(conversation_id);
        self
    }
}

/// Reply from the query endpoint. A missing `response` field is tolerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub response: Option<String>,
}

/// Anything that can answer a question on behalf of the remote endpoint.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn ask(&self, request: &QueryRequest) -> Result<QueryResponse>;
}

pub struct HttpQueryClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpQueryClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .with_context(|| format!("Invalid query endpoint URL: {endpoint}"))?;

        // No request timeout: the call resolves whenever the transport does.
        let http = reqwest::Client::builder()
            .user_agent(concat!("chatline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn ask(&self, request: &QueryRequest) -> Result<QueryResponse> {
        debug!("-> Posting question to {}", self.endpoint);

        // `.json()` sets Content-Type: application/json
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .context("Failed to reach query endpoint")?
            .error_for_status()
            .context("Query endpoint returned an error status")?;

        let body = response
            .json::<QueryResponse>()
            .await
            .context("Failed to parse query endpoint response")?;

        debug!("<- Received reply (has response: {})", body.response.is_some());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::HistoryRole;

    #[test]
    fn plain_request_only_carries_question() {
        let value = serde_json::to_value(QueryRequest::new("hello")).unwrap();
        assert_eq!(value, serde_json::json!({ "question": "hello" }));
    }

    #[test]
    fn memory_request_carries_history_and_conversation_id() {
        let request = QueryRequest::new("and in red?").with_memory(
            vec![HistoryTurn {
                role: HistoryRole::User,
                content: "do you sell kettles?".to_string(),
            }],
            "ses_abc".to_string(),
        );
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["conversation_id"], "ses_abc");
        assert_eq!(value["history"][0]["role"], "user");
        assert_eq!(value["history"][0]["content"], "do you sell kettles?");
    }

    #[test]
    fn empty_object_parses_to_missing_response() {
        let parsed: QueryResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.response, None);
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(HttpQueryClient::new("not a url").is_err());
    }
}
