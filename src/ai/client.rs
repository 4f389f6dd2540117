use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, AppError};

#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The hosted model behind the AI features.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Cheap authenticated call used to validate a key.
    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, AiError>;
    /// Returns the text of the first choice.
    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String, AiError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<serde_json::Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AiError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, AiError> {
        let response = self
            .http
            .get(self.url("models"))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|err| AiError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }
        let list = response.json::<ModelList>().await.map_err(|err| AiError::Api {
            status: status.as_u16(),
            message: format!("unreadable model list: {err}"),
        })?;
        Ok(list.data.into_iter().map(|model| model.id).collect())
    }

    async fn complete(&self, api_key: &str, request: &ChatRequest) -> Result<String, AiError> {
        tracing::debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            "sending chat completion"
        );
        let response = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| AiError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(status.as_u16(), &body);
            tracing::warn!(status = status.as_u16(), error = %err, "chat completion failed");
            return Err(err);
        }
        let data = response
            .json::<ChatResponse>()
            .await
            .map_err(|err| AiError::Api {
                status: status.as_u16(),
                message: format!("unreadable completion: {err}"),
            })?;
        data.choices
            .into_iter()
            .find_map(|choice| choice.message?.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}

/// Maps a failed HTTP exchange onto an [`AiError`] using the status code and
/// the structured `error` object, never the human-readable message.
pub fn classify_failure(status: u16, body: &str) -> AiError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let code = parsed
        .as_ref()
        .and_then(|err| err.code.as_ref())
        .and_then(|code| code.as_str());
    let kind = parsed.as_ref().and_then(|err| err.kind.as_deref());

    if status == 401 {
        return AiError::InvalidKey;
    }
    if code == Some("insufficient_quota") || kind == Some("insufficient_quota") {
        return AiError::QuotaExhausted;
    }
    if status == 429 {
        return AiError::RateLimited;
    }

    let message = parsed
        .and_then(|err| err.message)
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("request failed with status {status}")
            } else {
                trimmed.to_string()
            }
        });
    AiError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_an_invalid_key() {
        let body = r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#;
        assert!(matches!(classify_failure(401, body), AiError::InvalidKey));
    }

    #[test]
    fn quota_code_wins_over_rate_limit_status() {
        let body = concat!(
            r#"{"error":{"message":"You exceeded your current quota","#,
            r#""type":"insufficient_quota","code":"insufficient_quota"}}"#,
        );
        assert!(matches!(classify_failure(429, body), AiError::QuotaExhausted));

        let body = r#"{"error":{"message":"Slow down","type":"requests","code":null}}"#;
        assert!(matches!(classify_failure(429, body), AiError::RateLimited));
    }

    #[test]
    fn other_statuses_keep_the_api_message() {
        let body = r#"{"error":{"message":"The server had an error"}}"#;
        match classify_failure(500, body) {
            AiError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "The server had an error");
            }
            other => panic!("unexpected error: {other}"),
        }

        match classify_failure(502, "") {
            AiError::Api { message, .. } => assert_eq!(message, "request failed with status 502"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn client_joins_paths_onto_base() {
        let client = OpenAiClient::new("http://localhost:9/v1/", Duration::from_secs(1))
            .expect("client");
        assert_eq!(client.url("models"), "http://localhost:9/v1/models");
    }
}
