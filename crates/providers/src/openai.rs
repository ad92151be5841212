use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use shared::agent_api::ChatMessage;
use shared::settings::RelaySettings;
use std::time::Duration;

use crate::error::ChatError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream error bodies are cut to this many characters before being
/// handed to the client.
const ERROR_DETAIL_LIMIT: usize = 800;

/// HTTP client shared by all relay operations.
///
/// Only connecting is bounded. A whole-request timeout would cut off long
/// generations mid-stream.
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

// ── Streaming response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Option<Vec<OpenAIStreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: Option<OpenAIStreamDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text fragment from one streamed payload.
///
/// `Ok(None)` covers valid chunks without content (role-only, usage, empty
/// `choices`). `Err` means the payload is not a JSON object of the expected
/// shape; callers skip it.
pub fn decode_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: OpenAIStreamResponse = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty()))
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OpenAIClient {
    http: Client,
    auth_token: String,
    model: String,
    base_url: String,
    temperature: f32,
    system_prompt: String,
}

impl OpenAIClient {
    pub fn from_settings(http: Client, settings: &RelaySettings) -> Result<Self, ChatError> {
        let auth_token = settings
            .openai_api_key
            .clone()
            .ok_or(ChatError::MissingApiKey)?;

        Ok(Self {
            http,
            auth_token,
            model: settings.openai_model.clone(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            temperature: settings.temperature,
            system_prompt: settings.system_prompt.clone(),
        })
    }

    /// System prompt followed by a single user turn.
    pub fn conversation(&self, user_content: impl Into<String>) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(user_content),
        ]
    }

    /// Send a streaming completion request and return the live response once
    /// upstream has answered with a success status.
    ///
    /// Nothing has been written downstream when this fails, so every error
    /// here becomes a structured response rather than a truncated stream.
    pub async fn open_stream(&self, messages: &[ChatMessage]) -> Result<Response, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let req = OpenAIRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: true,
        };
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "OpenAI request failed");
                ChatError::UpstreamUnreachable(e.to_string())
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let mut details: String = body.chars().take(ERROR_DETAIL_LIMIT).collect();
            if details.trim().is_empty() {
                details = status.to_string();
            }
            tracing::error!(%status, %details, "OpenAI error");
            return Err(ChatError::UpstreamStatus {
                status: status.as_u16(),
                details,
            });
        }

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(base_url: &str) -> RelaySettings {
        RelaySettings {
            openai_api_key: Some("sk-test".into()),
            openai_base_url: base_url.to_string(),
            ..RelaySettings::default()
        }
    }

    #[test]
    fn test_decode_content() {
        let delta = decode_delta(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#).unwrap();
        assert_eq!(delta.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_decode_without_content() {
        assert_eq!(decode_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(decode_delta(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(), None);
        assert_eq!(decode_delta(r#"{"choices":[{"delta":{"content":null}}]}"#).unwrap(), None);
        assert_eq!(decode_delta(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(decode_delta(r#"{"usage":{"total_tokens":9}}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_uses_first_choice() {
        let payload = r#"{"choices":[{"delta":{"content":"a"}},{"delta":{"content":"b"}}]}"#;
        assert_eq!(decode_delta(payload).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_delta("not-json").is_err());
        assert!(decode_delta(r#"{"choices":[{"delta":{"con"#).is_err());
        assert!(decode_delta("").is_err());
    }

    #[test]
    fn test_missing_api_key() {
        let settings = RelaySettings::default();
        let http = build_http_client().unwrap();
        assert!(matches!(
            OpenAIClient::from_settings(http, &settings),
            Err(ChatError::MissingApiKey)
        ));
    }

    #[test]
    fn test_conversation_has_system_prompt() {
        let client =
            OpenAIClient::from_settings(build_http_client().unwrap(), &settings_for("http://x"))
                .unwrap();
        let messages = client.conversation("hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "You are a helpful assistant.");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "hi");
    }

    #[tokio::test]
    async fn test_open_stream_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
            .mount(&server)
            .await;

        let client =
            OpenAIClient::from_settings(build_http_client().unwrap(), &settings_for(&server.uri()))
                .unwrap();
        let resp = client.open_stream(&client.conversation("hi")).await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_open_stream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client =
            OpenAIClient::from_settings(build_http_client().unwrap(), &settings_for(&server.uri()))
                .unwrap();
        match client.open_stream(&client.conversation("hi")).await {
            Err(ChatError::UpstreamStatus { status, details }) => {
                assert_eq!(status, 401);
                assert_eq!(details, "invalid api key");
            }
            other => panic!("expected upstream status error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_open_stream_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = OpenAIClient::from_settings(
            build_http_client().unwrap(),
            &settings_for(&format!("http://127.0.0.1:{}", port)),
        )
        .unwrap();
        assert!(matches!(
            client.open_stream(&client.conversation("hi")).await,
            Err(ChatError::UpstreamUnreachable(_))
        ));
    }
}
