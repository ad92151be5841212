use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Form;
use futures::StreamExt;
use providers::relay::{FailureReason, DEFAULT_CHANNEL_CAPACITY};
use providers::{ChannelSink, ChatError, OpenAIClient, RelayDriver, RelayOutcome, RelayState};
use shared::agent_api::ChatRequest;
use std::convert::Infallible;

use super::error::ApiError;
use crate::state::AppState;

/// Chat request body, accepted as JSON or urlencoded form. A body of any
/// other type, or an empty one, reads as an empty request.
pub struct ChatPayload(pub ChatRequest);

impl<S> FromRequest<S> for ChatPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::InvalidBody(e.body_text()))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Self(ChatRequest::default()));
            }
            let body = serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::InvalidBody(e.to_string()))?;
            Ok(Self(body))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(body) = Form::<ChatRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::InvalidBody(e.body_text()))?;
            Ok(Self(body))
        } else {
            Ok(Self(ChatRequest::default()))
        }
    }
}

/// Base URL the client used to reach us, for turning upload paths into
/// absolute image links.
fn host_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

/// POST /api/chat
///
/// Errors found before the first fragment reaches the client come back as
/// JSON, including an upstream that fails mid-read before producing any text.
/// After that, the response is a plain-text stream of assistant text that
/// simply ends, however the relay finishes.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    ChatPayload(request): ChatPayload,
) -> Result<Response, ApiError> {
    let client = OpenAIClient::from_settings(state.http.clone(), &state.settings)?;
    if request.is_empty() {
        return Err(ChatError::EmptyRequest.into());
    }

    let messages = client.conversation(request.user_content(&host_url(&headers)));
    let upstream = client.open_stream(&messages).await?;

    let (sink, body) = ChannelSink::channel(DEFAULT_CHANNEL_CAPACITY);
    let driver = RelayDriver::new(sink).with_read_timeout(state.settings.upstream_read_timeout);
    let relay = tokio::spawn(async move {
        let outcome = driver.run(upstream.bytes_stream()).await;
        tracing::info!(
            state = ?outcome.state,
            fragments = outcome.fragments,
            bytes = outcome.bytes,
            "relay finished"
        );
        outcome
    });

    // Headers are held back until there is text to send. The body only ends
    // once the driver has finished, so its outcome is ready when it does.
    let mut body = Box::pin(body);
    let first = match body.next().await {
        Some(first) => first,
        None => {
            let outcome = relay
                .await
                .map_err(|e| ApiError::Internal(format!("relay task failed: {}", e)))?;
            if let Some(error) = failed_before_first_fragment(&outcome) {
                return Err(error.into());
            }
            String::new()
        }
    };

    let stream = futures::stream::once(async move { first })
        .filter(|chunk| futures::future::ready(!chunk.is_empty()))
        .chain(body);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream.map(Ok::<_, Infallible>)))
        .map_err(|e| ApiError::Internal(format!("failed to build stream response: {}", e)))
}

/// An upstream failure with nothing forwarded yet is reported as an error
/// response instead of an empty stream.
fn failed_before_first_fragment(outcome: &RelayOutcome) -> Option<ChatError> {
    if outcome.fragments > 0 {
        return None;
    }
    match &outcome.state {
        RelayState::Failed(FailureReason::UpstreamRead(message)) => {
            Some(ChatError::UpstreamUnreachable(message.clone()))
        }
        RelayState::Failed(FailureReason::UpstreamTimeout) => Some(
            ChatError::UpstreamUnreachable("upstream read timed out".to_string()),
        ),
        _ => None,
    }
}
