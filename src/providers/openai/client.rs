use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::models::{CompletionRequest, ErrorBody, ModelList, WireMessage};
use super::stream::consume_sse_stream;
use crate::models::Role;
use crate::providers::context::SessionContext;
use crate::providers::types::{
    BackendError, ChatMessage, GenerateOutcome, GenerationOptions, StreamEvent,
};

/// HTTP client for an OpenAI-compatible completions endpoint. Used for both
/// hosted APIs and the local engine server.
pub struct CompletionClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => req.header("Authorization", format!("Bearer {}", key)),
            _ => req,
        }
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::AuthError("Invalid API key".to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(BackendError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }
        Ok(response)
    }

    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let req = self.authorize(self.client.get(self.endpoint("v1/models")));
        let response = req.send().await.map_err(|e| {
            BackendError::NetworkError(format!("Failed to connect to {}: {}", self.base_url, e))
        })?;
        let response = Self::check_status(response).await?;

        let model_list: ModelList = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse model list: {}", e))
        })?;
        Ok(model_list.data.into_iter().map(|m| m.id).collect())
    }

    /// `true` once the server answers its health check with success.
    pub async fn health(&self) -> bool {
        match self.client.get(self.endpoint("health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn stream_chat(
        &self,
        request: &CompletionRequest<'_>,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<GenerateOutcome, BackendError> {
        let req = self.authorize(
            self.client
                .post(self.endpoint("v1/chat/completions"))
                .header("content-type", "application/json")
                .json(request),
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(GenerateOutcome { aborted: true, ..Default::default() });
            }
            response = req.send() => {
                response.map_err(|e| BackendError::NetworkError(e.to_string()))?
            }
        };
        let response = Self::check_status(response).await?;

        consume_sse_stream(response, tx, cancel).await
    }
}

fn translate_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

/// Streaming request for `messages`, led by the configured system prompt
/// unless it is blank.
pub fn build_request<'a>(
    options: &'a GenerationOptions,
    messages: &'a [ChatMessage],
) -> CompletionRequest<'a> {
    let system = options
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .map(|prompt| WireMessage {
            role: translate_role(Role::System),
            content: prompt,
        });

    let wire = system
        .into_iter()
        .chain(messages.iter().map(|m| WireMessage {
            role: translate_role(m.role),
            content: &m.content,
        }))
        .collect();

    CompletionRequest {
        model: &options.model,
        messages: wire,
        stream: true,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    }
}

/// One full `generate` cycle against a session: claim the single generation
/// slot, stream the reply, and commit the exchange unless it failed. A turn
/// cancelled before it starts leaves the session untouched.
pub async fn run_turn(
    session: &SessionContext,
    client: &CompletionClient,
    options: &GenerationOptions,
    prompt: &str,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<GenerateOutcome, BackendError> {
    if !session.is_ready() {
        return Err(BackendError::NotReady);
    }
    if cancel.is_cancelled() {
        tracing::info!("Generation stopped before it started");
        return Ok(GenerateOutcome {
            aborted: true,
            ..Default::default()
        });
    }
    let turn = session.begin(prompt, cancel)?;
    let request = build_request(options, &turn.messages);

    let outcome = client.stream_chat(&request, &tx, &turn.cancel).await?;
    if outcome.aborted {
        tracing::info!("Generation stopped after {} bytes", outcome.response.len());
    }
    turn.commit(&outcome.response);
    Ok(outcome)
}
