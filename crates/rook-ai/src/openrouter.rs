use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, parse_retry_after_ms, provider_retry_delay_ms,
        should_retry_status,
    },
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, RookAiError,
};

pub const DEFAULT_OPENROUTER_MODEL: &str = "openrouter/auto";
const DEFAULT_OPENROUTER_X_TITLE: &str = "rook issue agent";
const GENERATION_COST_HEADER: &str = "x-openrouter-generation-cost";

#[derive(Debug, Clone)]
/// Public struct `OpenRouterConfig` used across Rook components.
pub struct OpenRouterConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub x_title: Option<String>,
    pub http_referer: Option<String>,
}

impl OpenRouterConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            request_timeout_ms: 300_000,
            max_retries: 0,
            x_title: None,
            http_referer: None,
        }
    }
}

#[derive(Debug, Clone)]
/// OpenAI-compatible chat completion client pointed at OpenRouter.
pub struct OpenRouterClient {
    client: reqwest::Client,
    config: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self, RookAiError> {
        if config.api_key.trim().is_empty() {
            return Err(RookAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                RookAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let title = config
            .x_title
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENROUTER_X_TITLE.to_string());
        headers.insert(
            "X-Title",
            HeaderValue::from_str(&title).map_err(|e| {
                RookAiError::InvalidResponse(format!("invalid OpenRouter X-Title header: {e}"))
            })?,
        );
        if let Some(referer) = config.http_referer.as_deref() {
            headers.insert(
                "HTTP-Referer",
                HeaderValue::from_str(referer).map_err(|e| {
                    RookAiError::InvalidResponse(format!(
                        "invalid OpenRouter HTTP-Referer header: {e}"
                    ))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RookAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self
                .client
                .post(&url)
                .header("x-rook-request-id", new_request_id())
                .header("x-rook-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let header_cost = parse_generation_cost(response.headers());
                        let raw = response.text().await?;
                        let parsed = parse_chat_response(&raw, header_cost, &request.model)?;
                        tracing::info!(
                            model = %parsed.model,
                            input_tokens = parsed.usage.input_tokens,
                            output_tokens = parsed.usage.output_tokens,
                            total_tokens = parsed.usage.total_tokens,
                            cost_usd = parsed.usage.cost_usd,
                            "assistant completion usage"
                        );
                        return Ok(parsed);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = provider_retry_delay_ms(attempt, retry_after_ms);
                        tracing::debug!(
                            status = status.as_u16(),
                            attempt,
                            backoff_ms,
                            "retrying assistant request"
                        );
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }

                    return Err(RookAiError::HttpStatus {
                        status: status.as_u16(),
                        body: extract_error_message(&raw),
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms = provider_retry_delay_ms(attempt, None);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    return Err(RookAiError::Http(error));
                }
            }
        }

        Err(RookAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_generation_cost(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(GENERATION_COST_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
}

fn extract_error_message(raw: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(envelope) if !envelope.error.message.trim().is_empty() => envelope.error.message,
        _ => raw.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenRouterChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenRouterUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    cost: Option<f64>,
}

fn parse_chat_response(
    raw: &str,
    header_cost: Option<f64>,
    requested_model: &str,
) -> Result<ChatResponse, RookAiError> {
    let parsed: OpenRouterChatResponse = serde_json::from_str(raw)?;
    let choice =
        parsed.choices.into_iter().next().ok_or_else(|| {
            RookAiError::InvalidResponse("response contained no choices".to_string())
        })?;

    let usage = parsed.usage.unwrap_or_default();
    let cost_usd = match header_cost.or(usage.cost) {
        Some(cost) => cost,
        None => {
            tracing::warn!("assistant response carried no cost data; recording zero cost");
            0.0
        }
    };
    let total_tokens = if usage.total_tokens == 0 {
        usage.prompt_tokens.saturating_add(usage.completion_tokens)
    } else {
        usage.total_tokens
    };

    Ok(ChatResponse {
        message: Message::assistant_text(choice.message.content.unwrap_or_default()),
        model: parsed
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| requested_model.to_string()),
        finish_reason: choice.finish_reason,
        usage: ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens,
            cost_usd,
        },
    })
}
