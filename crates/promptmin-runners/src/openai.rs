use crate::retry::{parse_retry_after, run_with_retry, AttemptError, RetryPolicy};
use promptmin_core::{
    extract_prompt_messages, redact_secrets, Oracle, OracleError, OracleRequest, PromptRole,
};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_ERROR_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    pub base_url: String,
    pub api_key_env: String,
    pub retry: RetryPolicy,
}

/// Oracle backed by the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiResponsesOracle {
    settings: OpenAiSettings,
    base_url: String,
    http: Client,
}

#[derive(Serialize)]
struct InputMessage {
    role: PromptRole,
    content: String,
}

#[derive(Serialize)]
struct RequestMetadata<'a> {
    test_id: &'a str,
    trial_index: u32,
    trial_count: u32,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage>,
    temperature: f64,
    max_output_tokens: u32,
    metadata: RequestMetadata<'a>,
}

impl OpenAiResponsesOracle {
    pub fn new(settings: OpenAiSettings) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| OracleError::new(format!("failed to build http client: {err}")))?;
        Ok(Self {
            base_url: trim_trailing_slash(&settings.base_url),
            settings,
            http,
        })
    }

    fn api_key(&self) -> Result<String, OracleError> {
        std::env::var(&self.settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                OracleError::new(format!(
                    "missing OpenAI API key env: {}",
                    self.settings.api_key_env
                ))
            })
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| OracleError::new("API key is not a valid header value"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn request_body<'a>(&'a self, request: &OracleRequest<'a>) -> ResponsesRequest<'a> {
        let mut input = extract_prompt_messages(request.document)
            .messages
            .into_iter()
            .map(|message| InputMessage {
                role: message.role,
                content: message.content,
            })
            .collect::<Vec<_>>();
        input.push(InputMessage {
            role: PromptRole::User,
            content: request.test.user_input(),
        });
        ResponsesRequest {
            model: &self.settings.model,
            input,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            metadata: RequestMetadata {
                test_id: &request.test.id,
                trial_index: request.trial_index,
                trial_count: request.trial_count,
            },
        }
    }

    fn send_once(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &ResponsesRequest<'_>,
    ) -> Result<String, AttemptError> {
        let response = self
            .http
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .map_err(|err| self.transport_error(&err))?;

        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
        );
        let text = response.text().map_err(|err| self.transport_error(&err))?;

        if !status.is_success() {
            let message = format!(
                "openai_responses http {}: {}",
                status.as_u16(),
                truncate_chars(&redact_secrets(&text), MAX_ERROR_CHARS)
            );
            return Err(if should_retry_status(status) {
                AttemptError::Retryable {
                    message,
                    retry_after,
                }
            } else {
                AttemptError::Fatal(message)
            });
        }

        let parsed = serde_json::from_str::<Value>(&text).map_err(|err| {
            AttemptError::Fatal(format!("openai_responses invalid json response: {err}"))
        })?;
        Ok(extract_output_text(&parsed))
    }

    fn transport_error(&self, err: &reqwest::Error) -> AttemptError {
        if err.is_timeout() {
            return AttemptError::Retryable {
                message: format!(
                    "openai_responses timeout after {}ms",
                    self.settings.timeout.as_millis()
                ),
                retry_after: None,
            };
        }
        let message = format!("openai_responses request failed: {err}");
        if err.is_connect() {
            AttemptError::Retryable {
                message,
                retry_after: None,
            }
        } else {
            AttemptError::Fatal(message)
        }
    }
}

impl Oracle for OpenAiResponsesOracle {
    fn identity(&self) -> Value {
        json!({
            "type": "openai_responses",
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "max_output_tokens": self.settings.max_output_tokens,
            "base_url": self.base_url,
        })
    }

    fn execute(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let api_key = self.api_key()?;
        let headers = self.headers(&api_key)?;
        let body = self.request_body(request);
        let url = format!("{}/responses", self.base_url);
        run_with_retry(&self.settings.retry, |_| {
            self.send_once(&url, &headers, &body)
        })
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn trim_trailing_slash(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Output text of a Responses API payload: `output_text`, else every
/// `output[].content[].text` joined, else a top-level `text`.
pub fn extract_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }
    let parts = response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>();
    if !parts.is_empty() {
        return parts.concat();
    }
    response
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
