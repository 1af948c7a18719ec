//! Blocking client for OpenAI-compatible chat and image endpoints.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, ImageGenerator, ImageRequest, TextGenerator};

/// One HTTP client serving both capabilities against the same base URL.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    chat_endpoint: String,
    images_endpoint: String,
}

impl OpenAiClient {
    /// Builds a client for `base_url` (e.g. `http://127.0.0.1:8045/v1`).
    ///
    /// The API key is optional because local proxies often run without one.
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!base_url.trim().is_empty(), "missing LLM base URL");
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            let auth = format!("Bearer {key}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).context("invalid LLM API key")?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build LLM HTTP client")?;
        let base = base_url.trim().trim_end_matches('/');
        Ok(Self {
            client,
            chat_endpoint: format!("{base}/chat/completions"),
            images_endpoint: format!("{base}/images/generations"),
        })
    }
}

impl TextGenerator for OpenAiClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<Option<String>> {
        let body = ChatRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.user,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.chat_endpoint)
            .json(&body)
            .send()
            .context("failed to call chat completions")?;
        let resp = ensure_success(resp, "chat completions")?;
        let parsed: ChatResponse = resp.json().context("failed to parse chat response")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

impl ImageGenerator for OpenAiClient {
    fn generate(&self, request: &ImageRequest<'_>) -> Result<Option<String>> {
        let body = ImageGenerationRequest {
            model: request.model,
            prompt: request.prompt,
            size: request.size,
            quality: request.quality,
            n: 1,
            response_format: "b64_json",
        };
        let resp = self
            .client
            .post(&self.images_endpoint)
            .json(&body)
            .send()
            .context("failed to call image generations")?;
        let resp = ensure_success(resp, "image generations")?;
        let parsed: ImageGenerationResponse =
            resp.json().context("failed to parse image response")?;
        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|entry| entry.b64_json))
    }
}

fn ensure_success(resp: Response, endpoint: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    bail!("{endpoint} returned {status}: {text}");
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u8,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Option<Vec<ImageData>>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}
