use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{ContentPart, GenerationModel, ModelRequest, ModelTask, RawContent};
use crate::config::EngineConfig;
use crate::error::truncate_text;

/// Gemini `generateContent` backend for both text and image tasks.
pub struct GeminiModel {
    api_base: String,
    api_key: String,
    http: HttpClient,
    timeout_s: f64,
    max_retries: usize,
    retry_backoff_s: f64,
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: HttpClient::new(),
            timeout_s: config.request_timeout_s,
            max_retries: config.transport_retries,
            retry_backoff_s: 1.2,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &ModelRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": [{ "text": request.user_prompt }],
            }]),
        );
        if let Some(system_prompt) = request.system_prompt.as_ref() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system_prompt }] }),
            );
        }

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(request.temperature));
        match &request.task {
            ModelTask::GenerateImage { aspect_ratio } => {
                generation_config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
                if let Some(aspect_ratio) = aspect_ratio.as_ref() {
                    generation_config.insert(
                        "imageConfig".to_string(),
                        json!({ "aspectRatio": aspect_ratio }),
                    );
                }
            }
            task if task.wants_json() => {
                generation_config
                    .insert("responseMimeType".to_string(), json!("application/json"));
            }
            _ => {}
        }
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        Value::Object(payload)
    }

    fn post_with_transport_retries(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", self.api_key.as_str())])
                .timeout(Duration::from_secs_f64(self.timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        "Gemini transport retry after transient request failure"
                    );
                    let delay_s = self.retry_backoff_s * attempt as f64;
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }
    }

    /// Maps candidate parts to raw content. Inline image data becomes a rich
    /// `image_url` part carrying a data URI.
    fn extract_parts(response_payload: &Value) -> Result<Vec<ContentPart>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(ContentPart::Text(text.to_string()));
                    continue;
                }
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                out.push(ContentPart::Rich(json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                })));
            }
        }

        if out.is_empty() {
            let reason = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            bail!("Gemini returned no content ({reason})");
        }
        Ok(out)
    }
}

impl GenerationModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn invoke(&self, request: &ModelRequest) -> Result<RawContent> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        debug!(model = %request.model, task = request.task.name(), "Gemini request");
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let parts = Self::extract_parts(&response_payload)
            .with_context(|| format!("Gemini {} call returned nothing usable", request.task.name()))?;
        Ok(RawContent::Parts(parts))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}
