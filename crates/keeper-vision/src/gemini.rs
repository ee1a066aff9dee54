//! Gemini-backed implementation of the model adapter.
//!
//! All four pipeline RPCs plus bucket naming go through the
//! `generateContent` REST API with inline base64 media parts.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keeper_models::MediaType;

use crate::adapter::ModelAdapter;
use crate::error::{ModelError, ModelResult};
use crate::prompts;
use crate::retry::{retry_model_call, RetryConfig};
use crate::types::{BucketNameSuggestion, MediaPayload, QualityVerdict, SameTakeVerdict};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Analysis models tried in order until one answers.
const DEFAULT_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.5-flash-lite", "gemini-2.5-pro"];

/// Default image-output model for enhancement.
const DEFAULT_ENHANCE_MODEL: &str = "gemini-2.5-flash-image";

/// Configuration for the Gemini client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key
    pub api_key: String,
    /// Analysis models, tried in order
    pub models: Vec<String>,
    /// Image-output model used by `enhance`
    pub enhance_model: String,
    /// Per-call timeout
    pub call_timeout: Duration,
    /// Retries allowed per call for transient failures
    pub max_retries: u32,
}

impl GeminiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ModelResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ModelError::config_error("GEMINI_API_KEY not set"))?;

        let mut models: Vec<String> = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect();
        if let Ok(preferred) = std::env::var("GEMINI_MODEL") {
            models.retain(|m| *m != preferred);
            models.insert(0, preferred);
        }

        Ok(Self {
            api_key,
            models,
            enhance_model: std::env::var("GEMINI_ENHANCE_MODEL")
                .unwrap_or_else(|_| DEFAULT_ENHANCE_MODEL.to_string()),
            call_timeout: Duration::from_secs(
                std::env::var("GEMINI_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("GEMINI_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        })
    }
}

/// Gemini API client.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn media(payload: &MediaPayload) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: payload.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&payload.bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "inlineData", default)]
    inline_data: Option<InlineData>,
}

/// Strip a markdown code fence from model output, if present.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

impl GeminiClient {
    /// Create a new client.
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> ModelResult<Self> {
        Ok(Self::new(GeminiConfig::from_env()?))
    }

    fn retry_config(&self, operation: &str) -> RetryConfig {
        RetryConfig::new(operation).with_max_retries(self.config.max_retries)
    }

    /// Issue one `generateContent` call against a specific model.
    async fn call_model(
        &self,
        model: &str,
        parts: Vec<Part>,
        json_mode: bool,
    ) -> ModelResult<Vec<ResponsePart>> {
        let url = format!("{API_BASE}/{model}:generateContent?key={}", self.config.api_key);

        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: json_mode.then(|| GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::time::timeout(self.config.call_timeout, send)
            .await
            .map_err(|_| ModelError::Timeout(self.config.call_timeout))?
            .map_err(|e| ModelError::request_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::BadStatus { status, body });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::invalid_response(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts)
            .ok_or_else(|| ModelError::invalid_response("no candidates in response"))
    }

    /// Run a text/JSON analysis call through the fallback model list.
    async fn analyze(&self, make_parts: impl Fn() -> Vec<Part>, json_mode: bool) -> ModelResult<String> {
        let mut last_error = None;

        for model in &self.config.models {
            debug!("Calling model {}", model);
            match self.call_model(model, make_parts(), json_mode).await {
                Ok(parts) => {
                    let text = parts
                        .into_iter()
                        .find_map(|p| p.text)
                        .ok_or_else(|| ModelError::invalid_response("no text in response"))?;
                    return Ok(text);
                }
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ModelError::request_failed("no models configured")))
    }

    fn parse_json<T: serde::de::DeserializeOwned>(&self, text: &str) -> ModelResult<T> {
        serde_json::from_str(strip_code_fences(text))
            .map_err(|e| ModelError::invalid_response(format!("{e}: {text}")))
    }
}

#[async_trait]
impl ModelAdapter for GeminiClient {
    async fn describe(&self, media: &MediaPayload) -> ModelResult<String> {
        let retry = self.retry_config("describe");
        let text = retry_model_call(&retry, || {
            self.analyze(
                || vec![Part::text(prompts::DESCRIBE_PROMPT), Part::media(media)],
                false,
            )
        })
        .await?;

        Ok(text.trim().lines().next().unwrap_or_default().to_string())
    }

    async fn same_take(&self, a: &MediaPayload, b: &MediaPayload) -> ModelResult<bool> {
        let retry = self.retry_config("same_take");
        let text = retry_model_call(&retry, || {
            self.analyze(
                || {
                    vec![
                        Part::text(prompts::SAME_TAKE_PROMPT),
                        Part::media(a),
                        Part::media(b),
                    ]
                },
                true,
            )
        })
        .await?;

        let verdict: SameTakeVerdict = self.parse_json(&text)?;
        Ok(verdict.same_take)
    }

    async fn compare_quality(
        &self,
        a: &MediaPayload,
        b: &MediaPayload,
        media_type: MediaType,
    ) -> ModelResult<QualityVerdict> {
        let prompt = match media_type {
            MediaType::Image => prompts::compare_images_prompt(),
            MediaType::Video => prompts::compare_videos_prompt(),
        };

        let retry = self.retry_config("compare_quality");
        let text = retry_model_call(&retry, || {
            self.analyze(
                || vec![Part::text(prompt.as_str()), Part::media(a), Part::media(b)],
                true,
            )
        })
        .await?;

        let verdict: QualityVerdict = self.parse_json(&text)?;
        if verdict.winner != 1 && verdict.winner != 2 {
            return Err(ModelError::invalid_response(format!(
                "winner out of range: {}",
                verdict.winner
            )));
        }
        Ok(verdict.normalized())
    }

    async fn enhance(&self, media: &MediaPayload) -> ModelResult<Option<MediaPayload>> {
        let retry = self.retry_config("enhance");
        let model = self.config.enhance_model.clone();

        let parts = retry_model_call(&retry, || {
            self.call_model(
                &model,
                vec![Part::text(prompts::ENHANCE_PROMPT), Part::media(media)],
                false,
            )
        })
        .await?;

        let Some(inline) = parts.into_iter().find_map(|p| p.inline_data) else {
            info!("Enhance call returned no image part");
            return Ok(None);
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| ModelError::invalid_response(format!("bad image payload: {e}")))?;

        Ok(Some(MediaPayload::new(bytes, inline.mime_type)))
    }

    async fn name_bucket(&self, labels: &[String]) -> ModelResult<String> {
        let prompt = prompts::name_bucket_prompt(labels);
        let retry = self.retry_config("name_bucket");
        let text = retry_model_call(&retry, || {
            self.analyze(|| vec![Part::text(prompt.as_str())], true)
        })
        .await?;

        let suggestion: BucketNameSuggestion = self.parse_json(&text)?;
        let name = suggestion.name.trim().to_string();
        if name.is_empty() {
            return Err(ModelError::invalid_response("empty bucket name"));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_request_serialization_inline_media() {
        let payload = MediaPayload::new(vec![1, 2, 3], "image/jpeg");
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part::text("hi"), Part::media(&payload)],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""text":"hi""#));
        assert!(json.contains(r#""inlineData""#));
        assert!(json.contains(r#""mimeType":"image/jpeg""#));
        assert!(json.contains(r#""responseMimeType":"application/json""#));
    }

    #[test]
    fn test_response_with_image_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"inlineData":{"mimeType":"image/png","data":"AQID"}}
        ]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let inline = parsed.candidates[0].content.parts[0]
            .inline_data
            .as_ref()
            .unwrap();
        assert_eq!(inline.mime_type, "image/png");
    }
}
