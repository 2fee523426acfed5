use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vendi_core::config::LlmConfig;
use vendi_core::llm::extract_json_object;
use vendi_core::{CompletionOptions, ModelClient, ModelError};

/// Ollama-backed model client. Text and structured completion run
/// against the configured generation model; image analysis runs
/// against the vision model with the image inlined as base64.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    vision_model: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        vision_model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|err| ModelError::Backend(format!("http client init failed: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            vision_model: vision_model.into(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| ModelError::Backend("ollama base_url is not configured".to_string()))?;
        Self::new(base_url, &config.model, &config.vision_model, config.timeout_secs)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        images: Option<Vec<String>>,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let request = GenerateRequest {
            model,
            prompt,
            temperature: options.temperature,
            stream: false,
            images,
            options: GenerateOptions { top_p: 0.9, num_predict: options.max_tokens },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|err| ModelError::Backend(format!("ollama request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(ModelError::Backend(format!(
                "ollama API error: {}",
                response.status().as_u16()
            )));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|err| ModelError::Backend(format!("ollama response decode failed: {err}")))?;
        Ok(data.response.trim().to_string())
    }

    async fn image_as_base64(&self, image_ref: &str) -> Result<String, ModelError> {
        let engine = base64::engine::general_purpose::STANDARD;

        if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
            let response = self
                .http
                .get(image_ref)
                .send()
                .await
                .map_err(|err| ModelError::Backend(format!("unable to fetch image: {err}")))?;
            if !response.status().is_success() {
                return Err(ModelError::Backend(format!(
                    "unable to fetch image: {}",
                    response.status().as_u16()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| ModelError::Backend(format!("unable to read image: {err}")))?;
            return Ok(engine.encode(bytes));
        }

        let bytes = tokio::fs::read(image_ref)
            .await
            .map_err(|err| ModelError::Backend(format!("unable to read image file: {err}")))?;
        Ok(engine.encode(bytes))
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        self.generate(&self.model, prompt, None, options).await
    }

    async fn complete_json(
        &self,
        prompt: &str,
        schema: &Value,
        options: &CompletionOptions,
    ) -> Result<Value, ModelError> {
        let schema_text = serde_json::to_string_pretty(schema)
            .map_err(|err| ModelError::Backend(format!("schema encode failed: {err}")))?;
        let json_prompt =
            format!("{prompt}\n\nRespond in valid JSON format matching this schema:\n{schema_text}");

        let response = self.generate(&self.model, &json_prompt, None, options).await?;
        extract_json_object(&response)
            .ok_or_else(|| ModelError::Malformed(truncate(&response, 200)))
    }

    async fn analyze_image(
        &self,
        image_ref: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let image = self.image_as_base64(image_ref).await?;
        self.generate(&self.vision_model, prompt, Some(vec![image]), options).await
    }

    fn supports_structured(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        true
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}
