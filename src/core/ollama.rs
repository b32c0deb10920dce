//! On-device model served by a local Ollama runtime

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::config::TranslationSettings;
use crate::core::errors::{Result, TranslationError};
use crate::core::local::OnDeviceModel;

/// Ollama generate response wrapper
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Model pulled into, and run by, a localhost runtime
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaModel {
    pub fn new(settings: &TranslationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.local.endpoint.trim_end_matches('/').to_string(),
            model: settings.local.model.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn build_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
        format!(
            "Translate the following text from {} to {}. \
             Output only the translation, nothing else.\n\n{}",
            language_name(source_lang),
            language_name(target_lang),
            text
        )
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(TranslationError::ModelError {
            message: format!("{} failed {}: {}", action, status, body),
        })
    }
}

#[async_trait]
impl OnDeviceModel for OllamaModel {
    async fn download(&self) -> Result<()> {
        info!("Pulling model '{}'", self.model);
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "name": self.model, "stream": false }))
            .send()
            .await?;
        Self::check(response, "pull").await?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    async fn is_downloaded(&self) -> Result<bool> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, "show").await?;
        Ok(true)
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": Self::build_prompt(text, source_lang, target_lang),
                "stream": false
            }))
            .send()
            .await?;
        let response = Self::check(response, "generate").await?;

        let parsed: GenerateResponse = response.json().await?;
        let translated = parsed.response.trim().to_string();
        debug!("Local model translated {} chars", text.chars().count());
        Ok(translated)
    }
}

/// English name for a language code, for the prompt
fn language_name(code: &str) -> &str {
    match code.to_ascii_uppercase().as_str() {
        "ZH" => "Chinese",
        "EN" | "EN-US" | "EN-GB" => "English",
        "JA" => "Japanese",
        "KO" => "Korean",
        "DE" => "German",
        "FR" => "French",
        "ES" => "Spanish",
        "RU" => "Russian",
        _ => code,
    }
}
