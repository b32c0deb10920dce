//! Remote machine-translation engine
//!
//! One form-encoded POST per batch. The batch is sent as a single separator
//! joined `text` field; the reply is read positionally, either one
//! translation per segment or one translation that still carries the
//! separators.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::batching::{join_batch, split_joined};
use crate::core::engine::{BatchTranslation, CredentialUsage, EngineContext, TranslationEngine};
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{char_len, EngineKind};

/// HTTP engine billed against the credential pool
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    translations: Vec<ProviderTranslation>,
}

#[derive(Debug, Deserialize)]
struct ProviderTranslation {
    text: String,
    #[serde(default)]
    detected_source_language: Option<String>,
}

impl RemoteEngine {
    /// Create an engine with a pooled HTTP client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self::with_client(client))
    }

    /// Reuse an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send actual HTTP request
    async fn send_request(
        &self,
        joined: &str,
        key: &str,
        ctx: EngineContext<'_>,
    ) -> Result<Vec<ProviderTranslation>> {
        let settings = ctx.settings;
        let form = [
            ("target_lang", settings.target_lang.as_str()),
            ("source_lang", settings.source_lang.as_str()),
            ("text", joined),
        ];

        let response = self
            .client
            .post(&settings.api_endpoint)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .header(AUTHORIZATION, format!("{} {}", settings.auth_scheme, key))
            .form(&form)
            .send()
            .await
            .map_err(|e| TranslationError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| TranslationError::NetworkError {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(TranslationError::RemoteCallFailure {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let parsed: ProviderResponse =
            serde_json::from_str(&body).map_err(|e| TranslationError::InvalidResponseError {
                message: e.to_string(),
            })?;

        Ok(parsed.translations)
    }
}

#[async_trait]
impl TranslationEngine for RemoteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::RemoteApi
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        ctx: EngineContext<'_>,
    ) -> Result<BatchTranslation> {
        if texts.is_empty() {
            return Ok(BatchTranslation {
                translations: vec![],
                usage: None,
            });
        }

        let joined = join_batch(texts);
        let chars = char_len(&joined) as u64;
        let credential = ctx.credentials.select(chars)?;

        let translations = self.send_request(&joined, credential.key(), ctx).await?;
        if let Some(lang) = translations.first().and_then(|t| t.detected_source_language.as_deref()) {
            if !lang.eq_ignore_ascii_case(&ctx.settings.source_lang) {
                debug!("Provider detected source language {}", lang);
            }
        }

        let translations = align(translations, texts.len())?;

        credential.consume(chars);
        debug!(
            "Translated batch of {} segments ({} chars) with key {}",
            texts.len(),
            chars,
            credential.masked_key()
        );

        Ok(BatchTranslation {
            translations,
            usage: Some(CredentialUsage {
                fingerprint: credential.fingerprint().to_string(),
                chars,
            }),
        })
    }
}

/// Match provider output to the submitted segments
fn align(translations: Vec<ProviderTranslation>, expected: usize) -> Result<Vec<String>> {
    if translations.len() == expected {
        return Ok(translations.into_iter().map(|t| t.text).collect());
    }

    if translations.len() == 1 {
        if let Some(parts) = split_joined(&translations[0].text, expected) {
            return Ok(parts);
        }
    }

    warn!(
        "Provider returned {} translations for {} segments",
        translations.len(),
        expected
    );
    Err(TranslationError::InvalidResponseError {
        message: format!(
            "expected {} translations, got {}",
            expected,
            translations.len()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batching::TEXT_SEPARATOR;
    use crate::core::config::TranslationSettings;
    use crate::core::credential::{Credential, CredentialPool};
    use axum::extract::{Form, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Provider {
        requests: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
        mode: Arc<Mutex<&'static str>>,
    }

    async fn translate_handler(
        State(provider): State<Provider>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        provider.requests.lock().push((auth, form.clone()));

        let text = form.get("text").cloned().unwrap_or_default();
        let mode = *provider.mode.lock();
        match mode {
            "joined" => Json(serde_json::json!({
                "translations": [{"detected_source_language": "ZH", "text": text.to_uppercase()}]
            }))
            .into_response(),
            "positional" => {
                let items: Vec<serde_json::Value> = text
                    .split(TEXT_SEPARATOR)
                    .map(|s| serde_json::json!({"text": format!("<{}>", s)}))
                    .collect();
                Json(serde_json::json!({ "translations": items })).into_response()
            }
            "garbled" => Json(serde_json::json!({
                "translations": [{"text": "merged"}, {"text": "wrong"}, {"text": "count"}, {"text": "!"}]
            }))
            .into_response(),
            "malformed" => (StatusCode::OK, "<html>").into_response(),
            _ => (StatusCode::from_u16(456).unwrap(), "Quota exceeded").into_response(),
        }
    }

    async fn spawn_provider(mode: &'static str) -> (String, Provider) {
        let provider = Provider::default();
        *provider.mode.lock() = mode;

        let app = Router::new()
            .route("/v2/translate", post(translate_handler))
            .with_state(provider.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/v2/translate", addr), provider)
    }

    fn settings(endpoint: String) -> TranslationSettings {
        TranslationSettings {
            enabled: true,
            api_keys: vec!["key-a".to_string()],
            api_endpoint: endpoint,
            ..Default::default()
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_joined_reply_is_split_positionally() {
        let (endpoint, provider) = spawn_provider("joined").await;
        let settings = settings(endpoint);
        let pool = CredentialPool::from_keys(&settings.api_keys, 1000);
        let engine = RemoteEngine::new().unwrap();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &pool,
        };

        let result = engine
            .translate_batch(&texts(&["abc", "de", "f"]), ctx)
            .await
            .unwrap();

        assert_eq!(result.translations, texts(&["ABC", "DE", "F"]));
        let usage = result.usage.unwrap();
        assert_eq!(usage.chars, 10);
        assert_eq!(usage.fingerprint, pool.credentials()[0].fingerprint());
        assert_eq!(pool.credentials()[0].chars_used(), 10);

        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 1);
        let (auth, form) = &requests[0];
        assert_eq!(auth, "DeepL-Auth-Key key-a");
        assert_eq!(form["target_lang"], "EN");
        assert_eq!(form["source_lang"], "ZH");
        assert_eq!(form["text"], "abc♧¥de♧¥f");
    }

    #[tokio::test]
    async fn test_positional_reply() {
        let (endpoint, _provider) = spawn_provider("positional").await;
        let settings = settings(endpoint);
        let pool = CredentialPool::from_keys(&settings.api_keys, 1000);
        let engine = RemoteEngine::new().unwrap();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &pool,
        };

        let result = engine.translate_one("你好", ctx).await.unwrap();
        assert_eq!(result.text, "<你好>");
        assert_eq!(result.usage.unwrap().chars, 2);
    }

    #[tokio::test]
    async fn test_error_status_is_remote_failure_and_not_billed() {
        let (endpoint, _provider) = spawn_provider("fail").await;
        let settings = settings(endpoint);
        let pool = CredentialPool::from_keys(&settings.api_keys, 1000);
        let engine = RemoteEngine::new().unwrap();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &pool,
        };

        let err = engine.translate_one("你好", ctx).await.unwrap_err();
        match err {
            TranslationError::RemoteCallFailure { status, message } => {
                assert_eq!(status, 456);
                assert_eq!(message, "Quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.credentials()[0].chars_used(), 0);
    }

    #[tokio::test]
    async fn test_malformed_and_misaligned_bodies() {
        for mode in ["malformed", "garbled"] {
            let (endpoint, _provider) = spawn_provider(mode).await;
            let settings = settings(endpoint);
            let pool = CredentialPool::from_keys(&settings.api_keys, 1000);
            let engine = RemoteEngine::new().unwrap();
            let ctx = EngineContext {
                settings: &settings,
                credentials: &pool,
            };

            let err = engine
                .translate_batch(&texts(&["a", "b"]), ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, TranslationError::InvalidResponseError { .. }));
        }
    }

    #[tokio::test]
    async fn test_no_active_credential() {
        let settings = settings("http://127.0.0.1:9/v2/translate".to_string());
        let pool = CredentialPool::new(vec![Credential::new("key-a", 10).deactivated()]);
        let engine = RemoteEngine::new().unwrap();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &pool,
        };

        let err = engine.translate_one("你好", ctx).await.unwrap_err();
        assert!(matches!(err, TranslationError::NoAvailableCredential));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let settings = settings("http://127.0.0.1:9/v2/translate".to_string());
        let pool = CredentialPool::default();
        let engine = RemoteEngine::new().unwrap();
        let ctx = EngineContext {
            settings: &settings,
            credentials: &pool,
        };

        let result = engine.translate_batch(&[], ctx).await.unwrap();
        assert!(result.translations.is_empty());
        assert!(result.usage.is_none());
    }
}
