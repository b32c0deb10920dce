//! Translation backend abstraction

use async_trait::async_trait;

use crate::core::config::TranslationSettings;
use crate::core::credential::CredentialPool;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::EngineKind;

/// Per-call view of the active configuration snapshot
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub settings: &'a TranslationSettings,
    pub credentials: &'a CredentialPool,
}

/// Characters billed to one credential by a call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CredentialUsage {
    pub fingerprint: String,
    pub chars: u64,
}

/// Output of one engine call, positionally aligned with the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTranslation {
    pub translations: Vec<String>,
    /// `None` for engines without billing
    pub usage: Option<CredentialUsage>,
}

/// Output of a single-text call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub usage: Option<CredentialUsage>,
}

/// A translation backend
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Which backend this is, recorded on cached rows
    fn kind(&self) -> EngineKind;

    /// Translate a batch; the result has one entry per input, in order
    async fn translate_batch(
        &self,
        texts: &[String],
        ctx: EngineContext<'_>,
    ) -> Result<BatchTranslation>;

    /// Translate one text as a batch of size one
    async fn translate_one(&self, text: &str, ctx: EngineContext<'_>) -> Result<Translation> {
        let batch = self.translate_batch(&[text.to_string()], ctx).await?;
        let text = batch
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::InvalidResponseError {
                message: "No translation in response".to_string(),
            })?;
        Ok(Translation {
            text,
            usage: batch.usage,
        })
    }
}
