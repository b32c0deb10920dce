//! On-device model engine
//!
//! Wraps an [`OnDeviceModel`] with a download lifecycle and a small
//! in-memory LRU of recent translations. Translation is only attempted once
//! the model is `DOWNLOADED`.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::engine::{BatchTranslation, EngineContext, TranslationEngine};
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{EngineKind, ModelStatus};

/// Capability of an on-device translation runtime
#[async_trait]
pub trait OnDeviceModel: Send + Sync {
    /// Fetch the model so it can translate offline
    async fn download(&self) -> Result<()>;

    /// Remove the downloaded model
    async fn delete(&self) -> Result<()>;

    /// Whether the model is present locally
    async fn is_downloaded(&self) -> Result<bool>;

    /// Translate one text between the given language codes
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Memory cache key: the same text translates differently per language pair
type MemoryKey = (String, String, String);

/// Local engine with lifecycle tracking
pub struct LocalModelEngine {
    model: Arc<dyn OnDeviceModel>,
    status: Mutex<ModelStatus>,
    memory: Mutex<LruCache<MemoryKey, String>>,
}

impl LocalModelEngine {
    pub fn new(model: Arc<dyn OnDeviceModel>, memory_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            model,
            status: Mutex::new(ModelStatus::NotInitialized),
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Last known lifecycle state, without asking the runtime
    pub fn status(&self) -> ModelStatus {
        *self.status.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == ModelStatus::Downloaded
    }

    /// Ask the runtime whether the model is present and update the state
    pub async fn check_status(&self) -> ModelStatus {
        if self.status() == ModelStatus::Downloading {
            return ModelStatus::Downloading;
        }

        let observed = match self.model.is_downloaded().await {
            Ok(true) => ModelStatus::Downloaded,
            Ok(false) => match self.status() {
                ModelStatus::NotInitialized => ModelStatus::NotInitialized,
                _ => ModelStatus::NotDownloaded,
            },
            Err(e) => {
                warn!("Model status check failed: {}", e);
                ModelStatus::Error
            }
        };

        let mut status = self.status.lock();
        // a download may have started while the runtime was queried
        if *status != ModelStatus::Downloading {
            *status = observed;
        }
        *status
    }

    /// Download the model, moving through `DOWNLOADING`
    pub async fn download_model(&self) -> Result<()> {
        {
            let mut status = self.status.lock();
            match *status {
                ModelStatus::Downloading => {
                    debug!("Model download already in progress");
                    return Ok(());
                }
                ModelStatus::Downloaded => return Ok(()),
                _ => *status = ModelStatus::Downloading,
            }
        }

        info!("Downloading local translation model");
        match self.model.download().await {
            Ok(()) => {
                *self.status.lock() = ModelStatus::Downloaded;
                info!("Local translation model downloaded");
                Ok(())
            }
            Err(e) => {
                *self.status.lock() = ModelStatus::Error;
                warn!("Failed to download model: {}", e);
                Err(e)
            }
        }
    }

    /// Delete the model and forget remembered translations
    pub async fn delete_model(&self) -> Result<()> {
        if self.status() == ModelStatus::Downloading {
            return Err(TranslationError::ModelError {
                message: "cannot delete while downloading".to_string(),
            });
        }

        self.model.delete().await?;
        *self.status.lock() = ModelStatus::NotDownloaded;
        self.clear_memory();
        info!("Local translation model deleted");
        Ok(())
    }

    pub fn clear_memory(&self) {
        self.memory.lock().clear();
    }

    /// Translate, or hand back the input while the model is not ready
    pub async fn translate_one(&self, text: &str, source_lang: &str, target_lang: &str) -> String {
        match self.try_translate(text, source_lang, target_lang).await {
            Ok(translated) => translated,
            Err(e) => {
                if !e.is_not_ready() {
                    warn!("Local translation failed: {}", e);
                }
                text.to_string()
            }
        }
    }

    /// Batch form of [`LocalModelEngine::translate_one`]
    pub async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Vec<String> {
        match self.try_translate_all(texts, source_lang, target_lang).await {
            Ok(translated) => translated,
            Err(e) => {
                if !e.is_not_ready() {
                    warn!("Local batch translation failed: {}", e);
                }
                texts.to_vec()
            }
        }
    }

    async fn try_translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        if !self.is_ready() {
            return Err(TranslationError::EngineNotReady);
        }
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let key = (
            source_lang.to_string(),
            target_lang.to_string(),
            text.to_string(),
        );
        let remembered = self.memory.lock().get(&key).cloned();
        if let Some(hit) = remembered {
            return Ok(hit);
        }

        let translated = self.model.translate(text, source_lang, target_lang).await?;
        self.memory.lock().put(key, translated.clone());
        Ok(translated)
    }

    async fn try_translate_all(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        if !self.is_ready() {
            return Err(TranslationError::EngineNotReady);
        }
        try_join_all(
            texts
                .iter()
                .map(|t| self.try_translate(t, source_lang, target_lang)),
        )
        .await
    }
}

#[async_trait]
impl TranslationEngine for LocalModelEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::LocalModel
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        ctx: EngineContext<'_>,
    ) -> Result<BatchTranslation> {
        let settings = ctx.settings;
        Ok(BatchTranslation {
            translations: self
                .try_translate_all(texts, &settings.source_lang, &settings.target_lang)
                .await?,
            usage: None,
        })
    }
}
