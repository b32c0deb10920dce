//! Translation façade used by the scraper
//!
//! Every public translate call returns usable display text: a cached
//! translation, a fresh one, or the original when anything fails.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::batching::{create_segment_batches, TAG_SEPARATOR};
use crate::core::cache::CacheStore;
use crate::core::config::TranslationSettings;
use crate::core::credential::{month_start, ApiKeyUsage, CredentialPool};
use crate::core::engine::{EngineContext, TranslationEngine};
use crate::core::errors::{Result, TranslationError};
use crate::core::local::LocalModelEngine;
use crate::core::models::{
    char_len, ContentType, EngineKind, ModelStatus, NewTranslation, TranslationRecord,
};
use crate::core::stats::TranslationStats;

/// Configuration applied as one unit
struct Snapshot {
    settings: TranslationSettings,
    credentials: CredentialPool,
    enabled: bool,
}

impl Snapshot {
    fn ctx(&self) -> EngineContext<'_> {
        EngineContext {
            settings: &self.settings,
            credentials: &self.credentials,
        }
    }
}

/// What one translated item cost
struct Provenance {
    engine: EngineKind,
    fingerprint: Option<String>,
    chars: u64,
}

/// Orchestrates cache, gates, engines and fallback
pub struct TranslationManager {
    cache: Arc<dyn CacheStore>,
    remote: Arc<dyn TranslationEngine>,
    local: Arc<LocalModelEngine>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl TranslationManager {
    /// Create a manager with translation disabled until [`initialize`](Self::initialize)
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remote: Arc<dyn TranslationEngine>,
        local: Arc<LocalModelEngine>,
    ) -> Self {
        Self {
            cache,
            remote,
            local,
            snapshot: RwLock::new(Arc::new(Snapshot {
                settings: TranslationSettings::default(),
                credentials: CredentialPool::default(),
                enabled: false,
            })),
        }
    }

    /// Apply settings: rebuild credentials, restore this month's usage, swap the snapshot
    pub async fn initialize(&self, settings: TranslationSettings) -> Result<()> {
        settings.validate()?;

        let credentials = CredentialPool::from_keys(&settings.api_keys, settings.monthly_limit);
        let previous = self.snapshot();
        self.seed_usage(&credentials, &previous.credentials).await;

        let enabled = settings.is_effectively_enabled();
        let engine = settings.engine;
        let auto_download = settings.local.auto_download;

        info!(
            "Translation {} (engine: {}, target: {}, keys: {})",
            if enabled { "enabled" } else { "disabled" },
            engine,
            settings.target_lang,
            credentials.len()
        );

        *self.snapshot.write() = Arc::new(Snapshot {
            settings,
            credentials,
            enabled,
        });

        if engine == EngineKind::LocalModel {
            self.prepare_local_model(auto_download).await;
        }

        Ok(())
    }

    /// Re-derive the whole configuration from new settings
    pub async fn update_settings(&self, settings: TranslationSettings) -> Result<()> {
        self.initialize(settings).await
    }

    pub fn settings(&self) -> TranslationSettings {
        self.snapshot().settings.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.snapshot().enabled
    }

    pub fn credential_usages(&self) -> Vec<ApiKeyUsage> {
        self.snapshot().credentials.usages()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Restore this month's usage for a fresh pool.
    ///
    /// Cached rows undercount once a forced refresh replaces a row, so a key
    /// carried over from the previous pool never drops below its live counter.
    async fn seed_usage(&self, credentials: &CredentialPool, previous: &CredentialPool) {
        let now = Utc::now();
        let from = month_start(now);
        for credential in credentials.credentials() {
            let carried = previous.find(credential.fingerprint()).map(|old| {
                old.reset_if_needed();
                old.chars_used()
            });
            match self.cache.chars_consumed(credential.fingerprint(), from, now).await {
                Ok(used) => credential.seed_chars_used(used.max(carried.unwrap_or(0))),
                Err(e) => {
                    warn!(
                        "Could not restore usage for key {}: {}",
                        credential.masked_key(),
                        e
                    );
                    if let Some(used) = carried {
                        credential.seed_chars_used(used);
                    }
                }
            }
        }
    }

    async fn prepare_local_model(&self, auto_download: bool) {
        let status = self.local.check_status().await;
        debug!("Local model status: {}", status);

        let absent = matches!(
            status,
            ModelStatus::NotInitialized | ModelStatus::NotDownloaded | ModelStatus::Error
        );
        if auto_download && absent {
            let local = Arc::clone(&self.local);
            tokio::spawn(async move {
                if let Err(e) = local.download_model().await {
                    warn!("Automatic model download failed: {}", e);
                }
            });
        }
    }

    /// Translate one scraped field
    pub async fn translate(
        &self,
        text: &str,
        content_type: ContentType,
        video_code: Option<&str>,
        force_fresh: bool,
    ) -> String {
        let snapshot = self.snapshot();
        if !snapshot.enabled || text.trim().is_empty() {
            return text.to_string();
        }

        if snapshot.settings.engine == EngineKind::LocalModel {
            let result = TranslationEngine::translate_one(self.local.as_ref(), text, snapshot.ctx()).await;
            return match result {
                Ok(translation) => {
                    let provenance = Provenance {
                        engine: EngineKind::LocalModel,
                        fingerprint: None,
                        chars: 0,
                    };
                    self.store(&snapshot, text, &translation.text, content_type, video_code, provenance)
                        .await;
                    translation.text
                }
                Err(e) => {
                    log_fallback("Translation", &e);
                    text.to_string()
                }
            };
        }

        if !force_fresh {
            if let Some(hit) = self.cached(&snapshot, text, content_type).await {
                return hit;
            }
        }

        if !snapshot.settings.is_category_enabled(content_type) {
            return text.to_string();
        }

        match self.remote.translate_one(text, snapshot.ctx()).await {
            Ok(translation) => {
                let provenance = Provenance {
                    engine: EngineKind::RemoteApi,
                    fingerprint: translation.usage.map(|u| u.fingerprint),
                    chars: char_len(text) as u64,
                };
                self.store(&snapshot, text, &translation.text, content_type, video_code, provenance)
                    .await;
                translation.text
            }
            Err(e) => {
                log_fallback("Translation", &e);
                text.to_string()
            }
        }
    }

    /// Translate many fields of one category; output aligns with input
    pub async fn translate_batch(
        &self,
        texts: &[String],
        content_type: ContentType,
        video_code: Option<&str>,
    ) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut results = texts.to_vec();
        if !snapshot.enabled || texts.is_empty() {
            return results;
        }

        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        if snapshot.settings.engine == EngineKind::LocalModel {
            self.translate_batch_local(&snapshot, texts, &pending, content_type, video_code, &mut results)
                .await;
            return results;
        }

        let mut misses = Vec::new();
        for index in pending {
            match self.cached(&snapshot, &texts[index], content_type).await {
                Some(hit) => results[index] = hit,
                None => misses.push(index),
            }
        }

        if misses.is_empty() || !snapshot.settings.is_category_enabled(content_type) {
            return results;
        }

        let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
        let batches = create_segment_batches(&miss_texts, snapshot.settings.batch_size);
        debug!(
            "Translating {} of {} texts in {} batches",
            miss_texts.len(),
            texts.len(),
            batches.len()
        );

        let mut pieces: Vec<Vec<String>> = vec![Vec::new(); miss_texts.len()];
        let mut fingerprints: Vec<Option<String>> = vec![None; miss_texts.len()];
        let mut failed = vec![false; miss_texts.len()];

        // sequential, so quota accounting and key rotation stay deterministic
        for batch in &batches {
            let batch_texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let outcome = self
                .remote
                .translate_batch(&batch_texts, snapshot.ctx())
                .await
                .and_then(|out| {
                    if out.translations.len() == batch.len() {
                        Ok(out)
                    } else {
                        Err(TranslationError::InvalidResponseError {
                            message: format!(
                                "expected {} translations, got {}",
                                batch.len(),
                                out.translations.len()
                            ),
                        })
                    }
                });

            match outcome {
                Ok(out) => {
                    let fingerprint = out.usage.map(|u| u.fingerprint);
                    for (segment, translated) in batch.iter().zip(out.translations) {
                        pieces[segment.index].push(translated);
                        fingerprints[segment.index] = fingerprint.clone();
                    }
                }
                Err(e) => {
                    log_fallback("Batch translation", &e);
                    for segment in batch {
                        failed[segment.index] = true;
                    }
                }
            }
        }

        for (slot, &index) in misses.iter().enumerate() {
            if failed[slot] {
                continue;
            }
            let translated = pieces[slot].concat();
            let provenance = Provenance {
                engine: EngineKind::RemoteApi,
                fingerprint: fingerprints[slot].take(),
                chars: char_len(&texts[index]) as u64,
            };
            self.store(&snapshot, &texts[index], &translated, content_type, video_code, provenance)
                .await;
            results[index] = translated;
        }

        results
    }

    async fn translate_batch_local(
        &self,
        snapshot: &Snapshot,
        texts: &[String],
        pending: &[usize],
        content_type: ContentType,
        video_code: Option<&str>,
        results: &mut [String],
    ) {
        let batch: Vec<String> = pending.iter().map(|&i| texts[i].clone()).collect();
        match TranslationEngine::translate_batch(self.local.as_ref(), &batch, snapshot.ctx()).await {
            Ok(out) => {
                for (&index, translated) in pending.iter().zip(out.translations) {
                    let provenance = Provenance {
                        engine: EngineKind::LocalModel,
                        fingerprint: None,
                        chars: 0,
                    };
                    self.store(snapshot, &texts[index], &translated, content_type, video_code, provenance)
                        .await;
                    results[index] = translated;
                }
            }
            Err(e) => log_fallback("Batch translation", &e),
        }
    }

    /// Translate all tags of one item as a single cached unit
    pub async fn translate_tags(&self, tags: &[String], video_code: Option<&str>) -> Vec<String> {
        let snapshot = self.snapshot();
        if !snapshot.enabled || tags.is_empty() {
            return tags.to_vec();
        }

        let joined = tags.join(TAG_SEPARATOR);

        if snapshot.settings.engine == EngineKind::LocalModel {
            return match TranslationEngine::translate_batch(self.local.as_ref(), tags, snapshot.ctx()).await {
                Ok(out) if out.translations.len() == tags.len() => {
                    let provenance = Provenance {
                        engine: EngineKind::LocalModel,
                        fingerprint: None,
                        chars: 0,
                    };
                    let translated = out.translations.join(TAG_SEPARATOR);
                    self.store(&snapshot, &joined, &translated, ContentType::Tag, video_code, provenance)
                        .await;
                    out.translations
                }
                Ok(_) => tags.to_vec(),
                Err(e) => {
                    log_fallback("Tag translation", &e);
                    tags.to_vec()
                }
            };
        }

        if !snapshot.settings.translate_tags {
            return tags.to_vec();
        }

        if let Some(hit) = self.cached(&snapshot, &joined, ContentType::Tag).await {
            if let Some(split) = split_tags(&hit, tags.len()) {
                return split;
            }
            warn!("Cached tag entry does not split into {} tags, retranslating", tags.len());
        }

        match self.remote.translate_one(&joined, snapshot.ctx()).await {
            Ok(translation) => match split_tags(&translation.text, tags.len()) {
                Some(split) => {
                    let provenance = Provenance {
                        engine: EngineKind::RemoteApi,
                        fingerprint: translation.usage.map(|u| u.fingerprint),
                        chars: char_len(&joined) as u64,
                    };
                    self.store(&snapshot, &joined, &translation.text, ContentType::Tag, video_code, provenance)
                        .await;
                    split
                }
                None => {
                    warn!("Tag separator lost in translation, keeping original tags");
                    tags.to_vec()
                }
            },
            Err(e) => {
                log_fallback("Tag translation", &e);
                tags.to_vec()
            }
        }
    }

    async fn cached(
        &self,
        snapshot: &Snapshot,
        text: &str,
        content_type: ContentType,
    ) -> Option<String> {
        match self
            .cache
            .get(text, &snapshot.settings.target_lang, content_type)
            .await
        {
            Ok(Some(record)) => {
                debug!("Cache hit for {} ({})", content_type, record.engine_used);
                Some(record.translated_text)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn store(
        &self,
        snapshot: &Snapshot,
        original: &str,
        translated: &str,
        content_type: ContentType,
        video_code: Option<&str>,
        provenance: Provenance,
    ) {
        let record = NewTranslation::new(original, translated, content_type, provenance.engine)
            .with_langs(&snapshot.settings.source_lang, &snapshot.settings.target_lang)
            .with_video_code(video_code)
            .with_usage(provenance.fingerprint.unwrap_or_default(), provenance.chars);

        if let Err(e) = self.cache.insert(record).await {
            warn!("Failed to cache translation: {}", e);
        }
    }

    /// Aggregate statistics over the cache and the live credentials
    pub async fn stats(&self) -> Result<TranslationStats> {
        let records = self.all_cache_items().await?;
        Ok(TranslationStats::aggregate(&records, &self.snapshot().credentials))
    }

    /// Current cache contents, newest first
    pub async fn all_cache_items(&self) -> Result<Vec<TranslationRecord>> {
        self.cache.get_all().await
    }

    /// Live cache contents
    pub async fn watch_cache(&self) -> Result<watch::Receiver<Vec<TranslationRecord>>> {
        self.cache.watch_all().await
    }

    pub async fn cache_items_for_video(&self, video_code: &str) -> Result<Vec<TranslationRecord>> {
        self.cache.get_by_video_code(video_code).await
    }

    pub async fn clear_cache(&self) -> bool {
        self.local.clear_memory();
        match self.cache.delete_all().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to clear cache: {}", e);
                false
            }
        }
    }

    pub async fn clear_cache_by_type(&self, content_type: ContentType) -> bool {
        match self.cache.delete_by_content_type(content_type).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to clear {} cache: {}", content_type, e);
                false
            }
        }
    }

    pub async fn delete_cache_item(&self, id: i64) -> bool {
        match self.cache.delete(id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Failed to delete cache item {}: {}", id, e);
                false
            }
        }
    }

    /// Refresh and report the local model state
    pub async fn model_status(&self) -> ModelStatus {
        self.local.check_status().await
    }

    pub async fn download_model(&self) -> bool {
        self.local.download_model().await.is_ok()
    }

    pub async fn delete_model(&self) -> bool {
        match self.local.delete_model().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete model: {}", e);
                false
            }
        }
    }
}

fn log_fallback(what: &str, error: &TranslationError) {
    if error.is_not_ready() {
        debug!("{} skipped, local model not ready", what);
    } else {
        warn!("{} failed, returning original text: {}", what, error);
    }
}

fn split_tags(joined: &str, expected: usize) -> Option<Vec<String>> {
    let parts: Vec<String> = joined
        .split(TAG_SEPARATOR)
        .map(|t| t.trim().to_string())
        .collect();
    (parts.len() == expected).then_some(parts)
}
