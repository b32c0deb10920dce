//! Settings migration, export and import
//!
//! Older installs kept four flat preferences in a separate file. They are
//! folded into [`TranslationSettings`] once and the old file is removed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::core::config::TranslationSettings;
use crate::core::errors::Result;
use crate::core::orchestrator::TranslationManager;

/// Version tag written by [`export_settings`]
pub const EXPORT_VERSION: u64 = 1;

/// Flat preference file used before engines and key rotation existed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacySettings {
    pub enable_translation: Option<bool>,
    pub translation_api_key: Option<String>,
    pub translation_target_language: Option<String>,
    pub translate_content_types: Option<Vec<String>>,
}

/// Fold legacy values into current settings
pub fn apply_legacy(current: &TranslationSettings, legacy: &LegacySettings) -> TranslationSettings {
    let mut settings = current.clone();

    settings.enabled = legacy.enable_translation.unwrap_or(false);

    if let Some(key) = legacy.translation_api_key.as_deref() {
        if !key.trim().is_empty() {
            settings.api_keys = vec![key.trim().to_string()];
        }
    }

    if let Some(lang) = legacy.translation_target_language.as_deref() {
        if !lang.trim().is_empty() {
            settings.target_lang = lang.trim().to_string();
        }
    }

    let types = legacy.translate_content_types.as_deref().unwrap_or_default();
    let wants = |name: &str| types.is_empty() || types.iter().any(|t| t == name);
    settings.translate_titles = wants("titles");
    settings.translate_descriptions = wants("descriptions");
    settings.translate_comments = wants("comments");
    settings.translate_tags = wants("tags");

    settings
}

/// Apply and remove a legacy preference file, if one is present
pub fn migrate_if_needed(
    legacy_path: &Path,
    current: &TranslationSettings,
) -> Result<TranslationSettings> {
    if !legacy_path.exists() {
        return Ok(current.clone());
    }

    let content = std::fs::read_to_string(legacy_path)?;
    let legacy: LegacySettings = serde_json::from_str(&content)?;
    if legacy.enable_translation.is_none() {
        debug!("No legacy translation settings in {}", legacy_path.display());
        return Ok(current.clone());
    }

    let migrated = apply_legacy(current, &legacy);
    std::fs::remove_file(legacy_path)?;
    info!("Migrated legacy translation settings from {}", legacy_path.display());
    Ok(migrated)
}

/// Versioned, camelCase snapshot of the user-facing settings
pub fn export_settings(settings: &TranslationSettings) -> Value {
    json!({
        "version": EXPORT_VERSION,
        "enabled": settings.enabled,
        "engine": settings.engine.as_str(),
        "apiKeys": settings.api_keys,
        "monthlyLimit": settings.monthly_limit,
        "sourceLang": settings.source_lang,
        "targetLang": settings.target_lang,
        "batchSize": settings.batch_size,
        "translateTitles": settings.translate_titles,
        "translateDescriptions": settings.translate_descriptions,
        "translateComments": settings.translate_comments,
        "translateTags": settings.translate_tags,
    })
}

/// First of `names` present in `exported`
fn field<'a>(exported: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| exported.get(*name))
}

/// Apply an exported snapshot; keys of the wrong JSON type are ignored.
///
/// Exports from the app's preference screen spell some keys differently
/// (`isTranslationEnabled`, `translationApiKeys`, ...); those are accepted
/// too, with the names written by [`export_settings`] taking precedence.
pub fn import_settings(current: &TranslationSettings, exported: &Value) -> TranslationSettings {
    let mut settings = current.clone();

    let flag = |names: &[&str]| field(exported, names).and_then(Value::as_bool);
    let text = |names: &[&str]| field(exported, names).and_then(Value::as_str);
    let number = |names: &[&str]| field(exported, names).and_then(Value::as_u64);

    if let Some(enabled) = flag(&["enabled", "isTranslationEnabled"]) {
        settings.enabled = enabled;
    }
    if let Some(engine) = text(&["engine"]).and_then(|e| e.parse().ok()) {
        settings.engine = engine;
    }
    if let Some(keys) = field(exported, &["apiKeys", "translationApiKeys"]).and_then(Value::as_array) {
        settings.api_keys = keys
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    if let Some(limit) = number(&["monthlyLimit", "translationMonthlyLimit"]) {
        settings.monthly_limit = limit;
    }
    if let Some(lang) = text(&["sourceLang"]) {
        settings.source_lang = lang.to_string();
    }
    if let Some(lang) = text(&["targetLang", "translationTargetLang"]) {
        settings.target_lang = lang.to_string();
    }
    if let Some(size) =
        number(&["batchSize", "translationBatchSize"]).and_then(|n| usize::try_from(n).ok())
    {
        settings.batch_size = size;
    }
    if let Some(on) = flag(&["translateTitles"]) {
        settings.translate_titles = on;
    }
    if let Some(on) = flag(&["translateDescriptions"]) {
        settings.translate_descriptions = on;
    }
    if let Some(on) = flag(&["translateComments"]) {
        settings.translate_comments = on;
    }
    if let Some(on) = flag(&["translateTags"]) {
        settings.translate_tags = on;
    }

    settings
}

/// Restore user-facing defaults, apply them, and clear the cache
///
/// Deployment fields (endpoint, cache path, local runtime) are kept.
pub async fn reset_to_defaults(
    manager: &TranslationManager,
    current: &TranslationSettings,
) -> Result<TranslationSettings> {
    let defaults = TranslationSettings::default();
    let settings = TranslationSettings {
        api_endpoint: current.api_endpoint.clone(),
        auth_scheme: current.auth_scheme.clone(),
        timeout_ms: current.timeout_ms,
        cache_path: current.cache_path.clone(),
        local: current.local.clone(),
        ..defaults
    };

    manager.update_settings(settings.clone()).await?;
    manager.clear_cache().await;
    info!("Translation settings reset to defaults");
    Ok(settings)
}
