//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::batching::TEXT_SEPARATOR;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{char_len, ContentType, EngineKind};

/// Prefix for environment overrides, e.g. `CATALOG_TRANSLATOR_TARGET_LANG`
pub const ENV_PREFIX: &str = "CATALOG_TRANSLATOR";

/// Settings for the on-device model runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelSettings {
    pub endpoint: String,
    pub model: String,
    pub auto_download: bool,
    pub memory_cache_capacity: usize,
}

impl Default for LocalModelSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:1.5b".to_string(),
            auto_download: true,
            memory_cache_capacity: 1024,
        }
    }
}

/// Complete translation configuration, applied as one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub enabled: bool,
    pub engine: EngineKind,
    pub api_keys: Vec<String>,
    pub monthly_limit: u64,
    pub source_lang: String,
    pub target_lang: String,
    pub batch_size: usize,
    pub translate_titles: bool,
    pub translate_descriptions: bool,
    pub translate_comments: bool,
    pub translate_tags: bool,
    pub api_endpoint: String,
    pub auth_scheme: String,
    pub timeout_ms: u64,
    pub cache_path: PathBuf,
    pub local: LocalModelSettings,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: EngineKind::RemoteApi,
            api_keys: vec![],
            monthly_limit: 500_000,
            source_lang: "ZH".to_string(),
            target_lang: "EN".to_string(),
            batch_size: 30_000,
            translate_titles: true,
            translate_descriptions: true,
            translate_comments: true,
            translate_tags: true,
            api_endpoint: "https://api-free.deepl.com/v2/translate".to_string(),
            auth_scheme: "DeepL-Auth-Key".to_string(),
            timeout_ms: 30_000,
            cache_path: PathBuf::from("translation.db"),
            local: LocalModelSettings::default(),
        }
    }
}

impl TranslationSettings {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("api_keys"),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;

        info!(
            "Loaded translation settings (engine: {}, keys: {})",
            settings.engine,
            settings.usable_keys().len()
        );

        Ok(settings)
    }

    /// Load from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(config_error("source and target languages are required"));
        }

        if self.batch_size <= char_len(TEXT_SEPARATOR) {
            return Err(config_error(format!(
                "batch_size must be greater than {}",
                char_len(TEXT_SEPARATOR)
            )));
        }

        if self.monthly_limit == 0 {
            return Err(config_error("monthly_limit must be greater than 0"));
        }

        if self.api_endpoint.is_empty() {
            return Err(config_error("API endpoint is required"));
        }

        if self.timeout_ms == 0 {
            return Err(config_error("timeout_ms must be greater than 0"));
        }

        if self.local.memory_cache_capacity == 0 {
            return Err(config_error("local.memory_cache_capacity must be greater than 0"));
        }

        if self.enabled && self.engine == EngineKind::RemoteApi && self.usable_keys().is_empty() {
            warn!("Remote translation enabled but no API keys configured");
        }

        Ok(())
    }

    /// Non-blank API keys, trimmed
    pub fn usable_keys(&self) -> Vec<&str> {
        self.api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Whether translation runs at all with these settings
    pub fn is_effectively_enabled(&self) -> bool {
        self.enabled
            && (self.engine == EngineKind::LocalModel || !self.usable_keys().is_empty())
    }

    /// Per-category switch; categories without a switch are always on
    pub fn is_category_enabled(&self, content_type: ContentType) -> bool {
        match content_type {
            ContentType::Title => self.translate_titles,
            ContentType::Description => self.translate_descriptions,
            ContentType::Comment => self.translate_comments,
            ContentType::Tag => self.translate_tags,
            ContentType::ArtistName | ContentType::Other => true,
        }
    }
}

fn config_error(message: impl Into<String>) -> TranslationError {
    TranslationError::ConfigError {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = TranslationSettings::default();
        config.enabled = true;
        config.api_keys = vec!["test_key".to_string()];

        assert!(config.validate().is_ok());
        assert!(config.is_effectively_enabled());
    }

    #[test]
    fn test_config_validation_batch_size() {
        let config = TranslationSettings {
            batch_size: 2,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_without_keys_is_disabled() {
        let config = TranslationSettings {
            enabled: true,
            api_keys: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(!config.is_effectively_enabled());

        let local = TranslationSettings {
            engine: EngineKind::LocalModel,
            ..config
        };
        assert!(local.is_effectively_enabled());
    }

    #[test]
    fn test_category_switches() {
        let config = TranslationSettings {
            translate_titles: false,
            ..Default::default()
        };
        assert!(!config.is_category_enabled(ContentType::Title));
        assert!(config.is_category_enabled(ContentType::Description));
        assert!(config.is_category_enabled(ContentType::ArtistName));
        assert!(config.is_category_enabled(ContentType::Other));
    }

    #[test]
    fn test_file_roundtrip_with_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"enabled": true, "target_lang": "DE"}"#).unwrap();

        let loaded = TranslationSettings::from_file(&path).unwrap();
        assert!(loaded.enabled);
        assert_eq!(loaded.target_lang, "DE");
        assert_eq!(loaded.batch_size, 30_000);

        loaded.to_file(&path).unwrap();
        assert_eq!(TranslationSettings::from_file(&path).unwrap(), loaded);
    }

    #[test]
    fn test_load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"engine": "LOCAL_MODEL", "local": {"model": "tiny"}}"#,
        )
        .unwrap();

        let loaded = TranslationSettings::load(Some(&path)).unwrap();
        assert_eq!(loaded.engine, EngineKind::LocalModel);
        assert_eq!(loaded.local.model, "tiny");
        assert!(loaded.local.auto_download);
    }
}
