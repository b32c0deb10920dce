//! Core data models for translation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::TranslationError;

/// Classification of a scraped text field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Title,
    Description,
    Comment,
    Tag,
    ArtistName,
    Other,
}

impl ContentType {
    /// All categories, in declaration order
    pub const ALL: [ContentType; 6] = [
        ContentType::Title,
        ContentType::Description,
        ContentType::Comment,
        ContentType::Tag,
        ContentType::ArtistName,
        ContentType::Other,
    ];

    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Title => "TITLE",
            ContentType::Description => "DESCRIPTION",
            ContentType::Comment => "COMMENT",
            ContentType::Tag => "TAG",
            ContentType::ArtistName => "ARTIST_NAME",
            ContentType::Other => "OTHER",
        }
    }

    /// Human readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            ContentType::Title => "Title",
            ContentType::Description => "Description",
            ContentType::Comment => "Comment",
            ContentType::Tag => "Tag",
            ContentType::ArtistName => "Artist Name",
            ContentType::Other => "Other",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ContentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| TranslationError::ConfigError {
                message: format!("unknown content type: {}", s),
            })
    }
}

/// Backend that produced a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineKind {
    /// Quota-limited cloud API
    RemoteApi,
    /// On-device model
    LocalModel,
}

impl EngineKind {
    /// Stable storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::RemoteApi => "REMOTE_API",
            EngineKind::LocalModel => "LOCAL_MODEL",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "REMOTE_API" | "REMOTE" => Ok(EngineKind::RemoteApi),
            "LOCAL_MODEL" | "LOCAL" => Ok(EngineKind::LocalModel),
            _ => Err(TranslationError::ConfigError {
                message: format!("unknown translation engine: {}", s),
            }),
        }
    }
}

/// Lifecycle of the on-device model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    NotInitialized,
    NotDownloaded,
    Downloading,
    Downloaded,
    Error,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelStatus::NotInitialized => "not initialized",
            ModelStatus::NotDownloaded => "not downloaded",
            ModelStatus::Downloading => "downloading",
            ModelStatus::Downloaded => "downloaded",
            ModelStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A cached translation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: i64,
    pub original_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub content_type: ContentType,
    pub video_code: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub engine_used: EngineKind,
    pub api_key_fingerprint: String,
    pub chars_consumed: u64,
}

/// A translation about to be written to the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTranslation {
    pub original_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub content_type: ContentType,
    pub video_code: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub engine_used: EngineKind,
    pub api_key_fingerprint: String,
    pub chars_consumed: u64,
}

impl NewTranslation {
    /// Start a record stamped with the current time
    pub fn new(
        original_text: impl Into<String>,
        translated_text: impl Into<String>,
        content_type: ContentType,
        engine_used: EngineKind,
    ) -> Self {
        Self {
            original_text: original_text.into(),
            translated_text: translated_text.into(),
            source_lang: "ZH".to_string(),
            target_lang: "EN".to_string(),
            content_type,
            video_code: None,
            timestamp: Utc::now(),
            engine_used,
            api_key_fingerprint: String::new(),
            chars_consumed: 0,
        }
    }

    pub fn with_langs(mut self, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        self.source_lang = source_lang.into();
        self.target_lang = target_lang.into();
        self
    }

    pub fn with_video_code(mut self, video_code: Option<&str>) -> Self {
        self.video_code = video_code.map(str::to_string);
        self
    }

    pub fn with_usage(mut self, fingerprint: impl Into<String>, chars_consumed: u64) -> Self {
        self.api_key_fingerprint = fingerprint.into();
        self.chars_consumed = chars_consumed;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Character count as the provider bills it
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("title".parse::<ContentType>().unwrap(), ContentType::Title);
        assert_eq!(
            "artist-name".parse::<ContentType>().unwrap(),
            ContentType::ArtistName
        );
        assert!("poster".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_engine_kind_serde_names() {
        let json = serde_json::to_string(&EngineKind::LocalModel).unwrap();
        assert_eq!(json, "\"LOCAL_MODEL\"");
        assert_eq!("remote".parse::<EngineKind>().unwrap(), EngineKind::RemoteApi);
    }

    #[test]
    fn test_char_len_counts_scalars() {
        assert_eq!(char_len("你好"), 2);
        assert_eq!(char_len("♧¥"), 2);
    }
}
