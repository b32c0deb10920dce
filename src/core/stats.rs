//! Usage statistics over the cache

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::credential::{ApiKeyUsage, CredentialPool};
use crate::core::models::{ContentType, EngineKind, TranslationRecord};

/// Aggregated view for the statistics screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationStats {
    /// Billable characters across all records
    pub total_chars: u64,
    pub total_items: usize,
    pub by_type: BTreeMap<ContentType, usize>,
    /// Billable characters per key fingerprint
    pub by_api_key: BTreeMap<String, u64>,
    pub by_engine: BTreeMap<EngineKind, usize>,
    pub api_key_usages: Vec<ApiKeyUsage>,
}

impl TranslationStats {
    pub fn aggregate(records: &[TranslationRecord], credentials: &CredentialPool) -> Self {
        let mut by_type = BTreeMap::new();
        let mut by_api_key = BTreeMap::new();
        let mut by_engine = BTreeMap::new();
        let mut total_chars = 0;

        for record in records {
            total_chars += record.chars_consumed;
            *by_type.entry(record.content_type).or_insert(0) += 1;
            *by_engine.entry(record.engine_used).or_insert(0) += 1;
            if !record.api_key_fingerprint.is_empty() {
                *by_api_key
                    .entry(record.api_key_fingerprint.clone())
                    .or_insert(0) += record.chars_consumed;
            }
        }

        Self {
            total_chars,
            total_items: records.len(),
            by_type,
            by_api_key,
            by_engine,
            api_key_usages: credentials.usages(),
        }
    }
}
