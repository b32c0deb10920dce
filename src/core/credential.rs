//! API key quota tracking and round-robin selection

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};

/// One API key and its monthly character budget
#[derive(Debug)]
pub struct Credential {
    key: String,
    fingerprint: String,
    monthly_limit: u64,
    chars_used_this_month: AtomicU64,
    is_active: bool,
    last_reset: Mutex<DateTime<Utc>>,
}

impl Credential {
    /// Create an active credential with an empty counter
    pub fn new(key: impl Into<String>, monthly_limit: u64) -> Self {
        Self::with_last_reset(key, monthly_limit, Utc::now())
    }

    /// Create a credential whose counter was last reset at `last_reset`
    pub fn with_last_reset(key: impl Into<String>, monthly_limit: u64, last_reset: DateTime<Utc>) -> Self {
        let key = key.into();
        Self {
            fingerprint: fingerprint(&key),
            key,
            monthly_limit,
            chars_used_this_month: AtomicU64::new(0),
            is_active: true,
            last_reset: Mutex::new(last_reset),
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn monthly_limit(&self) -> u64 {
        self.monthly_limit
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn chars_used(&self) -> u64 {
        self.chars_used_this_month.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.monthly_limit.saturating_sub(self.chars_used())
    }

    /// Zero the counter when the calendar month changed since the last reset
    pub fn reset_if_needed(&self) -> bool {
        self.reset_if_needed_at(Utc::now())
    }

    /// Same as [`Credential::reset_if_needed`] with an explicit clock
    pub fn reset_if_needed_at(&self, now: DateTime<Utc>) -> bool {
        let mut last_reset = self.last_reset.lock();
        if (now.year(), now.month()) != (last_reset.year(), last_reset.month()) {
            self.chars_used_this_month.store(0, Ordering::SeqCst);
            *last_reset = now;
            info!("Monthly quota reset for key {}", self.masked_key());
            return true;
        }
        false
    }

    /// Whether `chars` more characters stay within the monthly limit
    pub fn has_quota(&self, chars: u64) -> bool {
        self.chars_used() + chars <= self.monthly_limit
    }

    /// Charge characters; never rejects, so one large call may overshoot
    pub fn consume(&self, chars: u64) {
        let used = self.chars_used_this_month.fetch_add(chars, Ordering::SeqCst) + chars;
        if used > self.monthly_limit {
            warn!(
                "Key {} is over its monthly limit ({} / {})",
                self.masked_key(),
                used,
                self.monthly_limit
            );
        }
    }

    /// Restore the counter from earlier bookkeeping
    pub fn seed_chars_used(&self, chars: u64) {
        self.chars_used_this_month.store(chars, Ordering::SeqCst);
    }

    /// Key shown as `first8...last4`
    pub fn masked_key(&self) -> String {
        mask_key(&self.key)
    }

    /// Snapshot for statistics
    pub fn usage(&self) -> ApiKeyUsage {
        let chars_used = self.chars_used();
        ApiKeyUsage {
            key: self.masked_key(),
            fingerprint: self.fingerprint.clone(),
            chars_used,
            monthly_limit: self.monthly_limit,
            remaining: self.monthly_limit.saturating_sub(chars_used),
            is_active: self.is_active,
        }
    }
}

/// Per-key usage figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub key: String,
    pub fingerprint: String,
    pub chars_used: u64,
    pub monthly_limit: u64,
    pub remaining: u64,
    pub is_active: bool,
}

/// Ordered set of credentials with a round-robin cursor
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<Arc<Credential>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// One active credential per non-blank key
    pub fn from_keys<S: AsRef<str>>(keys: &[S], monthly_limit: u64) -> Self {
        Self::new(
            keys.iter()
                .map(|k| k.as_ref().trim())
                .filter(|k| !k.is_empty())
                .map(|k| Credential::new(k, monthly_limit))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn credentials(&self) -> &[Arc<Credential>] {
        &self.credentials
    }

    /// Credential with the given fingerprint, if the pool holds that key
    pub fn find(&self, fingerprint: &str) -> Option<&Arc<Credential>> {
        self.credentials.iter().find(|c| c.fingerprint() == fingerprint)
    }

    /// Reset every credential whose month rolled over
    pub fn reset_all_if_needed(&self) {
        for credential in &self.credentials {
            credential.reset_if_needed();
        }
    }

    /// Pick a credential for a request of `request_chars` characters.
    ///
    /// Scans from the last successfully used index for an active key with
    /// enough quota. When no key has quota, the first active key is returned
    /// anyway. Fails only when no key is active.
    pub fn select(&self, request_chars: u64) -> Result<Arc<Credential>> {
        if self.credentials.is_empty() {
            return Err(TranslationError::NoAvailableCredential);
        }

        self.reset_all_if_needed();

        let len = self.credentials.len();
        let start = self.cursor.load(Ordering::SeqCst) % len;
        for offset in 0..len {
            let index = (start + offset) % len;
            let credential = &self.credentials[index];
            if credential.is_active() && credential.has_quota(request_chars) {
                self.cursor.store(index, Ordering::SeqCst);
                debug!("Selected key #{} for {} chars", index, request_chars);
                return Ok(Arc::clone(credential));
            }
        }

        match self.credentials.iter().find(|c| c.is_active()) {
            Some(credential) => {
                warn!(
                    "No key has quota for {} chars, falling back to {}",
                    request_chars,
                    credential.masked_key()
                );
                Ok(Arc::clone(credential))
            }
            None => Err(TranslationError::NoAvailableCredential),
        }
    }

    pub fn usages(&self) -> Vec<ApiKeyUsage> {
        self.credentials.iter().map(|c| c.usage()).collect()
    }
}

/// Stable short identifier of a key, safe to persist
pub fn fingerprint(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex()[..16].to_string()
}

/// Key shown as `first8...last4`
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// First instant of the calendar month containing `now`
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_quota_conservation() {
        let credential = Credential::with_last_reset("key-a", 1000, at(2024, 3, 10));

        assert!(credential.has_quota(1000));
        credential.consume(600);
        credential.consume(400);
        assert!(!credential.has_quota(1));
        assert_eq!(credential.remaining(), 0);

        // same month: nothing happens
        assert!(!credential.reset_if_needed_at(at(2024, 3, 31)));
        assert!(!credential.has_quota(1));

        // rollover
        assert!(credential.reset_if_needed_at(at(2024, 4, 1)));
        assert!(credential.has_quota(1000));
        assert!(!credential.reset_if_needed_at(at(2024, 4, 2)));
    }

    #[test]
    fn test_same_month_next_year_resets() {
        let credential = Credential::with_last_reset("key-a", 10, at(2023, 5, 1));
        credential.consume(10);
        assert!(credential.reset_if_needed_at(at(2024, 5, 1)));
        assert_eq!(credential.chars_used(), 0);
    }

    #[test]
    fn test_consume_never_rejects() {
        let credential = Credential::new("key-a", 10);
        credential.consume(25);
        assert_eq!(credential.chars_used(), 25);
        assert_eq!(credential.remaining(), 0);
    }

    #[test]
    fn test_select_round_robin_skips_exhausted() {
        let pool = CredentialPool::new(vec![
            Credential::new("key-a", 100),
            Credential::new("key-b", 100),
        ]);

        let first = pool.select(50).unwrap();
        assert_eq!(first.key(), "key-a");
        first.consume(90);

        // a is short on quota, b is next
        let second = pool.select(50).unwrap();
        assert_eq!(second.key(), "key-b");

        // cursor stays on b while it has quota
        assert_eq!(pool.select(10).unwrap().key(), "key-b");
    }

    #[test]
    fn test_select_falls_back_to_first_active() {
        let pool = CredentialPool::new(vec![
            Credential::new("key-a", 10).deactivated(),
            Credential::new("key-b", 10),
            Credential::new("key-c", 10),
        ]);

        let chosen = pool.select(500).unwrap();
        assert_eq!(chosen.key(), "key-b");
    }

    #[test]
    fn test_select_without_active_keys() {
        let empty = CredentialPool::default();
        assert!(matches!(
            empty.select(1),
            Err(TranslationError::NoAvailableCredential)
        ));

        let inactive = CredentialPool::new(vec![Credential::new("key-a", 10).deactivated()]);
        assert!(matches!(
            inactive.select(1),
            Err(TranslationError::NoAvailableCredential)
        ));
    }

    #[test]
    fn test_from_keys_drops_blank_entries() {
        let pool = CredentialPool::from_keys(&["", "  key-a ", "key-b"], 10);
        let keys: Vec<&str> = pool.credentials().iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["key-a", "key-b"]);
    }

    #[test]
    fn test_find_by_fingerprint() {
        let pool = CredentialPool::from_keys(&["key-a", "key-b"], 10);
        let found = pool.find(&fingerprint("key-b")).map(|c| c.key());
        assert_eq!(found, Some("key-b"));
        assert!(pool.find(&fingerprint("key-c")).is_none());
    }

    #[test]
    fn test_masking_and_fingerprint() {
        assert_eq!(mask_key("ea5b8f25-b6c0-4d5d:fx"), "ea5b8f25...d:fx");
        assert_eq!(mask_key("short"), "*****");

        let fp = fingerprint("key-a");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, fingerprint("key-a"));
        assert_ne!(fp, fingerprint("key-b"));
    }

    #[test]
    fn test_month_start() {
        assert_eq!(
            month_start(at(2024, 2, 29)),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
    }
}
