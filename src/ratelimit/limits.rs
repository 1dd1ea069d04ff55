//! Per-caller request limits.
//!
//! Anonymous callers share the default limit; callers presenting an API key
//! must be listed in the [`ApiKeyTable`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::identity::Credentials;
use crate::config::{RateLimitingConfig, UnknownKeyPolicy};
use crate::error::LimitError;

/// A single registered API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub limit: i64,
}

/// Accepted shapes of the API key table in configuration.
///
/// Keys are carried as values rather than map keys because the layered
/// configuration loader lowercases map keys.
#[derive(Deserialize)]
#[serde(untagged)]
enum ApiKeyTableRepr {
    Entries(Vec<ApiKeyEntry>),
    /// `"key1:10,key2:20"`, as found in environment variables.
    Inline(String),
}

/// Exact-match table of API key to requests-per-second limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ApiKeyTableRepr", into = "Vec<ApiKeyEntry>")]
pub struct ApiKeyTable {
    limits: HashMap<String, i64>,
}

impl ApiKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the inline `key:limit,key:limit` form.
    ///
    /// Pairs that are not exactly `key:limit` with an integer limit are
    /// skipped.
    pub fn parse_inline(inline: &str) -> Self {
        let mut table = Self::new();
        for pair in inline.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parts: Vec<&str> = pair.split(':').map(str::trim).collect();
            if parts.len() != 2 {
                warn!(pair = %pair, "Ignoring malformed API key entry");
                continue;
            }
            match parts[1].parse::<i64>() {
                Ok(limit) => table.insert(parts[0], limit),
                Err(e) => warn!(key = %parts[0], error = %e, "Ignoring API key with invalid limit"),
            }
        }
        table
    }

    pub fn insert(&mut self, key: impl Into<String>, limit: i64) {
        self.limits.insert(key.into(), limit);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.limits.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.limits.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl From<ApiKeyTableRepr> for ApiKeyTable {
    fn from(repr: ApiKeyTableRepr) -> Self {
        match repr {
            ApiKeyTableRepr::Entries(entries) => entries.into_iter().collect(),
            ApiKeyTableRepr::Inline(inline) => Self::parse_inline(&inline),
        }
    }
}

impl From<ApiKeyTable> for Vec<ApiKeyEntry> {
    fn from(table: ApiKeyTable) -> Self {
        let mut entries: Vec<ApiKeyEntry> = table
            .limits
            .into_iter()
            .map(|(key, limit)| ApiKeyEntry { key, limit })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

impl FromIterator<ApiKeyEntry> for ApiKeyTable {
    fn from_iter<I: IntoIterator<Item = ApiKeyEntry>>(iter: I) -> Self {
        Self {
            limits: iter.into_iter().map(|e| (e.key, e.limit)).collect(),
        }
    }
}

/// Resolves the request limit and penalty for a caller.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct LimitSource {
    default_limit: i64,
    api_keys: ApiKeyTable,
    penalty: Duration,
    unknown_key_policy: UnknownKeyPolicy,
}

impl LimitSource {
    pub fn new(default_limit: i64, api_keys: ApiKeyTable, penalty: Duration) -> Self {
        Self {
            default_limit,
            api_keys,
            penalty,
            unknown_key_policy: UnknownKeyPolicy::Reject,
        }
    }

    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(
            config.default_limit,
            config.api_keys.clone(),
            Duration::from_secs(config.blocked_time_secs),
        )
        .with_unknown_key_policy(config.unknown_key_policy)
    }

    pub fn with_unknown_key_policy(mut self, policy: UnknownKeyPolicy) -> Self {
        self.unknown_key_policy = policy;
        self
    }

    /// Requests per window allowed for `api_key`.
    ///
    /// An empty key gets the default limit. A key missing from the table is
    /// an authentication failure, never the default.
    pub fn limit_for(&self, api_key: &str) -> Result<i64, LimitError> {
        if api_key.is_empty() {
            return Ok(self.default_limit);
        }
        self.api_keys.get(api_key).ok_or(LimitError::UnknownApiKey)
    }

    /// How long a caller stays blacklisted after exceeding its limit.
    pub fn penalty(&self) -> Duration {
        self.penalty
    }

    /// Apply the unknown-key policy to freshly resolved credentials.
    ///
    /// Under [`UnknownKeyPolicy::FallbackToIp`] an unregistered key is
    /// dropped, so the caller is counted and blacklisted by client IP.
    pub fn normalize(&self, credentials: Credentials) -> Credentials {
        match self.unknown_key_policy {
            UnknownKeyPolicy::Reject => credentials,
            UnknownKeyPolicy::FallbackToIp => {
                if credentials.has_api_key() && self.api_keys.get(&credentials.api_key).is_none() {
                    debug!(client_ip = %credentials.client_ip, "Unregistered API key, limiting by client IP");
                    credentials.without_api_key()
                } else {
                    credentials
                }
            }
        }
    }
}
