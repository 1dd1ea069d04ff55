//! Core admission decision.
//!
//! A request is evaluated in a fixed order, stopping at the first rejection:
//!
//! 1. blacklist check, without consuming any quota
//! 2. limit resolution for the presented API key
//! 3. atomic increment of the caller's fixed-window counter
//!
//! A counter above its limit rejects the request and then blacklists the
//! caller for the configured penalty.

use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use super::backend::{CountingStore, BLACKLIST_MARKER};
use super::identity::Credentials;
use super::limits::LimitSource;
use crate::config::{BlacklistWriteFailure, RateLimitingConfig};
use crate::error::LimitError;

/// Body of a 429 response.
pub const RATE_LIMITED_MSG: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";
/// Body of a 401 response.
pub const INVALID_KEY_MSG: &str = "Invalid API Key";
/// Body of a 500 response.
pub const INTERNAL_ERROR_MSG: &str = "Internal Server Error";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request.
    Allowed,
    /// The API key is not registered.
    InvalidKey,
    /// Quota exceeded, or a penalty is still running.
    RateLimited,
    /// The counting store failed; the request is rejected, never let through.
    InternalError,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// HTTP status code equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            Verdict::Allowed => 200,
            Verdict::InvalidKey => 401,
            Verdict::RateLimited => 429,
            Verdict::InternalError => 500,
        }
    }

    /// Human readable reason, empty for [`Verdict::Allowed`].
    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Allowed => "",
            Verdict::InvalidKey => INVALID_KEY_MSG,
            Verdict::RateLimited => RATE_LIMITED_MSG,
            Verdict::InternalError => INTERNAL_ERROR_MSG,
        }
    }
}

/// The rate limiting decision engine.
///
/// Holds no mutable state of its own: every cross-request effect goes through
/// the [`CountingStore`], so one instance can be shared by all request tasks.
pub struct RateLimiter {
    store: Arc<dyn CountingStore>,
    limits: LimitSource,
    blacklist_write_failure: BlacklistWriteFailure,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CountingStore>, limits: LimitSource) -> Self {
        Self {
            store,
            limits,
            blacklist_write_failure: BlacklistWriteFailure::KeepVerdict,
        }
    }

    pub fn from_config(store: Arc<dyn CountingStore>, config: &RateLimitingConfig) -> Self {
        Self::new(store, LimitSource::from_config(config))
            .with_blacklist_write_failure(config.blacklist_write_failure)
    }

    pub fn with_blacklist_write_failure(mut self, policy: BlacklistWriteFailure) -> Self {
        self.blacklist_write_failure = policy;
        self
    }

    pub fn limits(&self) -> &LimitSource {
        &self.limits
    }

    /// Decide whether a caller may proceed.
    ///
    /// Never fails: store errors become [`Verdict::InternalError`].
    #[instrument(skip(self, credentials), fields(caller = %credentials))]
    pub async fn check(&self, credentials: Credentials) -> Verdict {
        let credentials = self.limits.normalize(credentials);
        let verdict = match self.evaluate(&credentials).await {
            Ok(()) => Verdict::Allowed,
            Err(verdict) => verdict,
        };
        debug!(verdict = ?verdict, "Admission decision made");
        verdict
    }

    async fn evaluate(&self, credentials: &Credentials) -> Result<(), Verdict> {
        let blacklist_key = credentials.blacklist_key();
        self.ensure_not_blacklisted(&blacklist_key).await?;

        let limit = self.resolve_limit(credentials)?;

        let requests_key = credentials.requests_key();
        let count = self.count_request(&requests_key).await?;
        if count <= limit {
            return Ok(());
        }

        debug!(key = %requests_key, count = count, limit = limit, "Rate limit exceeded");
        Err(self.penalize(&blacklist_key).await)
    }

    async fn ensure_not_blacklisted(&self, blacklist_key: &str) -> Result<(), Verdict> {
        match self.store.get(blacklist_key).await {
            Ok(Some(marker)) if !marker.is_empty() => {
                debug!(key = %blacklist_key, "Caller is blacklisted");
                Err(Verdict::RateLimited)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                error!(key = %blacklist_key, error = %e, "Blacklist lookup failed");
                Err(Verdict::InternalError)
            }
        }
    }

    fn resolve_limit(&self, credentials: &Credentials) -> Result<i64, Verdict> {
        self.limits.limit_for(&credentials.api_key).map_err(|e| match e {
            LimitError::UnknownApiKey => {
                warn!(client_ip = %credentials.client_ip, "Rejected unregistered API key");
                Verdict::InvalidKey
            }
        })
    }

    async fn count_request(&self, requests_key: &str) -> Result<i64, Verdict> {
        self.store
            .increment_with_window_expiry(requests_key)
            .await
            .map_err(|e| {
                error!(key = %requests_key, error = %e, "Request counter update failed");
                Verdict::InternalError
            })
    }

    /// Blacklist a caller whose request was already rejected.
    ///
    /// The write runs after the verdict is settled. Its failure only changes
    /// the verdict under [`BlacklistWriteFailure::InternalError`].
    async fn penalize(&self, blacklist_key: &str) -> Verdict {
        let verdict = Verdict::RateLimited;

        let penalty = self.limits.penalty();
        if penalty.is_zero() {
            return verdict;
        }

        match self.store.set(blacklist_key, BLACKLIST_MARKER, penalty).await {
            Ok(()) => {
                debug!(key = %blacklist_key, penalty_secs = penalty.as_secs(), "Caller blacklisted");
                verdict
            }
            Err(e) => {
                error!(key = %blacklist_key, error = %e, "Failed to blacklist caller");
                match self.blacklist_write_failure {
                    BlacklistWriteFailure::KeepVerdict => verdict,
                    BlacklistWriteFailure::InternalError => Verdict::InternalError,
                }
            }
        }
    }
}
