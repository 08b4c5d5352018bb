//! # Bridge configuration
//!
//! Per-instance policy for a [`RuntimeBridgeContext`](crate::context::RuntimeBridgeContext).
//! Every field has a default, so a partial JSON document is a valid config.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid bridge config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid bridge config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ceiling for async calls. `None` leaves unanswered calls pending.
    pub call_timeout_ms: Option<u64>,
    /// How long a retired callId is remembered, so a late result can be told
    /// apart from a double settlement.
    pub late_result_window_ms: u64,
    /// Age after which an in-flight call is reported as stale.
    pub stale_call_threshold_ms: u64,
    /// Nesting limit for marshaling.
    pub max_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            late_result_window_ms: 60_000,
            stale_call_threshold_ms: 30_000,
            max_depth: glueval::DEFAULT_MAX_DEPTH,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::Invalid("max_depth must be at least 1".into()));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(Error::Invalid("call_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn without_call_timeout(mut self) -> Self {
        self.call_timeout_ms = None;
        self
    }

    pub fn with_late_result_window(mut self, window: Duration) -> Self {
        self.late_result_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_stale_call_threshold(mut self, threshold: Duration) -> Self {
        self.stale_call_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn late_result_window(&self) -> Duration {
        Duration::from_millis(self.late_result_window_ms)
    }

    pub fn stale_call_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_call_threshold_ms)
    }
}
