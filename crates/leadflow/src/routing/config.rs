use std::sync::{Arc, RwLock};

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunable routing behavior, adjustable at runtime through the config API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Candidates scoring below this composite confidence are never assigned.
    pub min_confidence_threshold: f64,
    /// Ranked candidate lists are cut to this many entries.
    pub max_agents_per_lead: usize,
    /// How long an agent has to respond before an assignment goes stale.
    pub notification_timeout_ms: u64,
    /// Rotate among equally scored top candidates instead of always taking the first.
    pub round_robin_enabled: bool,
    /// Break confidence ties in favor of the less loaded agent.
    pub load_balancing_enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.5,
            max_agents_per_lead: 5,
            notification_timeout_ms: 900_000,
            round_robin_enabled: false,
            load_balancing_enabled: true,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            return Err(ConfigValidationError::ThresholdOutOfRange);
        }
        if self.max_agents_per_lead == 0 {
            return Err(ConfigValidationError::NoCandidateBudget);
        }
        if self.notification_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::milliseconds(self.notification_timeout_ms as i64)
    }
}

/// Rejected routing configuration updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("min_confidence_threshold must lie within 0.0..=1.0")]
    ThresholdOutOfRange,
    #[error("max_agents_per_lead must be at least 1")]
    NoCandidateBudget,
    #[error("notification_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

/// Shared handle around the live routing configuration.
///
/// Operations snapshot the config once at their start, so a concurrent update
/// never changes the rules halfway through a routing decision.
#[derive(Debug, Clone)]
pub struct RoutingConfigHandle {
    inner: Arc<RwLock<RoutingConfig>>,
}

impl RoutingConfigHandle {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> RoutingConfig {
        self.inner.read().expect("routing config lock poisoned").clone()
    }

    /// Validates and swaps in a new configuration, returning the applied value.
    pub fn replace(&self, next: RoutingConfig) -> Result<RoutingConfig, ConfigValidationError> {
        next.validate()?;
        let mut guard = self.inner.write().expect("routing config lock poisoned");
        *guard = next.clone();
        Ok(next)
    }
}

impl Default for RoutingConfigHandle {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}
