//! Named circuit breakers, one per protected resource
//!
//! Breakers are created lazily on first use from the registry defaults or a
//! per-resource override. Handles returned by the registry share state with
//! the stored breaker.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use super::error::ConfigResult;
use crate::time::{Clock, SystemClock};

/// Registry of circuit breakers keyed by resource name
pub struct CircuitBreakerRegistry<C: Clock = SystemClock> {
    defaults: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, CircuitBreaker<C>>,
    clock: Arc<C>,
}

impl<C: Clock> std::fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides.len())
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create a registry whose breakers use `defaults` unless overridden
    pub fn new(defaults: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(defaults, SystemClock)
    }
}

impl<C: Clock> CircuitBreakerRegistry<C> {
    /// Create a registry with a custom clock shared by every breaker
    pub fn with_clock(defaults: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
            clock: Arc::new(clock),
        })
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Use `config` for `resource` instead of the defaults
    ///
    /// Takes effect for breakers created afterwards; an existing breaker for
    /// the resource is dropped so the next lookup rebuilds it.
    pub fn set_override(
        &self,
        resource: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<()> {
        config.validate()?;
        let resource = resource.into();
        self.breakers.remove(&resource);
        self.overrides.insert(resource, config);
        Ok(())
    }

    /// Configuration a breaker for `resource` is (or would be) built with
    pub fn config_for(&self, resource: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(resource)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Breaker for `resource`, created on first use
    pub fn get_or_create(&self, resource: &str) -> CircuitBreaker<C> {
        if let Some(existing) = self.breakers.get(resource) {
            return existing.value().clone();
        }

        let config = self.config_for(resource);
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!(resource, "Creating circuit breaker");
                // Configs in the registry were validated on the way in
                CircuitBreaker::from_validated(config, Arc::clone(&self.clock)).named(resource)
            })
            .value()
            .clone()
    }

    /// Existing breaker for `resource`, without creating one
    pub fn get(&self, resource: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.get(resource).map(|entry| entry.value().clone())
    }

    pub fn metrics(&self, resource: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(resource).map(|entry| entry.value().metrics())
    }

    /// Metrics of every breaker, sorted by resource name
    pub fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn remove(&self, resource: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.remove(resource).map(|(_, breaker)| breaker)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
