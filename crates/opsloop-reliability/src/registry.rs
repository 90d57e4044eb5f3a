//! Named circuit breaker registry
//!
//! Breakers are long-lived and shared: every caller guarding the same logical
//! dependency (one embedding API, one model provider) must hit the same
//! instance, or the failure counting falls apart. The registry is an
//! arena-by-name owned by the host; nothing here is a process global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};

/// Arena of named [`CircuitBreaker`]s.
///
/// `get_or_create` hands out the same `Arc` for the same name, so the config
/// passed by later callers is ignored once a breaker exists.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker registered under `name`, creating it with `config` on
    /// first use.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Get an existing breaker, if any
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(name).cloned()
    }

    /// Names of all registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
