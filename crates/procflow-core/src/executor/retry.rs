use std::time::Duration;

use crate::config::EngineConfig;

/// Reintentos acotados ante fallos transitorios del agente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1),
               backoff }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_attempts, config.retry_backoff)
    }

    /// ¿Queda otro intento después de `attempt` (1-based)?
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Espera lineal: `backoff * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_linear_backoff() {
        let p = RetryPolicy::new(3, Duration::from_millis(10));
        assert!(p.allows_another(1));
        assert!(p.allows_another(2));
        assert!(!p.allows_another(3));
        assert_eq!(p.delay_for(2), Duration::from_millis(20));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
