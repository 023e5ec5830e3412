//! Configuración del motor desde variables de entorno.
//! Usa el prefijo `PROCFLOW_` y carga `.env` una sola vez.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use log::warn;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Intentos de dispatch por efecto ante fallos transitorios.
    pub max_attempts: u32,
    /// Espera base entre intentos (crece linealmente con el intento).
    pub retry_backoff: Duration,
    /// Timeout por llamada al agente si el step no declara uno.
    pub task_timeout: Duration,
    /// Tiempo tras el cual un efecto `pending` sin dueño vivo puede
    /// reclamarse. Debe superar el timeout más largo de cualquier tarea.
    pub effect_lease: Duration,
    /// Despachar en paralelo tareas consecutivas sin dependencia entre sí.
    pub parallel_siblings: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_attempts: 3,
               retry_backoff: Duration::from_millis(250),
               task_timeout: Duration::from_secs(600),
               effect_lease: Duration::from_secs(660),
               parallel_siblings: true }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {name}={raw}");
            None
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let d = Self::default();
        let max_attempts = parse_var::<u32>("PROCFLOW_MAX_ATTEMPTS").filter(|n| *n > 0)
                                                                     .unwrap_or(d.max_attempts);
        let retry_backoff = parse_var::<u64>("PROCFLOW_RETRY_BACKOFF_MS").map(Duration::from_millis)
                                                                          .unwrap_or(d.retry_backoff);
        let task_timeout = parse_var::<u64>("PROCFLOW_TASK_TIMEOUT_SECS").filter(|s| *s > 0)
                                                                          .map(Duration::from_secs)
                                                                          .unwrap_or(d.task_timeout);
        let effect_lease = parse_var::<u64>("PROCFLOW_EFFECT_LEASE_SECS").map(Duration::from_secs)
                                                                          .unwrap_or(d.effect_lease);
        let parallel_siblings = parse_var::<bool>("PROCFLOW_PARALLEL_SIBLINGS").unwrap_or(d.parallel_siblings);
        Self { max_attempts,
               retry_backoff,
               task_timeout,
               effect_lease,
               parallel_siblings }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff(mut self, d: Duration) -> Self {
        self.retry_backoff = d;
        self
    }

    pub fn task_timeout(mut self, d: Duration) -> Self {
        self.task_timeout = d;
        self
    }

    pub fn effect_lease(mut self, d: Duration) -> Self {
        self.effect_lease = d;
        self
    }

    pub fn parallel_siblings(mut self, on: bool) -> Self {
        self.parallel_siblings = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters_clamp_attempts() {
        let c = EngineConfig::default().max_attempts(0).parallel_siblings(false);
        assert_eq!(c.max_attempts, 1);
        assert!(!c.parallel_siblings);
        assert_eq!(c.task_timeout, Duration::from_secs(600));
        assert!(c.effect_lease > c.task_timeout);
    }
}
