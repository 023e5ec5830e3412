//! Constantes del motor.
//!
//! `ENGINE_VERSION` participa en la derivación de `effect_id` y en el
//! fingerprint de la corrida: cambiarlo invalida deterministamente toda la
//! caché del ledger aunque la definición y los inputs no cambien.

/// Versión lógica del motor. Mantener estable mientras no haya cambios
/// incompatibles en el formato del journal o del ledger.
pub const ENGINE_VERSION: &str = "PF1.0";

/// Prefijo lógico de los documentos de entrada/salida de cada efecto.
pub const TASKS_PREFIX: &str = "tasks";

/// Prefijo lógico de los artifacts adjuntos a un breakpoint.
pub const REVIEWS_PREFIX: &str = "reviews";

/// Target de `log` usado por `RunContext::log`.
pub const RUN_LOG_TARGET: &str = "procflow::run";
