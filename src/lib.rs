//! procflow
//!
//! Fachada del workspace:
//! - re-exporta `procflow_core` (motor, ledger, breakpoints, gates, runner);
//! - `persistence`: backends durables (filesystem y Postgres);
//! - `demo`: workflow de ejemplo usado por el binario `procflow-demo`.

pub mod demo;

pub use procflow_core::*;
pub use procflow_persistence as persistence;
