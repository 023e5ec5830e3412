//! Runner de workflows: builder, runner y contexto de ejecución.

pub mod builder;
pub mod core;
pub mod run_ctx;

pub use builder::RunnerBuilder;
pub use self::core::WorkflowRunner;
pub use run_ctx::{LogicalClock, RunContext};
