pub mod definition;
pub mod replay;

pub use definition::{DefinitionError, WorkflowDefinition, WorkflowRegistry};
pub use replay::{replay, ReplayError, ReplayRepository, RunRepository};
