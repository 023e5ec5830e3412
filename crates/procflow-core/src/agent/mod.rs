//! Frontera con el agente externo.
//!
//! El agente es una caja negra no determinista alcanzada por RPC/IPC. El core
//! sólo conoce `AgentClient`: recibe un `AgentRequest` con el contrato
//! declarado y devuelve JSON o texto libre (del que luego se extrae el primer
//! documento JSON).

pub mod prompt;
pub mod skill;
pub mod testing;

pub use prompt::{render_prompt, DEFAULT_PROMPT_TEMPLATE};
pub use skill::{FnSkill, Skill, SkillRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::EffectId;
use crate::step::TaskIo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub run_id: Uuid,
    pub effect_id: EffectId,
    pub step: String,
    pub agent: String,
    pub title: String,
    pub role: Option<String>,
    pub instructions: Vec<String>,
    /// Prompt ya renderizado.
    pub prompt: String,
    pub inputs: Value,
    /// Esquema JSON de la salida requerida.
    pub output_schema: Value,
    pub io: TaskIo,
    /// Intento del efecto (1 = primero).
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent unreachable: {0}")]
    Unreachable(String),
    #[error("agent call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// El agente rechazó la tarea; reintentar no cambia el resultado.
    #[error("agent rejected the task: {0}")]
    Rejected(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Unreachable(_) | AgentError::Timeout(_))
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentReply, AgentError>;
}
