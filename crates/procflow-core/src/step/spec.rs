//! `StepSpec`: lo que la fábrica de un step de tarea produce a partir de sus
//! inputs y del `StepContext`.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::{task_input_path, task_result_path};
use crate::contract::TaskContract;
use crate::model::{ArtifactFormat, EffectId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Tarea delegada al agente externo.
    Agent { agent: String },
    /// Herramienta local determinista registrada en el `SkillRegistry`.
    Skill { skill: String },
}

impl TaskKind {
    pub fn label(&self) -> String {
        match self {
            TaskKind::Agent { agent } => format!("agent:{agent}"),
            TaskKind::Skill { skill } => format!("skill:{skill}"),
        }
    }
}

/// Par de paths (input, resultado) en el Artifact Store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIo {
    pub input_path: String,
    pub result_path: String,
}

impl TaskIo {
    /// Layout estándar `tasks/<effect_id>/{input,result}.<ext>`.
    pub fn for_effect(effect_id: &EffectId, format: ArtifactFormat) -> Self {
        Self { input_path: task_input_path(effect_id, format),
               result_path: task_result_path(effect_id, format) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub kind: TaskKind,
    pub title: String,
    pub role: Option<String>,
    pub instructions: Vec<String>,
    /// Plantilla con `{{task}}` y `{{context}}`.
    pub prompt_template: Option<String>,
    pub contract: TaskContract,
    /// Timeout por llamada; `None` usa el de `EngineConfig`.
    pub timeout: Option<Duration>,
    pub io: Option<TaskIo>,
    pub labels: Vec<String>,
}

impl StepSpec {
    pub fn agent(agent: impl Into<String>, title: impl Into<String>) -> Self {
        Self::with_kind(TaskKind::Agent { agent: agent.into() }, title.into())
    }

    pub fn skill(skill: impl Into<String>, title: impl Into<String>) -> Self {
        Self::with_kind(TaskKind::Skill { skill: skill.into() }, title.into())
    }

    fn with_kind(kind: TaskKind, title: String) -> Self {
        Self { kind,
               title,
               role: None,
               instructions: Vec::new(),
               prompt_template: None,
               contract: TaskContract::default(),
               timeout: None,
               io: None,
               labels: Vec::new() }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn instruction(mut self, line: impl Into<String>) -> Self {
        self.instructions.push(line.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn contract(mut self, contract: TaskContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn io(mut self, io: TaskIo) -> Self {
        self.io = Some(io);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

/// Contexto que recibe la fábrica de un step de tarea.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    pub run_id: Uuid,
    pub step: String,
    pub step_index: usize,
    pub effect_id: EffectId,
    /// Reloj lógico del step (estable entre replays).
    pub now: DateTime<Utc>,
}

impl StepContext {
    /// Paths estándar de input/resultado derivados del `effect_id`.
    pub fn io(&self) -> TaskIo {
        TaskIo::for_effect(&self.effect_id, ArtifactFormat::Json)
    }
}
