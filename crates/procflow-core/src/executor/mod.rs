//! Task Executor: ledger -> (caché | dispatch) -> contrato -> ledger.
//!
//! 1. Deriva el `effect_id` de los inputs canónicos y llama a
//!    `get_or_create`.
//! 2. Un efecto `succeeded` devuelve el resultado cacheado sin tocar al
//!    agente.
//! 3. Si no, persiste los inputs en `tasks/<effect_id>/input.json`, despacha
//!    al agente (o skill) y valida la salida contra el `TaskContract`.
//! 4. La salida válida se persiste en `tasks/<effect_id>/result.json` y el
//!    efecto pasa a `succeeded`.
//!
//! Fallos transitorios (timeout, agente inalcanzable) marcan el efecto como
//! `failed` y se reintentan con la misma clave hasta `RetryPolicy`. Una
//! violación de contrato nunca se reintenta automáticamente.
//!
//! Un efecto `pending` creado por otro llamador sólo se reclama si nadie en
//! este proceso lo está despachando y su lease venció. Si no, `run` devuelve
//! `TaskError::InFlight` sin contactar al agente.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::{render_prompt, AgentClient, AgentError, AgentReply, AgentRequest, SkillRegistry,
                   DEFAULT_PROMPT_TEMPLATE};
use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::config::EngineConfig;
use crate::contract::{extract_first_json, ContractViolation};
use crate::errors::CoreEngineError;
use crate::hashing::hash_value;
use crate::ledger::{EffectLedger, LedgerError, NewEffect};
use crate::model::{ArtifactFormat, ArtifactRef, EffectId, EffectRecord, EffectStatus};
use crate::step::{EffectKey, StepSpec, TaskIo, TaskKind};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("effect {effect_id}: contract violation: {violation}")]
    Contract { effect_id: EffectId, violation: ContractViolation },
    #[error("effect {effect_id}: dispatch failed after {attempts} attempt(s): {reason}")]
    Exhausted { effect_id: EffectId, attempts: u32, reason: String },
    #[error("effect {effect_id}: {reason}")]
    Rejected { effect_id: EffectId, reason: String },
    #[error("effect {effect_id} failed previously: {reason}")]
    PreviouslyFailed { effect_id: EffectId, reason: String },
    #[error("unknown skill '{0}'")]
    UnknownSkill(String),
    #[error("skill '{skill}' failed: {reason}")]
    Skill { skill: String, reason: String },
    #[error("effect {0} is already being dispatched")]
    InFlight(EffectId),
    #[error("effect {effect_id}: stored result is unusable: {details}")]
    CorruptResult { effect_id: EffectId, details: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

impl TaskError {
    /// Error con el que el step queda fallido en el journal. `None` para
    /// fallos de infraestructura, que se propagan al llamador.
    pub fn step_error(&self) -> Option<CoreEngineError> {
        let e = match self {
            TaskError::Contract { violation, .. } => CoreEngineError::ContractViolation(violation.to_string()),
            TaskError::Exhausted { attempts, reason, .. } => CoreEngineError::DispatchExhausted { attempts: *attempts,
                                                                                                   reason: reason.clone() },
            TaskError::Rejected { reason, .. } => CoreEngineError::AgentRejected(reason.clone()),
            TaskError::PreviouslyFailed { effect_id, reason } => {
                CoreEngineError::EffectFailed { effect_id: effect_id.to_string(),
                                                reason: reason.clone() }
            }
            TaskError::UnknownSkill(s) => CoreEngineError::UnknownSkill(s.clone()),
            TaskError::Skill { skill, reason } => CoreEngineError::SkillFailed { skill: skill.clone(),
                                                                                  reason: reason.clone() },
            TaskError::CorruptResult { effect_id, details } => {
                CoreEngineError::LedgerInconsistency { effect_id: effect_id.to_string(),
                                                       details: details.clone() }
            }
            TaskError::Ledger(LedgerError::Inconsistent { effect_id, stored, given }) => {
                CoreEngineError::LedgerInconsistency { effect_id: effect_id.to_string(),
                                                       details: format!("stored input hash {stored}, given {given}") }
            }
            TaskError::InFlight(_)
            | TaskError::Ledger(LedgerError::Backend(_))
            | TaskError::Artifacts(ArtifactError::Backend(_)) => return None,
            TaskError::Ledger(other) => CoreEngineError::Storage(other.to_string()),
            TaskError::Artifacts(other) => CoreEngineError::Storage(other.to_string()),
        };
        Some(e)
    }
}

/// Deriva `(effect_id, input_hash)` para un step de tarea.
pub fn derive_effect_id(run_id: Uuid, step: &str, key: &EffectKey, inputs: &Value) -> (EffectId, String) {
    let input_hash = hash_value(inputs);
    let id = match key {
        EffectKey::Inputs => EffectId::derive(run_id, step, &input_hash),
        EffectKey::Fixed(k) => EffectId::derive(run_id, step, &format!("fixed:{k}")),
    };
    (id, input_hash)
}

/// Una invocación concreta de tarea.
#[derive(Debug, Clone)]
pub struct TaskInvocation<'a> {
    pub run_id: Uuid,
    pub step: &'a str,
    pub effect_id: EffectId,
    pub input_hash: String,
    pub inputs: &'a Value,
    pub spec: &'a StepSpec,
    /// Reintentar un efecto `failed` en lugar de devolver su error.
    pub force_retry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub effect_id: EffectId,
    pub output: Value,
    pub result_ref: ArtifactRef,
    pub output_hash: String,
    /// `true` si vino del ledger sin contactar al agente.
    pub cached: bool,
    pub attempts: u32,
}

enum DispatchFailure {
    Transient(String),
    Fatal(TaskError),
}

/// Marca de dispatch en curso; se libera al soltarse (también si el
/// futuro se cancela).
struct InFlightGuard<'a> {
    set: &'a DashSet<EffectId>,
    effect_id: EffectId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.effect_id);
    }
}

pub struct TaskExecutor {
    ledger: Arc<dyn EffectLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    agent: Arc<dyn AgentClient>,
    skills: SkillRegistry,
    policy: RetryPolicy,
    default_timeout: Duration,
    lease: Duration,
    in_flight: DashSet<EffectId>,
}

impl TaskExecutor {
    pub fn new(ledger: Arc<dyn EffectLedger>,
               artifacts: Arc<dyn ArtifactStore>,
               agent: Arc<dyn AgentClient>,
               skills: SkillRegistry,
               config: &EngineConfig)
               -> Self {
        Self { ledger,
               artifacts,
               agent,
               skills,
               policy: RetryPolicy::from_config(config),
               default_timeout: config.task_timeout,
               lease: config.effect_lease,
               in_flight: DashSet::new() }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// `Err(InFlight)` si el efecto está `pending` y su dueño puede seguir
    /// vivo: despachado en este proceso o con el lease vigente.
    pub fn ensure_unowned(&self, effect_id: &EffectId) -> Result<(), TaskError> {
        match self.ledger.get(effect_id)? {
            Some(record) if record.status == EffectStatus::Pending => {
                if self.in_flight.contains(effect_id) {
                    return Err(TaskError::InFlight(effect_id.clone()));
                }
                self.ensure_abandoned(&record)
            }
            _ => Ok(()),
        }
    }

    fn ensure_abandoned(&self, record: &EffectRecord) -> Result<(), TaskError> {
        if record.lease_expired(self.lease, Utc::now()) {
            Ok(())
        } else {
            Err(TaskError::InFlight(record.effect_id.clone()))
        }
    }

    fn enter(&self, effect_id: &EffectId) -> Result<InFlightGuard<'_>, TaskError> {
        if !self.in_flight.insert(effect_id.clone()) {
            return Err(TaskError::InFlight(effect_id.clone()));
        }
        Ok(InFlightGuard { set: &self.in_flight,
                           effect_id: effect_id.clone() })
    }

    pub async fn run(&self, inv: TaskInvocation<'_>) -> Result<TaskResult, TaskError> {
        let id = inv.effect_id.clone();
        let _guard = self.enter(&id)?;
        let claim = self.ledger.get_or_create(NewEffect { effect_id: id.clone(),
                                                          run_id: inv.run_id,
                                                          step: inv.step.to_string(),
                                                          input_hash: inv.input_hash.clone() })?;
        let mut record = claim.record;
        match record.status {
            EffectStatus::Succeeded => {
                debug!("effect {id} ({}) served from ledger", inv.step);
                return self.cached(&record);
            }
            EffectStatus::Failed if inv.force_retry => {
                warn!("forcing retry of failed effect {id} ({})", inv.step);
                record = self.ledger.retry(&id)?;
            }
            EffectStatus::Failed => {
                return Err(TaskError::PreviouslyFailed { effect_id: id,
                                                         reason: record.error.unwrap_or_default() })
            }
            EffectStatus::Pending if !claim.created => {
                self.ensure_abandoned(&record)?;
                warn!("reclaiming abandoned pending effect {id} ({})", inv.step);
                record = self.ledger.reclaim(&id)?;
            }
            EffectStatus::Pending => {}
        }

        let io = inv.spec
                    .io
                    .clone()
                    .unwrap_or_else(|| TaskIo::for_effect(&id, ArtifactFormat::Json));
        self.artifacts.put(inv.run_id, &io.input_path, ArtifactFormat::Json, inv.inputs)?;

        let mut attempt = record.attempts;
        let mut tries: u32 = 1;
        loop {
            match self.dispatch(&inv, &io, attempt).await {
                Ok(output) => {
                    if let Err(violation) = inv.spec.contract.validate(&output) {
                        self.ledger.fail(&id, &violation.to_string())?;
                        return Err(TaskError::Contract { effect_id: id, violation });
                    }
                    let result_ref = self.artifacts.put(inv.run_id, &io.result_path, ArtifactFormat::Json, &output)?;
                    let done = self.ledger.complete(&id, result_ref.clone())?;
                    info!("effect {id} ({}) succeeded on attempt {}", inv.step, done.attempts);
                    return Ok(TaskResult { effect_id: id,
                                           output_hash: result_ref.content_hash.clone(),
                                           output,
                                           result_ref,
                                           cached: false,
                                           attempts: done.attempts });
                }
                Err(DispatchFailure::Transient(reason)) => {
                    self.ledger.fail(&id, &reason)?;
                    if !self.policy.allows_another(tries) {
                        return Err(TaskError::Exhausted { effect_id: id,
                                                          attempts: tries,
                                                          reason });
                    }
                    let delay = self.policy.delay_for(tries);
                    warn!("effect {id} ({}) attempt {tries} failed: {reason}; retrying in {delay:?}", inv.step);
                    tokio::time::sleep(delay).await;
                    attempt = self.ledger.retry(&id)?.attempts;
                    tries += 1;
                }
                Err(DispatchFailure::Fatal(err)) => {
                    self.ledger.fail(&id, &err.to_string())?;
                    return Err(err);
                }
            }
        }
    }

    fn cached(&self, record: &EffectRecord) -> Result<TaskResult, TaskError> {
        let corrupt = |details: String| TaskError::CorruptResult { effect_id: record.effect_id.clone(),
                                                                   details };
        let result_ref = record.result_ref
                               .clone()
                               .ok_or_else(|| corrupt("succeeded effect without result reference".into()))?;
        let artifact = match self.artifacts.get(&result_ref) {
            Ok(a) => a,
            Err(e @ ArtifactError::Backend(_)) => return Err(e.into()),
            Err(e) => return Err(corrupt(e.to_string())),
        };
        Ok(TaskResult { effect_id: record.effect_id.clone(),
                        output: artifact.content,
                        output_hash: result_ref.content_hash.clone(),
                        result_ref,
                        cached: true,
                        attempts: record.attempts })
    }

    async fn dispatch(&self, inv: &TaskInvocation<'_>, io: &TaskIo, attempt: u32) -> Result<Value, DispatchFailure> {
        match &inv.spec.kind {
            TaskKind::Skill { skill } => {
                let s = self.skills
                            .get(skill)
                            .ok_or_else(|| DispatchFailure::Fatal(TaskError::UnknownSkill(skill.clone())))?;
                s.run(inv.inputs).map_err(|reason| {
                                      DispatchFailure::Fatal(TaskError::Skill { skill: skill.clone(),
                                                                                reason })
                                  })
            }
            TaskKind::Agent { agent } => {
                let spec = inv.spec;
                let template = spec.prompt_template.as_deref().unwrap_or(DEFAULT_PROMPT_TEMPLATE);
                let request = AgentRequest { run_id: inv.run_id,
                                             effect_id: inv.effect_id.clone(),
                                             step: inv.step.to_string(),
                                             agent: agent.clone(),
                                             title: spec.title.clone(),
                                             role: spec.role.clone(),
                                             instructions: spec.instructions.clone(),
                                             prompt: render_prompt(template, &spec.title, inv.inputs),
                                             inputs: inv.inputs.clone(),
                                             output_schema: spec.contract.to_json_schema(),
                                             io: io.clone(),
                                             attempt };
                let timeout = spec.timeout.unwrap_or(self.default_timeout);
                let reply = match tokio::time::timeout(timeout, self.agent.invoke(&request)).await {
                    Err(_) => return Err(DispatchFailure::Transient(AgentError::Timeout(timeout).to_string())),
                    Ok(Err(e)) if e.is_transient() => return Err(DispatchFailure::Transient(e.to_string())),
                    Ok(Err(e)) => {
                        return Err(DispatchFailure::Fatal(TaskError::Rejected { effect_id: inv.effect_id.clone(),
                                                                                 reason: e.to_string() }))
                    }
                    Ok(Ok(reply)) => reply,
                };
                match reply {
                    AgentReply::Json(v) => Ok(v),
                    AgentReply::Text(text) => extract_first_json(&text).ok_or_else(|| {
                                                  DispatchFailure::Fatal(TaskError::Contract { effect_id: inv.effect_id.clone(),
                                                                                               violation: ContractViolation::NoJson })
                                              }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::contract::{FieldType, TaskContract};
    use crate::ledger::InMemoryEffectLedger;
    use serde_json::json;

    struct Fixture {
        agent: Arc<ScriptedAgent>,
        ledger: Arc<InMemoryEffectLedger>,
        executor: TaskExecutor,
    }

    fn fixture(agent: ScriptedAgent) -> Fixture {
        fixture_with(agent, EngineConfig::default().retry_backoff(Duration::from_millis(1)))
    }

    fn fixture_with(agent: ScriptedAgent, config: EngineConfig) -> Fixture {
        let agent = Arc::new(agent);
        let ledger = Arc::new(InMemoryEffectLedger::new());
        let executor = TaskExecutor::new(ledger.clone(),
                                         Arc::new(InMemoryArtifactStore::new()),
                                         agent.clone(),
                                         SkillRegistry::new(),
                                         &config);
        Fixture { agent, ledger, executor }
    }

    fn spec() -> StepSpec {
        StepSpec::agent("analyst", "Analyse").contract(TaskContract::new().required("summary", FieldType::String))
    }

    fn invocation<'a>(run: Uuid, inputs: &'a Value, spec: &'a StepSpec) -> TaskInvocation<'a> {
        let (effect_id, input_hash) = derive_effect_id(run, "analyse", &EffectKey::Inputs, inputs);
        TaskInvocation { run_id: run,
                         step: "analyse",
                         effect_id,
                         input_hash,
                         inputs,
                         spec,
                         force_retry: false }
    }

    #[tokio::test]
    async fn second_invocation_is_served_from_the_ledger() {
        let f = fixture(ScriptedAgent::new().reply_json("analyse", json!({"summary": "ok"})));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({"doc": 1}), spec());
        let first = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap();
        let second = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.output, second.output);
        assert_eq!(f.agent.calls("analyse"), 1);
    }

    #[tokio::test]
    async fn contract_violation_is_not_cached_nor_retried() {
        let f = fixture(ScriptedAgent::new().reply_json("analyse", json!({"other": 1})));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let inv = invocation(run, &inputs, &spec);
        let id = inv.effect_id.clone();
        let err = f.executor.run(inv).await.unwrap_err();
        assert!(matches!(err, TaskError::Contract { .. }));
        assert_eq!(f.agent.calls("analyse"), 1);
        let rec = f.ledger.get(&id).unwrap().unwrap();
        assert_eq!(rec.status, EffectStatus::Failed);
        assert!(rec.result_ref.is_none());
        assert!(matches!(err.step_error(), Some(CoreEngineError::ContractViolation(_))));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_the_same_effect_id() {
        let f = fixture(ScriptedAgent::new().fail_times("analyse", 2, AgentError::Unreachable("down".into()))
                                            .reply_json("analyse", json!({"summary": "third time"})));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let out = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(f.agent.calls("analyse"), 3);
        let attempts: Vec<u32> = f.agent.requests("analyse").iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(f.agent.requests("analyse").iter().all(|r| r.effect_id == out.effect_id));
    }

    #[tokio::test]
    async fn exhausted_retries_leave_a_failed_effect_until_forced() {
        let f = fixture(ScriptedAgent::new().fail_times("analyse", 3, AgentError::Unreachable("down".into()))
                                            .reply_json("analyse", json!({"summary": "back"})));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let err = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap_err();
        assert!(matches!(err, TaskError::Exhausted { attempts: 3, .. }));

        let again = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap_err();
        assert!(matches!(again, TaskError::PreviouslyFailed { .. }));
        assert_eq!(f.agent.calls("analyse"), 3);

        let mut forced = invocation(run, &inputs, &spec);
        forced.force_retry = true;
        let ok = f.executor.run(forced).await.unwrap();
        assert_eq!(ok.attempts, 4);
    }

    fn claim_elsewhere(ledger: &InMemoryEffectLedger, run: Uuid, inv: &TaskInvocation<'_>) {
        let claim = ledger.get_or_create(NewEffect { effect_id: inv.effect_id.clone(),
                                                     run_id: run,
                                                     step: inv.step.to_string(),
                                                     input_hash: inv.input_hash.clone() })
                          .unwrap();
        assert!(claim.created);
    }

    #[tokio::test]
    async fn pending_effect_with_a_live_lease_is_left_alone() {
        let f = fixture(ScriptedAgent::new().reply_json("analyse", json!({"summary": "ok"})));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let inv = invocation(run, &inputs, &spec);
        claim_elsewhere(&f.ledger, run, &inv);

        assert!(matches!(f.executor.ensure_unowned(&inv.effect_id), Err(TaskError::InFlight(_))));
        let err = f.executor.run(inv).await.unwrap_err();
        assert!(matches!(err, TaskError::InFlight(_)));
        assert!(err.step_error().is_none());
        assert_eq!(f.agent.calls("analyse"), 0);
    }

    #[tokio::test]
    async fn pending_effect_past_its_lease_is_reclaimed() {
        let config = EngineConfig::default().effect_lease(Duration::ZERO);
        let f = fixture_with(ScriptedAgent::new().reply_json("analyse", json!({"summary": "ok"})), config);
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let inv = invocation(run, &inputs, &spec);
        claim_elsewhere(&f.ledger, run, &inv);

        f.executor.ensure_unowned(&inv.effect_id).unwrap();
        let out = f.executor.run(inv).await.unwrap();
        assert_eq!(out.attempts, 2);
        assert_eq!(f.agent.calls("analyse"), 1);
    }

    #[tokio::test]
    async fn overlapping_invocations_in_one_process_dispatch_once() {
        let config = EngineConfig::default().effect_lease(Duration::ZERO);
        let f = fixture_with(ScriptedAgent::new().reply_json("analyse", json!({"summary": "ok"}))
                                                 .delay("analyse", Duration::from_millis(50)),
                             config);
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let (first, second) = tokio::join!(f.executor.run(invocation(run, &inputs, &spec)),
                                           f.executor.run(invocation(run, &inputs, &spec)));
        assert!(first.is_ok());
        assert!(matches!(second, Err(TaskError::InFlight(_))));
        assert_eq!(f.agent.calls("analyse"), 1);

        let again = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap();
        assert!(again.cached);
    }

    #[tokio::test]
    async fn text_replies_are_scanned_for_json() {
        let f = fixture(ScriptedAgent::new().reply_text("analyse", "Result:\n{\"summary\": \"found\"}\nthanks"));
        let (run, inputs, spec) = (Uuid::new_v4(), json!({}), spec());
        let out = f.executor.run(invocation(run, &inputs, &spec)).await.unwrap();
        assert_eq!(out.output, json!({"summary": "found"}));
        assert_eq!(out.result_ref.path, format!("tasks/{}/result.json", out.effect_id));
    }

    #[test]
    fn effect_id_changes_with_inputs_and_is_stable_otherwise() {
        let run = Uuid::new_v4();
        let (a, _) = derive_effect_id(run, "s", &EffectKey::Inputs, &json!({"x": 1, "y": 2}));
        let (b, _) = derive_effect_id(run, "s", &EffectKey::Inputs, &json!({"y": 2, "x": 1}));
        let (c, _) = derive_effect_id(run, "s", &EffectKey::Inputs, &json!({"x": 2, "y": 2}));
        let (d, _) = derive_effect_id(run, "s", &EffectKey::Fixed("k".into()), &json!({"x": 2}));
        let (e, _) = derive_effect_id(run, "s", &EffectKey::Fixed("k".into()), &json!({"x": 3}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(d, e);
    }
}
