//! `WorkflowRunner`: orquesta una corrida sobre el journal.
//!
//! Cada entrada pública (start, resume, resolve, retry) reconstruye el
//! `RunState` por replay, rehidrata los outputs con nombre desde el journal y
//! el ledger, y continúa en el primer step no terminado. El progreso sólo se
//! registra como eventos; no hay estado en memoria entre llamadas.
//!
//! Orden de ejecución:
//! - Los steps se ejecutan en orden de definición.
//! - Tareas consecutivas sin dependencia entre sí forman una "ola" que se
//!   despacha en paralelo (si `EngineConfig::parallel_siblings`); sus
//!   eventos se agregan en orden de definición después del join.
//! - Un breakpoint (o un gate que escala) suspende la corrida.
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn, Level};
use serde_json::{json, Value};
use uuid::Uuid;

use super::run_ctx::RunContext;
use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::breakpoint::{BreakpointError, BreakpointManager, SuspendRequest};
use crate::config::EngineConfig;
use crate::constants::ENGINE_VERSION;
use crate::errors::{classify_error, CoreEngineError, EngineError, ErrorClass};
use crate::event::{EventStore, RunEvent, RunEventKind};
use crate::executor::{derive_effect_id, TaskExecutor, TaskInvocation};
use crate::gate::{GateAction, GateStep};
use crate::hashing::hash_value;
use crate::injection::apply_modified_values;
use crate::ledger::EffectLedger;
use crate::model::{BreakpointId, BreakpointRecord, EffectId, EffectRecord, NamedOutputs, Resolution,
                   ResolutionStatus, ResultMetadata, ReviewArtifact, RunState, RunStatus, WorkflowResult};
use crate::repo::{RunRepository, WorkflowDefinition, WorkflowRegistry};
use crate::step::{resolve_bindings, BreakpointStep, Step, StepContext, StepSpec, StepStatus, TaskStep};

/// Resultado de ejecutar un step (u ola de tareas).
enum Progress {
    Advanced,
    Suspended,
    Failed { phase: String, error: CoreEngineError },
}

struct Prepared<'d> {
    index: usize,
    step: &'d TaskStep,
    inputs: Value,
    effect_id: EffectId,
    input_hash: String,
    spec: StepSpec,
    force_retry: bool,
}

pub struct WorkflowRunner {
    registry: WorkflowRegistry,
    events: Arc<dyn EventStore>,
    ledger: Arc<dyn EffectLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    repository: Arc<dyn RunRepository>,
    executor: TaskExecutor,
    breakpoints: BreakpointManager,
    config: EngineConfig,
}

impl WorkflowRunner {
    pub(crate) fn from_parts(registry: WorkflowRegistry,
                             events: Arc<dyn EventStore>,
                             ledger: Arc<dyn EffectLedger>,
                             artifacts: Arc<dyn ArtifactStore>,
                             repository: Arc<dyn RunRepository>,
                             executor: TaskExecutor,
                             config: EngineConfig)
                             -> Self {
        let breakpoints =
            BreakpointManager::new(events.clone(), artifacts.clone()).with_repository(repository.clone());
        Self { registry,
               events,
               ledger,
               artifacts,
               repository,
               executor,
               breakpoints,
               config }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn artifact_store(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Crea una corrida con id nuevo y la ejecuta hasta completar, fallar o
    /// suspenderse.
    pub async fn start(&self, workflow_id: &str, inputs: Value) -> Result<RunState, EngineError> {
        self.start_run(Uuid::new_v4(), workflow_id, inputs).await
    }

    /// Como `start` pero con un `run_id` elegido por el llamador.
    pub async fn start_run(&self, run_id: Uuid, workflow_id: &str, inputs: Value) -> Result<RunState, EngineError> {
        let def = self.registry
                      .get(workflow_id)
                      .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_string()))?;
        if !self.events.list(run_id)?.is_empty() {
            return Err(EngineError::RunExists(run_id));
        }
        self.events.append_expecting(run_id,
                                     0,
                                     RunEventKind::RunStarted { workflow_id: def.id.clone(),
                                                                workflow_version: def.version.clone(),
                                                                definition_hash: def.definition_hash.clone(),
                                                                steps: def.step_names(),
                                                                inputs })?;
        info!("run {run_id} started: workflow '{}' v{}", def.id, def.version);
        let state = self.load(run_id)?;
        self.drive(&def, state).await
    }

    /// Continúa una corrida en `running` (p.ej. tras un crash). Una corrida
    /// suspendida o terminal se devuelve tal cual.
    pub async fn resume(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        let state = self.load(run_id)?;
        if state.archived {
            return Err(EngineError::Archived { run_id });
        }
        if state.status != RunStatus::Running {
            debug!("run {run_id} is {}: nothing to resume", state.status);
            return Ok(state);
        }
        let def = self.definition_for(&state)?;
        info!("resuming run {run_id} at step #{}", state.cursor());
        self.drive(&def, state).await
    }

    /// Registra la decisión de un breakpoint y, salvo rechazo, continúa.
    pub async fn resolve(&self, breakpoint_id: &BreakpointId, resolution: Resolution) -> Result<RunState, EngineError> {
        let current = self.load(breakpoint_id.run_id)?;
        let def = self.definition_for(&current)?;
        let state = self.breakpoints.resolve(breakpoint_id, resolution)?;
        if state.status == RunStatus::Running {
            self.drive(&def, state).await
        } else {
            Ok(state)
        }
    }

    /// Reintento manual de una corrida fallida en un step. Fuerza el
    /// reintento del efecto fallido con el mismo `effect_id`.
    pub async fn retry(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        let state = self.load(run_id)?;
        if state.archived {
            return Err(EngineError::Archived { run_id });
        }
        let failure = match (&state.status, &state.failure) {
            (RunStatus::Failed, Some(f)) => f,
            _ => {
                return Err(EngineError::InvalidState { run_id,
                                                       status: state.status,
                                                       action: "retry" })
            }
        };
        if let Some(err) = failure.error.as_ref().filter(|e| classify_error(e) == ErrorClass::Permanent) {
            return Err(EngineError::NotRetryable { run_id,
                                                   reason: err.to_string() });
        }
        let def = self.definition_for(&state)?;
        let (index, slot) = state.steps
                                 .iter()
                                 .enumerate()
                                 .find(|(_, s)| s.status == StepStatus::Failed)
                                 .ok_or(EngineError::InvalidState { run_id,
                                                                    status: state.status,
                                                                    action: "retry" })?;
        self.events.append_expecting(run_id,
                                     state.next_seq,
                                     RunEventKind::RetryScheduled { step_index: index,
                                                                    step: slot.step.clone() })?;
        warn!("run {run_id}: retry scheduled for step '{}'", slot.step);
        let state = self.load(run_id)?;
        self.drive(&def, state).await
    }

    /// Marca como archivada una corrida terminal.
    pub fn archive(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        let state = self.load(run_id)?;
        if state.archived {
            return Err(EngineError::Archived { run_id });
        }
        if !state.is_terminal() {
            return Err(EngineError::InvalidState { run_id,
                                                   status: state.status,
                                                   action: "archive" });
        }
        self.events.append_expecting(run_id, state.next_seq, RunEventKind::RunArchived)?;
        info!("run {run_id} archived");
        self.load(run_id)
    }

    pub fn status(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        self.load(run_id)
    }

    pub fn events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EngineError> {
        Ok(self.events.list(run_id)?)
    }

    pub fn runs(&self) -> Result<Vec<Uuid>, EngineError> {
        Ok(self.events.list_runs()?)
    }

    pub fn breakpoints(&self, run_id: Uuid) -> Result<Vec<BreakpointRecord>, EngineError> {
        Ok(self.load(run_id)?.breakpoints)
    }

    pub fn effects(&self, run_id: Uuid) -> Result<Vec<EffectRecord>, EngineError> {
        Ok(self.ledger.list_for_run(run_id)?)
    }

    fn load(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        let events = self.events.list(run_id)?;
        if events.is_empty() {
            return Err(EngineError::RunNotFound(run_id));
        }
        Ok(self.repository.load(run_id, &events)?)
    }

    fn definition_for(&self, state: &RunState) -> Result<Arc<WorkflowDefinition>, EngineError> {
        let def = self.registry
                      .get(&state.workflow_id)
                      .ok_or_else(|| EngineError::UnknownWorkflow(state.workflow_id.clone()))?;
        if def.definition_hash != state.definition_hash {
            return Err(EngineError::DefinitionMismatch { run_id: state.run_id,
                                                         recorded: state.definition_hash.clone(),
                                                         current: def.definition_hash.clone() });
        }
        Ok(def)
    }

    async fn drive(&self, def: &WorkflowDefinition, state: RunState) -> Result<RunState, EngineError> {
        let run_id = state.run_id;
        let mut ctx = RunContext::new(&state,
                                      self.events.as_ref(),
                                      &self.executor,
                                      &self.breakpoints,
                                      self.ledger.as_ref(),
                                      self.artifacts.as_ref());
        let mut done: Vec<bool> = state.steps.iter().map(|s| s.status == StepStatus::FinishedOk).collect();

        let Some(mut outputs) = self.rehydrate(&mut ctx, &state)? else {
            return self.load(run_id);
        };

        let mut progress = Progress::Advanced;
        while let Some(index) = done.iter().position(|d| !d) {
            progress = match &def.steps[index] {
                Step::Task(_) => {
                    let wave = self.wave(def, &done, index);
                    self.run_wave(&mut ctx, def, &state, &wave, &mut outputs, &mut done).await?
                }
                Step::Breakpoint(b) => self.run_breakpoint(&mut ctx, &state, index, b, &mut outputs, &mut done)?,
                Step::Gate(g) => self.run_gate(&mut ctx, &state, index, g, &mut outputs, &mut done)?,
            };
            if !matches!(progress, Progress::Advanced) {
                break;
            }
        }
        if matches!(progress, Progress::Advanced) {
            self.complete(&mut ctx, def, &outputs)?;
        }
        if let Progress::Failed { phase, error } = progress {
            if matches!(error, CoreEngineError::LedgerInconsistency { .. }) {
                error!("run {run_id} halted at '{phase}': {error}");
            } else {
                warn!("run {run_id} failed at '{phase}': {error}");
            }
            ctx.emit(RunEventKind::RunFailed { phase, error })?;
        }
        self.load(run_id)
    }

    /// Reconstruye los outputs con nombre en orden de definición,
    /// verificando cada valor contra el `output_hash` del journal. Una
    /// discrepancia falla la corrida y devuelve `None`.
    fn rehydrate(&self, ctx: &mut RunContext<'_>, state: &RunState) -> Result<Option<NamedOutputs>, EngineError> {
        let mut completed: Vec<_> = state.completed_steps
                                         .iter()
                                         .filter(|c| {
                                             state.steps
                                                  .get(c.index)
                                                  .is_some_and(|s| s.status == StepStatus::FinishedOk)
                                         })
                                         .collect();
        completed.sort_by_key(|c| c.index);

        let mut outputs = NamedOutputs::new();
        for c in completed {
            let restored = match (&c.output, &c.effect_id) {
                (Some(v), _) if hash_value(v) == c.output_hash => Ok(v.clone()),
                (Some(_), _) => Err("inline output does not match its recorded hash".to_string()),
                (None, Some(effect_id)) => self.effect_output(effect_id, &c.output_hash)?,
                (None, None) => Err("no output recorded".to_string()),
            };
            match restored {
                Ok(v) => {
                    outputs.insert(c.step.clone(), v);
                }
                Err(details) => {
                    let error = CoreEngineError::LedgerInconsistency { effect_id: c.effect_id
                                                                                   .as_ref()
                                                                                   .map(|e| e.to_string())
                                                                                   .unwrap_or_default(),
                                                                       details };
                    error!("run {}: cannot restore output of '{}': {error}", state.run_id, c.step);
                    ctx.emit(RunEventKind::StepFailed { step_index: c.index,
                                                        step: c.step.clone(),
                                                        error: error.clone() })?;
                    ctx.emit(RunEventKind::RunFailed { phase: c.step.clone(),
                                                       error })?;
                    return Ok(None);
                }
            }
            if let Some(m) = &c.modified_values {
                apply_modified_values(&mut outputs, m);
            }
        }
        Ok(Some(outputs))
    }

    fn effect_output(&self, effect_id: &EffectId, expected_hash: &str) -> Result<Result<Value, String>, EngineError> {
        let Some(record) = self.ledger.get(effect_id)? else {
            return Ok(Err("effect missing from the ledger".into()));
        };
        let Some(result_ref) = record.result_ref else {
            return Ok(Err(format!("effect is {} without a stored result", record.status)));
        };
        if result_ref.content_hash != expected_hash {
            return Ok(Err(format!("ledger result hash {} differs from journal hash {expected_hash}",
                                  result_ref.content_hash)));
        }
        match self.artifacts.get(&result_ref) {
            Ok(a) => Ok(Ok(a.content)),
            Err(e @ ArtifactError::Backend(_)) => Err(e.into()),
            Err(e) => Ok(Err(e.to_string())),
        }
    }

    /// Tareas consecutivas desde `start` que pueden despacharse juntas.
    fn wave(&self, def: &WorkflowDefinition, done: &[bool], start: usize) -> Vec<usize> {
        let mut members = vec![start];
        if !self.config.parallel_siblings {
            return members;
        }
        let mut names: HashSet<&str> = HashSet::from([def.steps[start].name()]);
        for (i, step) in def.steps.iter().enumerate().skip(start + 1) {
            if !step.is_task() {
                break;
            }
            if done[i] {
                continue;
            }
            if step.dependencies().iter().any(|d| names.contains(d.as_str())) {
                break;
            }
            names.insert(step.name());
            members.push(i);
        }
        members
    }

    async fn run_wave(&self,
                      ctx: &mut RunContext<'_>,
                      def: &WorkflowDefinition,
                      state: &RunState,
                      wave: &[usize],
                      outputs: &mut NamedOutputs,
                      done: &mut [bool])
                      -> Result<Progress, EngineError> {
        let run_id = state.run_id;
        let mut prepared: Vec<Prepared<'_>> = Vec::with_capacity(wave.len());
        for &index in wave {
            let Step::Task(task) = &def.steps[index] else { break };
            let inputs = match resolve_bindings(&task.bindings, &state.inputs, outputs) {
                Ok(v) => v,
                // el resto de la ola se reintenta en la siguiente vuelta
                Err(_) if !prepared.is_empty() => break,
                Err(error) => return Self::step_failed(ctx, index, &task.name, error),
            };
            let (effect_id, input_hash) = derive_effect_id(run_id, &task.name, &task.effect_key, &inputs);
            let slot = &state.steps[index];
            if slot.status == StepStatus::Running {
                // el step quedó a medias: sólo se retoma si su dueño ya no vive
                ctx.ensure_unowned(&effect_id)?;
            }
            // reclama el step en el journal antes de contactar al agente
            let ev = ctx.emit(RunEventKind::StepStarted { step_index: index,
                                                          step: task.name.clone(),
                                                          effect_id: Some(effect_id.clone()) })?;
            ctx.enter_step(slot.started_at.unwrap_or(ev.ts));
            let spec = task.spec(&inputs,
                                 &StepContext { run_id,
                                                step: task.name.clone(),
                                                step_index: index,
                                                effect_id: effect_id.clone(),
                                                now: ctx.now() });
            prepared.push(Prepared { index,
                                     step: task,
                                     inputs,
                                     effect_id,
                                     input_hash,
                                     spec,
                                     force_retry: slot.force_retry });
        }
        if prepared.len() > 1 {
            debug!("run {run_id}: dispatching {} sibling tasks", prepared.len());
        }

        let results = {
            let shared: &RunContext<'_> = &*ctx;
            join_all(prepared.iter().map(|p| {
                                        shared.task(TaskInvocation { run_id,
                                                                     step: &p.step.name,
                                                                     effect_id: p.effect_id.clone(),
                                                                     input_hash: p.input_hash.clone(),
                                                                     inputs: &p.inputs,
                                                                     spec: &p.spec,
                                                                     force_retry: p.force_retry })
                                    })).await
        };

        let mut first_failure: Option<(String, CoreEngineError)> = None;
        for (p, result) in prepared.iter().zip(results) {
            match result {
                Ok(r) => {
                    if r.cached {
                        ctx.log(Level::Debug, &format!("'{}' reused effect {}", p.step.name, r.effect_id));
                    }
                    ctx.emit(RunEventKind::StepFinished { step_index: p.index,
                                                          step: p.step.name.clone(),
                                                          effect_id: Some(r.effect_id),
                                                          output_hash: r.output_hash,
                                                          output: None,
                                                          modified_values: None })?;
                    outputs.insert(p.step.name.clone(), r.output);
                    done[p.index] = true;
                }
                Err(err) => {
                    let Some(error) = err.step_error() else {
                        return Err(err.into());
                    };
                    ctx.emit(RunEventKind::StepFailed { step_index: p.index,
                                                        step: p.step.name.clone(),
                                                        error: error.clone() })?;
                    first_failure.get_or_insert((p.step.name.clone(), error));
                }
            }
        }
        Ok(match first_failure {
            Some((phase, error)) => Progress::Failed { phase, error },
            None => Progress::Advanced,
        })
    }

    fn run_breakpoint(&self,
                      ctx: &mut RunContext<'_>,
                      state: &RunState,
                      index: usize,
                      bp: &BreakpointStep,
                      outputs: &mut NamedOutputs,
                      done: &mut [bool])
                      -> Result<Progress, EngineError> {
        if let Some(record) = Self::resolved_review(state, index) {
            return Self::finish_review(ctx, index, record, outputs, done);
        }
        Self::start_step(ctx, state, index, &bp.name)?;

        if bp.when.as_ref().is_some_and(|c| c.evaluate(outputs)) {
            ctx.log(Level::Info, &format!("'{}' condition holds, review skipped", bp.name));
            let output = json!({ "decision": "skipped" });
            return Self::finish_inline(ctx, index, &bp.name, output, outputs, done);
        }

        let context = match resolve_bindings(&bp.context, &state.inputs, outputs) {
            Ok(v) => v,
            Err(error) => return Self::step_failed(ctx, index, &bp.name, error),
        };
        let artifacts = bp.attachments
                          .iter()
                          .filter_map(|a| {
                              a.source
                               .resolve(&state.inputs, outputs)
                               .map(|content| ReviewArtifact { path: a.path.clone(),
                                                               format: a.format,
                                                               content })
                          })
                          .collect();
        let request = SuspendRequest { step_index: index,
                                       step: bp.name.clone(),
                                       question: bp.question.clone(),
                                       title: bp.title.clone(),
                                       context,
                                       artifacts };
        match ctx.breakpoint(request) {
            Ok(_) => Ok(Progress::Suspended),
            // contenido que no cabe en el formato declarado: no hay nada que reanudar
            Err(BreakpointError::Artifacts(e)) if !matches!(e, ArtifactError::Backend(_)) => {
                Self::step_failed(ctx, index, &bp.name, CoreEngineError::Storage(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn run_gate(&self,
                ctx: &mut RunContext<'_>,
                state: &RunState,
                index: usize,
                gate: &GateStep,
                outputs: &mut NamedOutputs,
                done: &mut [bool])
                -> Result<Progress, EngineError> {
        if let Some(record) = Self::resolved_review(state, index) {
            return Self::finish_review(ctx, index, record, outputs, done);
        }
        Self::start_step(ctx, state, index, &gate.name)?;
        let report = gate.evaluate(outputs);
        ctx.emit(RunEventKind::GateEvaluated { step_index: index,
                                               step: gate.name.clone(),
                                               passed: report.passed,
                                               failures: report.failures.clone() })?;
        if report.passed {
            return Self::finish_inline(ctx, index, &gate.name, report.to_value(), outputs, done);
        }
        match &gate.on_fail {
            GateAction::Halt => {
                let error = CoreEngineError::GateFailed(report.summary());
                ctx.emit(RunEventKind::StepFailed { step_index: index,
                                                    step: gate.name.clone(),
                                                    error: error.clone() })?;
                Ok(Progress::Failed { phase: gate.failure_phase().to_string(),
                                      error })
            }
            GateAction::Escalate { question, title } => {
                ctx.log(Level::Info, &format!("gate '{}' escalated: {}", gate.name, report.summary()));
                ctx.breakpoint(SuspendRequest { step_index: index,
                                                step: gate.name.clone(),
                                                question: question.clone(),
                                                title: title.clone(),
                                                context: json!({ "gate": gate.name, "failures": report.failures }),
                                                artifacts: Vec::new() })?;
                Ok(Progress::Suspended)
            }
        }
    }

    /// Breakpoint ya resuelto (aprobado o modificado) cuyo step aún no
    /// terminó.
    fn resolved_review(state: &RunState, index: usize) -> Option<&BreakpointRecord> {
        let slot = &state.steps[index];
        if slot.status != StepStatus::AwaitingDecision {
            return None;
        }
        state.breakpoint(&BreakpointId::new(state.run_id, slot.step.clone()))
             .filter(|r| !r.is_pending() && r.resolution != ResolutionStatus::Rejected)
    }

    fn start_step(ctx: &mut RunContext<'_>, state: &RunState, index: usize, step: &str) -> Result<(), EngineError> {
        let ev = ctx.emit(RunEventKind::StepStarted { step_index: index,
                                                      step: step.to_string(),
                                                      effect_id: None })?;
        ctx.enter_step(state.steps[index].started_at.unwrap_or(ev.ts));
        Ok(())
    }

    fn finish_review(ctx: &mut RunContext<'_>,
                     index: usize,
                     record: &BreakpointRecord,
                     outputs: &mut NamedOutputs,
                     done: &mut [bool])
                     -> Result<Progress, EngineError> {
        let output = record.decision_output();
        ctx.emit(RunEventKind::StepFinished { step_index: index,
                                              step: record.step.clone(),
                                              effect_id: None,
                                              output_hash: hash_value(&output),
                                              output: Some(output.clone()),
                                              modified_values: record.modified_values.clone() })?;
        outputs.insert(record.step.clone(), output);
        if let Some(m) = &record.modified_values {
            apply_modified_values(outputs, m);
        }
        done[index] = true;
        Ok(Progress::Advanced)
    }

    fn finish_inline(ctx: &mut RunContext<'_>,
                     index: usize,
                     step: &str,
                     output: Value,
                     outputs: &mut NamedOutputs,
                     done: &mut [bool])
                     -> Result<Progress, EngineError> {
        ctx.emit(RunEventKind::StepFinished { step_index: index,
                                              step: step.to_string(),
                                              effect_id: None,
                                              output_hash: hash_value(&output),
                                              output: Some(output.clone()),
                                              modified_values: None })?;
        outputs.insert(step.to_string(), output);
        done[index] = true;
        Ok(Progress::Advanced)
    }

    fn step_failed(ctx: &mut RunContext<'_>,
                   index: usize,
                   step: &str,
                   error: CoreEngineError)
                   -> Result<Progress, EngineError> {
        ctx.emit(RunEventKind::StepFailed { step_index: index,
                                            step: step.to_string(),
                                            error: error.clone() })?;
        Ok(Progress::Failed { phase: step.to_string(),
                              error })
    }

    fn complete(&self, ctx: &mut RunContext<'_>, def: &WorkflowDefinition, outputs: &NamedOutputs) -> Result<(), EngineError> {
        let run_id = ctx.run_id();
        let state = self.load(run_id)?;
        let mut completed: Vec<_> = state.completed_steps.iter().collect();
        completed.sort_by_key(|c| c.index);
        let hashes: Vec<Value> = completed.iter().map(|c| json!([c.step, c.output_hash])).collect();
        let run_fingerprint = hash_value(&json!({
            "engine_version": ENGINE_VERSION,
            "definition_hash": def.definition_hash,
            "outputs": hashes,
        }));
        let timestamp = completed.iter().map(|c| c.finished_at).max().unwrap_or(state.started_at);

        let returned: NamedOutputs = if def.outputs.is_empty() {
            outputs.clone()
        } else {
            def.outputs
               .iter()
               .filter_map(|name| outputs.get(name).map(|v| (name.clone(), v.clone())))
               .collect()
        };
        let metadata = ResultMetadata { process_id: def.id.clone(),
                                        timestamp,
                                        version: def.version.clone(),
                                        run_id,
                                        run_fingerprint: Some(run_fingerprint.clone()) };
        ctx.emit(RunEventKind::RunCompleted { run_fingerprint,
                                              result: WorkflowResult::success(returned, metadata) })?;
        info!("run {run_id} completed ({} steps)", def.len());
        Ok(())
    }
}
