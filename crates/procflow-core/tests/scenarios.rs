use std::sync::{Arc, Mutex};
use std::time::Duration;

use procflow_core::agent::testing::ScriptedAgent;
use procflow_core::gate::Condition;
use procflow_core::model::{Decision, ResolutionStatus};
use procflow_core::repo::ReplayError;
use procflow_core::{replay, ArtifactStore, BreakpointStep, EffectStatus, EngineConfig, EngineError, GateStep,
                    InMemoryArtifactStore, InMemoryEffectLedger, InMemoryEventStore, Resolution, RunEvent,
                    RunEventKind, RunRepository, RunState, RunStatus, RunnerBuilder, Source, StepSpec, TaskStep,
                    WorkflowBuilder, WorkflowDefinition, WorkflowRunner};
use serde_json::{json, Map};
use uuid::Uuid;

fn abc() -> WorkflowDefinition {
    WorkflowBuilder::new("abc", "1").task(TaskStep::new("a", |_, _| StepSpec::agent("writer", "Step A"))
                                          .bind("topic", Source::input("/topic")))
                                    .task(TaskStep::new("b", |_, _| StepSpec::agent("writer", "Step B"))
                                          .bind("a", Source::output("a")))
                                    .task(TaskStep::new("c", |_, _| StepSpec::agent("writer", "Step C"))
                                          .bind("b", Source::output("b")))
                                    .build()
                                    .expect("valid workflow")
}

fn reviewed() -> WorkflowDefinition {
    WorkflowBuilder::new("reviewed", "1").task(TaskStep::new("draft", |_, _| StepSpec::agent("writer", "Draft"))
                                               .bind("topic", Source::input("/topic")))
                                         .breakpoint(BreakpointStep::new("review", "Publish this draft?", "Review draft")
                                                     .context("draft", Source::output("draft"))
                                                     .attach("draft.json", Source::output("draft")))
                                         .task(TaskStep::new("publish", |_, _| StepSpec::agent("publisher", "Publish"))
                                               .bind("draft", Source::output("draft")))
                                         .build()
                                         .expect("valid workflow")
}

fn scored(gate: GateStep) -> WorkflowDefinition {
    WorkflowBuilder::new("scored", "1").task(TaskStep::new("score", |_, _| StepSpec::agent("critic", "Score"))
                                             .bind("topic", Source::input("/topic")))
                                       .gate(gate)
                                       .task(TaskStep::new("publish", |_, _| StepSpec::agent("publisher", "Publish"))
                                             .bind("score", Source::output_at("score", "/score")))
                                       .build()
                                       .expect("valid workflow")
}

fn runner(agent: &Arc<ScriptedAgent>, def: WorkflowDefinition) -> WorkflowRunner {
    RunnerBuilder::new().agent(agent.clone())
                        .register(def)
                        .build()
                        .expect("runner")
}

#[tokio::test]
async fn straight_through_run_completes_with_all_outputs() {
    let agent = Arc::new(ScriptedAgent::new());
    let runner = runner(&agent, abc());
    let state = runner.start("abc", json!({"topic": "rust"})).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    let result = state.result.expect("result");
    assert!(result.success);
    for step in ["a", "b", "c"] {
        assert!(result.output(step).is_some(), "missing output {step}");
        assert_eq!(agent.calls(step), 1);
    }
    assert_eq!(result.output("c").unwrap()["inputs"]["b"]["step"], "b");
    let meta = result.metadata.expect("metadata");
    assert_eq!(meta.process_id, "abc");
    assert_eq!(meta.version, "1");
    assert_eq!(meta.run_fingerprint, state.run_fingerprint);

    let paths: Vec<String> = runner.artifact_store()
                                   .list(state.run_id)
                                   .unwrap()
                                   .into_iter()
                                   .map(|r| r.path)
                                   .collect();
    for effect in runner.effects(state.run_id).unwrap() {
        assert_eq!(effect.status, EffectStatus::Succeeded);
        assert!(paths.contains(&format!("tasks/{}/input.json", effect.effect_id)));
        assert!(paths.contains(&format!("tasks/{}/result.json", effect.effect_id)));
    }
}

#[tokio::test]
async fn rejection_aborts_and_later_steps_never_dispatch() {
    let agent = Arc::new(ScriptedAgent::new());
    let runner = runner(&agent, reviewed());
    let suspended = runner.start("reviewed", json!({"topic": "rust"})).await.unwrap();
    assert_eq!(suspended.status, RunStatus::Suspended);
    let bp = suspended.pending_breakpoint.clone().expect("pending breakpoint");
    assert_eq!(bp.step, "review");

    let aborted = runner.resolve(&bp, Resolution::reject("editor")).await.unwrap();
    assert_eq!(aborted.status, RunStatus::Aborted);
    let result = aborted.result.expect("result");
    assert!(!result.success);
    assert_eq!(result.phase.as_deref(), Some("review"));
    assert_eq!(agent.calls("publish"), 0);

    let again = runner.resume(aborted.run_id).await.unwrap();
    assert_eq!(again.status, RunStatus::Aborted);
    assert_eq!(agent.calls("publish"), 0);
}

#[tokio::test]
async fn approval_with_modified_values_feeds_later_steps() {
    let agent = Arc::new(ScriptedAgent::new());
    let runner = runner(&agent, reviewed());
    let suspended = runner.start("reviewed", json!({"topic": "rust"})).await.unwrap();
    let record = suspended.pending_breakpoint_record().cloned().expect("record");
    assert_eq!(record.review_context.context["draft"]["step"], "draft");
    assert_eq!(record.review_context.artifact_refs.len(), 1);
    assert_eq!(agent.calls("publish"), 0);

    let mut values = Map::new();
    values.insert("draft".into(), json!({"title": "Edited"}));
    let done = runner.resolve(&record.breakpoint_id, Resolution::modify("editor", values))
                     .await
                     .unwrap();
    assert_eq!(done.status, RunStatus::Completed);

    let publish = agent.requests("publish");
    assert_eq!(publish.len(), 1);
    assert_eq!(publish[0].inputs["draft"]["title"], "Edited");
    assert_eq!(publish[0].inputs["draft"]["step"], "draft");

    let after = runner.breakpoints(done.run_id).unwrap();
    assert_eq!(after[0].review_context, record.review_context);
    assert_eq!(after[0].resolution, ResolutionStatus::Modified);
    let result = done.result.unwrap();
    assert_eq!(result.output("review").unwrap()["decision"], Decision::Modified.as_str());
    assert_eq!(agent.calls("draft"), 1);
}

#[tokio::test]
async fn resolving_twice_is_refused() {
    let agent = Arc::new(ScriptedAgent::new());
    let runner = runner(&agent, reviewed());
    let suspended = runner.start("reviewed", json!({"topic": "rust"})).await.unwrap();
    let bp = suspended.pending_breakpoint.unwrap();
    runner.resolve(&bp, Resolution::approve("editor")).await.unwrap();
    let second = runner.resolve(&bp, Resolution::approve("editor")).await;
    assert!(matches!(second, Err(EngineError::Breakpoint(_))));
    assert_eq!(agent.calls("publish"), 1);
}

/// Anota la variante del último evento de cada carga.
#[derive(Default)]
struct RecordingRepository {
    tails: Mutex<Vec<&'static str>>,
}

impl RunRepository for RecordingRepository {
    fn load(&self, run_id: Uuid, events: &[RunEvent]) -> Result<RunState, ReplayError> {
        if let Some(last) = events.last() {
            self.tails.lock().unwrap().push(last.kind.variant_name());
        }
        replay(run_id, events)
    }
}

#[test]
fn breakpoint_decisions_load_through_the_configured_repository() {
    let repository = Arc::new(RecordingRepository::default());
    let agent = Arc::new(ScriptedAgent::new());
    let runner = RunnerBuilder::new().agent(agent.clone())
                                     .repository(repository.clone())
                                     .register(reviewed())
                                     .build()
                                     .unwrap();
    let suspended = tokio_test::block_on(runner.start("reviewed", json!({"topic": "rust"}))).unwrap();
    let bp = suspended.pending_breakpoint.expect("pending breakpoint");

    let aborted = tokio_test::assert_ok!(tokio_test::block_on(runner.resolve(&bp, Resolution::reject("editor"))));
    assert_eq!(aborted.status, RunStatus::Aborted);
    // sólo el Breakpoint Manager recarga el journal después del RunAborted
    assert_eq!(repository.tails.lock().unwrap().last(), Some(&"RunAborted"));
}

#[tokio::test]
async fn crash_mid_dispatch_resumes_without_redispatching_finished_steps() {
    let events = Arc::new(InMemoryEventStore::new());
    let ledger = Arc::new(InMemoryEffectLedger::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let build = |agent: Arc<ScriptedAgent>, config: EngineConfig| {
        RunnerBuilder::new().events(events.clone())
                            .ledger(ledger.clone())
                            .artifacts(artifacts.clone())
                            .agent(agent)
                            .config(config)
                            .register(abc())
                            .build()
                            .unwrap()
    };

    let hanging = Arc::new(ScriptedAgent::new().hang("b"));
    let first = build(hanging.clone(), EngineConfig::default());
    let run_id = Uuid::new_v4();
    let interrupted = tokio::time::timeout(Duration::from_millis(100),
                                           first.start_run(run_id, "abc", json!({"topic": "rust"}))).await;
    assert!(interrupted.is_err(), "the hanging dispatch should be cut off");
    drop(first);

    let healthy = Arc::new(ScriptedAgent::new());
    let too_soon = build(healthy.clone(), EngineConfig::default());
    assert!(matches!(too_soon.resume(run_id).await, Err(EngineError::Task(_))),
            "the lease of the interrupted dispatch is still live");
    assert_eq!(healthy.total_calls(), 0);

    // el dueño murió: con el lease vencido el efecto se reclama
    let second = build(healthy.clone(), EngineConfig::default().effect_lease(Duration::ZERO));
    let mid = second.status(run_id).unwrap();
    assert_eq!(mid.status, RunStatus::Running);
    assert_eq!(mid.cursor(), 1);

    let state = second.resume(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(hanging.calls("a"), 1);
    assert_eq!(healthy.calls("a"), 0);
    assert_eq!(healthy.calls("b"), 1);
    assert_eq!(healthy.calls("c"), 1);

    let effects = second.effects(run_id).unwrap();
    let b = effects.iter().find(|e| e.step == "b").unwrap();
    assert_eq!(b.attempts, 2, "abandoned pending effect is reclaimed");
    assert_eq!(state.slot("b").unwrap().attempts, 2);
}

#[tokio::test]
async fn resume_during_a_live_dispatch_does_not_call_the_agent_again() {
    let agent = Arc::new(ScriptedAgent::new().delay("b", Duration::from_millis(300)));
    let runner = runner(&agent, abc());
    let run_id = Uuid::new_v4();
    let (first, second) = tokio::join!(runner.start_run(run_id, "abc", json!({"topic": "rust"})), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.resume(run_id).await
    });

    assert_eq!(first.unwrap().status, RunStatus::Completed);
    assert!(matches!(second, Err(EngineError::Task(_))));
    assert_eq!(agent.calls("b"), 1);
    let started_b = runner.events(run_id)
                          .unwrap()
                          .into_iter()
                          .filter(|e| matches!(&e.kind, RunEventKind::StepStarted { step, .. } if step == "b"))
                          .count();
    assert_eq!(started_b, 1);
}

#[tokio::test]
async fn second_process_waits_for_the_owner_of_a_pending_step() {
    let events = Arc::new(InMemoryEventStore::new());
    let ledger = Arc::new(InMemoryEffectLedger::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let build = |agent: Arc<ScriptedAgent>| {
        RunnerBuilder::new().events(events.clone())
                            .ledger(ledger.clone())
                            .artifacts(artifacts.clone())
                            .agent(agent)
                            .register(abc())
                            .build()
                            .unwrap()
    };
    let owner_agent = Arc::new(ScriptedAgent::new().delay("b", Duration::from_millis(300)));
    let other_agent = Arc::new(ScriptedAgent::new());
    let (owner, other) = (build(owner_agent.clone()), build(other_agent.clone()));
    let run_id = Uuid::new_v4();
    let (first, second) = tokio::join!(owner.start_run(run_id, "abc", json!({"topic": "rust"})), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        other.resume(run_id).await
    });

    assert_eq!(first.unwrap().status, RunStatus::Completed);
    assert!(matches!(second, Err(EngineError::Task(_))));
    assert_eq!(owner_agent.calls("b"), 1);
    assert_eq!(other_agent.total_calls(), 0);
    assert_eq!(other.status(run_id).unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn unwritable_review_attachment_fails_the_run_at_the_breakpoint() {
    let def = WorkflowBuilder::new("bad-attachment", "1").task(TaskStep::new("draft", |_, _| StepSpec::agent("writer", "Draft")))
                                                         .breakpoint(BreakpointStep::new("review", "Publish?", "Review")
                                                                     .attach("draft.md", Source::output("draft")))
                                                         .build()
                                                         .unwrap();
    let agent = Arc::new(ScriptedAgent::new());
    let runner = runner(&agent, def);
    let state = runner.start("bad-attachment", json!({})).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.pending_breakpoint.is_none());
    let result = state.result.clone().expect("structured result");
    assert!(!result.success);
    assert_eq!(result.phase.as_deref(), Some("review"));
    assert!(result.error.unwrap().contains("draft.md"));

    let again = runner.resume(state.run_id).await.unwrap();
    assert_eq!(again.status, RunStatus::Failed);
    assert_eq!(again.next_seq, state.next_seq);
    assert_eq!(agent.calls("draft"), 1);
}

#[tokio::test]
async fn halting_gate_short_circuits_with_phase() {
    let agent = Arc::new(ScriptedAgent::new().reply_json("score", json!({"score": 0.2})));
    let gate = GateStep::new("quality").check("score >= 0.7", Condition::at_least("score", "/score", 0.7))
                                       .halt();
    let runner = runner(&agent, scored(gate));
    let state = runner.start("scored", json!({"topic": "rust"})).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    let result = state.result.clone().unwrap();
    assert!(!result.success);
    assert_eq!(result.phase.as_deref(), Some("quality"));
    assert!(result.error.unwrap().contains("score >= 0.7"));
    assert_eq!(agent.calls("publish"), 0);

    assert!(matches!(runner.retry(state.run_id).await, Err(EngineError::NotRetryable { .. })));
}

#[tokio::test]
async fn halting_gate_can_report_the_task_it_checked() {
    let agent = Arc::new(ScriptedAgent::new().reply_json("score", json!({"score": 0.2})));
    let gate = GateStep::new("quality").check("score >= 0.7", Condition::at_least("score", "/score", 0.7))
                                       .phase("score");
    let runner = runner(&agent, scored(gate));
    let state = runner.start("scored", json!({"topic": "rust"})).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.result.clone().unwrap().phase.as_deref(), Some("score"));
    assert_eq!(state.failure.as_ref().unwrap().phase, "score");
    let gate_failed = runner.events(state.run_id)
                            .unwrap()
                            .into_iter()
                            .any(|e| matches!(&e.kind, RunEventKind::StepFailed { step, .. } if step == "quality"));
    assert!(gate_failed, "the journal still records the gate itself as failed");
    assert_eq!(agent.calls("publish"), 0);
}

#[tokio::test]
async fn escalating_gate_suspends_then_continues_on_approval() {
    let agent = Arc::new(ScriptedAgent::new().reply_json("score", json!({"score": 0.2})));
    let gate = GateStep::new("quality").check("score >= 0.7", Condition::at_least("score", "/score", 0.7))
                                       .escalate("Score is low. Publish anyway?", "Quality review");
    let runner = runner(&agent, scored(gate));
    let suspended = runner.start("scored", json!({"topic": "rust"})).await.unwrap();

    assert_eq!(suspended.status, RunStatus::Suspended);
    let record = suspended.pending_breakpoint_record().unwrap();
    assert_eq!(record.step, "quality");
    assert_eq!(record.review_context.context["failures"], json!(["score >= 0.7"]));
    assert_eq!(agent.calls("publish"), 0);

    let done = runner.resolve(&record.breakpoint_id, Resolution::approve("lead")).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(agent.calls("publish"), 1);
}

#[tokio::test]
async fn passing_gate_records_its_report() {
    let agent = Arc::new(ScriptedAgent::new().reply_json("score", json!({"score": 0.9})));
    let gate = GateStep::new("quality").check("score >= 0.7", Condition::at_least("score", "/score", 0.7));
    let runner = runner(&agent, scored(gate));
    let state = runner.start("scored", json!({"topic": "rust"})).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    let result = state.result.unwrap();
    assert_eq!(result.output("quality"), Some(&json!({"passed": true, "failures": []})));
}

#[tokio::test]
async fn conditional_breakpoint_is_skipped_when_its_condition_holds() {
    let agent = Arc::new(ScriptedAgent::new().reply_json("score", json!({"score": 0.9})));
    let def = WorkflowBuilder::new("maybe-review", "1").task(TaskStep::new("score", |_, _| StepSpec::agent("critic", "Score")))
                                                       .breakpoint(BreakpointStep::new("review", "Low score, continue?", "Review")
                                                                   .unless(Condition::at_least("score", "/score", 0.5)))
                                                       .build()
                                                       .unwrap();
    let runner = runner(&agent, def);
    let state = runner.start("maybe-review", json!({})).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.breakpoints.is_empty());
    assert_eq!(state.result.unwrap().output("review"), Some(&json!({"decision": "skipped"})));
}
