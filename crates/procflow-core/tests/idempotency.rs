use std::sync::Arc;

use procflow_core::agent::testing::ScriptedAgent;
use procflow_core::{CoreEngineError, EffectId, EngineError, InMemoryArtifactStore, InMemoryEffectLedger,
                    InMemoryEventStore, RunEventKind, RunStatus, RunnerBuilder, Source, StepSpec, TaskStep,
                    WorkflowBuilder, WorkflowDefinition, WorkflowRunner};
use serde_json::{json, Value};
use uuid::Uuid;

fn chain(pinned: bool) -> WorkflowDefinition {
    let mut first = TaskStep::new("outline", |_, _| StepSpec::agent("writer", "Outline")).bind("topic", Source::input("/topic"));
    if pinned {
        first = first.effect_key("outline-v1");
    }
    WorkflowBuilder::new("chain", "1").task(first)
                                      .task(TaskStep::new("expand", |_, _| StepSpec::agent("writer", "Expand"))
                                            .bind("outline", Source::output("outline")))
                                      .build()
                                      .unwrap()
}

/// Runner con journal propio y ledger/artifacts compartidos.
fn runner_over(ledger: &Arc<InMemoryEffectLedger>,
               artifacts: &Arc<InMemoryArtifactStore>,
               agent: &Arc<ScriptedAgent>,
               def: WorkflowDefinition)
               -> WorkflowRunner {
    RunnerBuilder::new().events(Arc::new(InMemoryEventStore::new()))
                        .ledger(ledger.clone())
                        .artifacts(artifacts.clone())
                        .agent(agent.clone())
                        .register(def)
                        .build()
                        .unwrap()
}

fn effect_ids(runner: &WorkflowRunner, run_id: Uuid) -> Vec<EffectId> {
    runner.events(run_id)
          .unwrap()
          .into_iter()
          .filter_map(|e| match e.kind {
              RunEventKind::StepStarted { effect_id, .. } => effect_id,
              _ => None,
          })
          .collect()
}

#[tokio::test]
async fn replaying_a_run_reuses_every_succeeded_effect() {
    let ledger = Arc::new(InMemoryEffectLedger::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let run_id = Uuid::new_v4();
    let inputs = json!({"topic": "ownership"});

    let first_agent = Arc::new(ScriptedAgent::new());
    let first = runner_over(&ledger, &artifacts, &first_agent, chain(false));
    let original = first.start_run(run_id, "chain", inputs.clone()).await.unwrap();
    assert_eq!(original.status, RunStatus::Completed);
    assert_eq!(first_agent.total_calls(), 2);

    let replay_agent = Arc::new(ScriptedAgent::new());
    let replayed_runner = runner_over(&ledger, &artifacts, &replay_agent, chain(false));
    let replayed = replayed_runner.start_run(run_id, "chain", inputs).await.unwrap();

    assert_eq!(replay_agent.total_calls(), 0);
    assert_eq!(effect_ids(&first, run_id), effect_ids(&replayed_runner, run_id));
    assert_eq!(original.run_fingerprint, replayed.run_fingerprint);
    assert_eq!(original.result.unwrap().outputs, replayed.result.unwrap().outputs);
}

#[tokio::test]
async fn changed_inputs_produce_new_effects() {
    let ledger = Arc::new(InMemoryEffectLedger::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let run_id = Uuid::new_v4();

    let agent = Arc::new(ScriptedAgent::new());
    let first = runner_over(&ledger, &artifacts, &agent, chain(false));
    first.start_run(run_id, "chain", json!({"topic": "ownership"})).await.unwrap();

    let second = runner_over(&ledger, &artifacts, &agent, chain(false));
    second.start_run(run_id, "chain", json!({"topic": "lifetimes"})).await.unwrap();

    assert_eq!(agent.calls("outline"), 2);
    assert_eq!(agent.calls("expand"), 2);
    let a = effect_ids(&first, run_id);
    let b = effect_ids(&second, run_id);
    assert!(a.iter().zip(&b).all(|(x, y)| x != y));
}

#[tokio::test]
async fn pinned_key_with_divergent_inputs_halts_the_run() {
    let ledger = Arc::new(InMemoryEffectLedger::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let run_id = Uuid::new_v4();
    let agent = Arc::new(ScriptedAgent::new());

    let first = runner_over(&ledger, &artifacts, &agent, chain(true));
    first.start_run(run_id, "chain", json!({"topic": "ownership"})).await.unwrap();

    let second = runner_over(&ledger, &artifacts, &agent, chain(true));
    let state = second.start_run(run_id, "chain", json!({"topic": "lifetimes"})).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    let failure = state.failure.clone().unwrap();
    assert_eq!(failure.phase, "outline");
    assert!(matches!(failure.error, Some(CoreEngineError::LedgerInconsistency { .. })));
    assert_eq!(agent.calls("outline"), 1);
    assert!(matches!(second.retry(run_id).await, Err(EngineError::NotRetryable { .. })));
}

#[tokio::test]
async fn resume_of_a_completed_run_is_a_no_op() {
    let agent = Arc::new(ScriptedAgent::new());
    let runner = RunnerBuilder::new().agent(agent.clone()).register(chain(false)).build().unwrap();
    let done = runner.start("chain", json!({"topic": "traits"})).await.unwrap();
    let events_before = runner.events(done.run_id).unwrap().len();

    let again = runner.resume(done.run_id).await.unwrap();
    assert_eq!(again, done);
    assert_eq!(runner.events(done.run_id).unwrap().len(), events_before);
    assert_eq!(agent.total_calls(), 2);

    let result: Value = serde_json::to_value(done.result.unwrap()).unwrap();
    assert_eq!(result["success"], true);
    assert!(result["metadata"]["processId"].is_string());
    assert!(result.get("outline").is_some());
}
