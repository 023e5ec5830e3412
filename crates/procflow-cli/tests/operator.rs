//! Flujo de operador: un proceso deja la corrida suspendida, la CLI resuelve
//! el breakpoint sobre el mismo directorio y el proceso dueño la reanuda.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use procflow_cli::{execute, open_stores, Cli, CliError};
use procflow_core::agent::testing::ScriptedAgent;
use procflow_core::{BreakpointStep, RunState, RunStatus, Source, StepSpec, TaskStep, WorkflowBuilder, WorkflowRunner};
use serde_json::{json, Value};

fn runner_at(root: &Path, agent: &Arc<ScriptedAgent>) -> WorkflowRunner {
    let def = WorkflowBuilder::new("reviewed", "1").task(TaskStep::new("draft", |_, _| StepSpec::agent("writer", "Draft"))
                                                         .bind("topic", Source::input("/topic")))
                                                   .breakpoint(BreakpointStep::new("review", "Publish?", "Review draft")
                                                               .attach("draft.json", Source::output("draft")))
                                                   .task(TaskStep::new("publish", |_, _| {
                                                             StepSpec::agent("publisher", "Publish")
                                                         }).bind("draft", Source::output("draft")))
                                                   .build()
                                                   .unwrap();
    procflow_persistence::fs::open_stores(root).unwrap()
                                               .runner_builder()
                                               .agent(agent.clone())
                                               .register(def)
                                               .build()
                                               .unwrap()
}

async fn suspended(root: &Path, agent: &Arc<ScriptedAgent>) -> RunState {
    let state = runner_at(root, agent).start("reviewed", json!({"topic": "rust"})).await.unwrap();
    assert_eq!(state.status, RunStatus::Suspended);
    state
}

fn cli(root: &Path, args: &[&str]) -> Result<String, CliError> {
    let mut argv = vec!["procflow".to_string(), "--store-dir".to_string(), root.display().to_string()];
    argv.extend(args.iter().map(|a| a.to_string()));
    let cli = Cli::try_parse_from(argv).unwrap();
    let stores = open_stores(&cli)?;
    let mut out = Vec::new();
    execute(&cli, &stores, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

#[tokio::test]
async fn modify_then_resume_completes_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Arc::new(ScriptedAgent::new());
    let state = suspended(dir.path(), &agent).await;
    let run = state.run_id.to_string();
    let bp = state.pending_breakpoint.clone().unwrap().to_string();

    let status = cli(dir.path(), &["status", &run]).unwrap();
    assert!(status.contains("suspended"));
    assert!(status.contains(&format!("waiting on {bp}: Publish?")));

    let pending: Value = serde_json::from_str(&cli(dir.path(), &["--json", "breakpoints", &run, "--pending"]).unwrap())
        .unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["breakpointId"], json!(bp));

    let out = cli(dir.path(), &["modify", &bp, "--values", r#"{"tone":"formal"}"#, "--by", "ana"]).unwrap();
    assert!(out.starts_with(&format!("{bp}: modified (run running)")));

    let done = runner_at(dir.path(), &agent).resume(state.run_id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(agent.calls("draft"), 1);
    assert_eq!(agent.calls("publish"), 1);

    let events = cli(dir.path(), &["events", &run]).unwrap();
    assert!(events.contains("BreakpointResolved"));
    assert!(events.lines().last().unwrap().contains("RunCompleted"));
}

#[tokio::test]
async fn reject_aborts_and_second_decision_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Arc::new(ScriptedAgent::new());
    let state = suspended(dir.path(), &agent).await;
    let bp = state.pending_breakpoint.clone().unwrap().to_string();

    let out = cli(dir.path(), &["reject", &bp]).unwrap();
    assert!(out.contains("rejected (run aborted)"));

    let again = cli(dir.path(), &["approve", &bp]).unwrap_err();
    assert_eq!(again.exit_code(), 4);

    let runs = cli(dir.path(), &["runs"]).unwrap();
    assert!(runs.contains(&state.run_id.to_string()));
    assert!(runs.contains("aborted"));
}

#[test]
fn unknown_runs_and_bad_values_have_distinct_codes() {
    let dir = tempfile::tempdir().unwrap();
    let missing = uuid::Uuid::new_v4();
    assert_eq!(cli(dir.path(), &["status", &missing.to_string()]).unwrap_err().exit_code(), 4);
    assert_eq!(cli(dir.path(), &["events", &missing.to_string()]).unwrap_err().exit_code(), 4);
    let bp = format!("{missing}/review");
    assert_eq!(cli(dir.path(), &["modify", &bp, "--values", "[]"]).unwrap_err().exit_code(), 2);
    assert_eq!(cli(dir.path(), &["runs"]).unwrap(), "");
}
