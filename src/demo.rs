//! Workflow de ejemplo de punta a punta: investigación y keywords en paralelo,
//! borrador, quality gate, revisión humana y publicación.
//!
//! El agente es un `ScriptedAgent`; la revisión se resuelve desde el propio
//! proceso con valores modificados, como lo haría un operador con
//! `procflow modify`.
use std::sync::Arc;

use log::info;
use procflow_core::agent::testing::ScriptedAgent;
use procflow_core::{BreakpointStep, Condition, EngineConfig, EngineError, FieldType, FnSkill, GateStep, Resolution,
                    RunState, RunStatus, Source, StepSpec, TaskContract, TaskStep, WorkflowBuilder, WorkflowDefinition,
                    WorkflowRunner};
use procflow_persistence::{PersistenceError, Stores};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const DEMO_WORKFLOW: &str = "article";

#[derive(Debug, Error)]
pub enum DemoError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("demo workflow is invalid: {0}")]
    Definition(String),
    #[error("run {run_id} ended as {status} instead of waiting for review")]
    Unexpected { run_id: uuid::Uuid, status: RunStatus },
}

pub fn article_workflow() -> Result<WorkflowDefinition, DemoError> {
    let facts = TaskContract::new().required("facts", FieldType::Array);
    let draft = TaskContract::new().required("title", FieldType::String)
                                   .required("body", FieldType::String);
    WorkflowBuilder::new(DEMO_WORKFLOW, "1")
        .task(TaskStep::new("research", move |_, _| {
                  StepSpec::agent("researcher", "Collect facts").role("research assistant")
                                                                .instruction("Return at least three verifiable facts")
                                                                .contract(facts.clone())
              }).bind("topic", Source::input("/topic")))
        .task(TaskStep::new("keywords", |_, _| StepSpec::skill("keywords", "Extract keywords"))
              .bind("topic", Source::input("/topic")))
        .task(TaskStep::new("draft", move |_, _| {
                  StepSpec::agent("writer", "Write the article").role("technical writer")
                                                               .contract(draft.clone())
              }).bind("facts", Source::output_at("research", "/facts"))
                .bind("keywords", Source::output_at("keywords", "/keywords")))
        .task(TaskStep::new("score", |_, _| StepSpec::agent("critic", "Score the draft"))
              .bind("draft", Source::output("draft")))
        .gate(GateStep::new("quality").check("score >= 0.7", Condition::at_least("score", "/score", 0.7))
                                      .escalate("The draft scored low. Publish anyway?", "Quality review"))
        .breakpoint(BreakpointStep::new("review", "Publish this article?", "Editorial review")
                    .context("score", Source::output_at("score", "/score"))
                    .attach("draft.json", Source::output("draft"))
                    .provides("tone"))
        .task(TaskStep::new("publish", |_, _| StepSpec::agent("publisher", "Publish"))
              .bind("draft", Source::output("draft"))
              .bind_optional("tone", Source::output("tone")))
        .returns(["draft", "tone", "publish"])
        .build()
        .map_err(|e| DemoError::Definition(e.to_string()))
}

fn keywords_skill() -> FnSkill {
    FnSkill::new("keywords", |inputs: &Value| {
        let topic = inputs.get("topic")
                          .and_then(Value::as_str)
                          .ok_or_else(|| "missing 'topic'".to_string())?;
        let words: Vec<Value> = topic.split_whitespace()
                                     .filter(|w| w.len() > 3)
                                     .map(|w| Value::String(w.to_lowercase()))
                                     .collect();
        Ok(json!({ "keywords": words }))
    })
}

/// Agente con respuestas fijas para cada step del workflow.
pub fn scripted_agent() -> ScriptedAgent {
    ScriptedAgent::new().reply_json("research",
                                    json!({"facts": ["journals are append-only",
                                                     "effects are keyed by input hash",
                                                     "breakpoints survive restarts"]}))
                        .reply_text("draft",
                                    "Here you go:\n{\"title\": \"Durable workflows\", \"body\": \"Replay, don't redo.\"}")
                        .reply_json("score", json!({"score": 0.82}))
                        .reply_json("publish", json!({"url": "https://blog.example/durable-workflows"}))
}

pub fn runner(stores: &Stores, agent: Arc<ScriptedAgent>) -> Result<WorkflowRunner, DemoError> {
    Ok(stores.runner_builder()
             .agent(agent)
             .skill(keywords_skill())
             .config(EngineConfig::from_env())
             .register(article_workflow()?)
             .build()?)
}

/// Corre el workflow hasta la revisión, la resuelve y termina la corrida.
pub async fn run(stores: &Stores, agent: Arc<ScriptedAgent>, topic: &str) -> Result<RunState, DemoError> {
    let runner = runner(stores, agent)?;
    let suspended = runner.start(DEMO_WORKFLOW, json!({ "topic": topic })).await?;
    let Some(bp) = suspended.pending_breakpoint.clone() else {
        return Err(DemoError::Unexpected { run_id: suspended.run_id,
                                           status: suspended.status });
    };
    info!("run {} waiting on {bp}", suspended.run_id);

    let mut values = Map::new();
    values.insert("tone".into(), Value::from("friendly"));
    let done = runner.resolve(&bp, Resolution::modify("demo-editor", values)).await?;
    info!("run {} finished as {}", done.run_id, done.status);
    Ok(done)
}
