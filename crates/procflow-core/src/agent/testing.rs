//! `ScriptedAgent`: agente determinista para tests y demos.
//!
//! Respuestas fijas por step, contadores de llamadas, inyección de fallos y de
//! cuelgues. Sin respuesta configurada devuelve `{"step": .., "inputs": ..}`.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};

use super::{AgentClient, AgentError, AgentReply, AgentRequest};

#[derive(Default)]
pub struct ScriptedAgent {
    replies: DashMap<String, AgentReply>,
    failures: DashMap<String, VecDeque<AgentError>>,
    hanging: DashMap<String, ()>,
    delays: DashMap<String, Duration>,
    calls: DashMap<String, usize>,
    requests: DashMap<String, Vec<AgentRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, step: &str, reply: AgentReply) -> Self {
        self.replies.insert(step.to_string(), reply);
        self
    }

    pub fn reply_json(self, step: &str, value: Value) -> Self {
        self.reply(step, AgentReply::Json(value))
    }

    pub fn reply_text(self, step: &str, text: &str) -> Self {
        self.reply(step, AgentReply::Text(text.to_string()))
    }

    /// Las próximas `times` llamadas a `step` fallan con `error`.
    pub fn fail_times(self, step: &str, times: usize, error: AgentError) -> Self {
        self.failures
            .entry(step.to_string())
            .or_default()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Las llamadas a `step` nunca terminan.
    pub fn hang(self, step: &str) -> Self {
        self.hanging.insert(step.to_string(), ());
        self
    }

    pub fn delay(self, step: &str, delay: Duration) -> Self {
        self.delays.insert(step.to_string(), delay);
        self
    }

    pub fn calls(&self, step: &str) -> usize {
        self.calls.get(step).map_or(0, |c| *c)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn requests(&self, step: &str) -> Vec<AgentRequest> {
        self.requests.get(step).map(|r| r.value().clone()).unwrap_or_default()
    }

    /// Máximo de llamadas simultáneas observado.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let step = request.step.clone();
        *self.calls.entry(step.clone()).or_insert(0) += 1;
        self.requests.entry(step.clone()).or_default().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.delays.get(&step).map(|d| *d.value());
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.hanging.contains_key(&step) {
            futures::future::pending::<()>().await;
        }
        let failure = self.failures.get_mut(&step).and_then(|mut q| q.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }
        let reply = self.replies.get(&step).map(|r| r.value().clone());
        Ok(reply.unwrap_or_else(|| AgentReply::Json(json!({ "step": step, "inputs": request.inputs }))))
    }
}
