//! procflow-cli
//!
//! CLI de operador sobre un backend durable. Sólo inspecciona corridas y
//! resuelve breakpoints: continuar una corrida requiere la definición del
//! workflow, que vive en el proceso que la registró.
//!
//! Códigos de salida: 0 ok, 2 uso, 4 no encontrado o rechazado, 5 backend.

pub mod render;

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::debug;
use procflow_core::repo::ReplayError;
use procflow_core::{replay, BreakpointError, BreakpointId, BreakpointManager, EventStore, EventStoreError, Resolution};
use procflow_persistence::{PersistenceError, Stores};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "procflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspecciona corridas de procflow y resuelve breakpoints pendientes")]
pub struct Cli {
    /// Directorio del backend de filesystem. Sin él se usa `DATABASE_URL`
    /// (Postgres) o `PROCFLOW_STORE_DIR`.
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Salida en JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lista las corridas conocidas
    Runs,

    /// Estado reconstruido de una corrida
    Status { run_id: Uuid },

    /// Journal de eventos de una corrida
    Events { run_id: Uuid },

    /// Breakpoints de una corrida
    Breakpoints {
        run_id: Uuid,

        /// Sólo el pendiente
        #[arg(long)]
        pending: bool,
    },

    /// Aprueba un breakpoint (`<run_id>/<step>`)
    Approve {
        breakpoint_id: BreakpointId,

        #[arg(long, env = "PROCFLOW_REVIEWER", default_value = "operator")]
        by: String,
    },

    /// Aprueba inyectando valores en los outputs del step
    Modify {
        breakpoint_id: BreakpointId,

        /// Objeto JSON con los valores modificados
        #[arg(long)]
        values: String,

        #[arg(long, env = "PROCFLOW_REVIEWER", default_value = "operator")]
        by: String,
    },

    /// Rechaza un breakpoint; la corrida queda abortada
    Reject {
        breakpoint_id: BreakpointId,

        #[arg(long, env = "PROCFLOW_REVIEWER", default_value = "operator")]
        by: String,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Refused(String),
    #[error("backend: {0}")]
    Backend(String),
    #[error("output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::NotFound(_) | CliError::Refused(_) => 4,
            CliError::Backend(_) | CliError::Output(_) => 5,
        }
    }
}

impl From<PersistenceError> for CliError {
    fn from(e: PersistenceError) -> Self {
        CliError::Backend(e.to_string())
    }
}

impl From<EventStoreError> for CliError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::Conflict { .. } => CliError::Refused(e.to_string()),
            other => CliError::Backend(other.to_string()),
        }
    }
}

impl From<ReplayError> for CliError {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::Empty(run_id) => CliError::NotFound(format!("run {run_id} not found")),
            other => CliError::Backend(other.to_string()),
        }
    }
}

impl From<BreakpointError> for CliError {
    fn from(e: BreakpointError) -> Self {
        match e {
            BreakpointError::NotFound(_) => CliError::NotFound(e.to_string()),
            BreakpointError::AlreadyResolved { .. }
            | BreakpointError::InvalidRunState { .. }
            | BreakpointError::Archived(_) => CliError::Refused(e.to_string()),
            BreakpointError::InvalidResolution(_) => CliError::Usage(e.to_string()),
            BreakpointError::Events(e) => e.into(),
            BreakpointError::Replay(e) => e.into(),
            BreakpointError::Artifacts(e) => CliError::Backend(e.to_string()),
        }
    }
}

/// Abre el backend según `--store-dir` o el entorno.
pub fn open_stores(cli: &Cli) -> Result<Stores, CliError> {
    let stores = match &cli.store_dir {
        Some(dir) => procflow_persistence::fs::open_stores(dir)?,
        None => procflow_persistence::open_from_env()?,
    };
    Ok(stores)
}

/// Ejecuta un comando contra `stores`, escribiendo el resultado en `out`.
pub fn execute(cli: &Cli, stores: &Stores, out: &mut dyn Write) -> Result<(), CliError> {
    debug!("procflow {:?}", cli.command);
    match &cli.command {
        Command::Runs => {
            let mut states = Vec::new();
            for run_id in stores.events.list_runs()? {
                states.push(replay(run_id, &stores.events.list(run_id)?)?);
            }
            if cli.json {
                let rows: Vec<Value> = states.iter().map(render::run_summary_json).collect();
                writeln!(out, "{}", pretty(&Value::Array(rows)))?;
            } else {
                for s in &states {
                    writeln!(out, "{}", render::run_line(s))?;
                }
            }
        }
        Command::Status { run_id } => {
            let state = replay(*run_id, &stores.events.list(*run_id)?)?;
            if cli.json {
                let value = serde_json::to_value(&state).map_err(|e| CliError::Backend(e.to_string()))?;
                writeln!(out, "{}", pretty(&value))?;
            } else {
                render::status(out, &state)?;
            }
        }
        Command::Events { run_id } => {
            let events = stores.events.list(*run_id)?;
            if events.is_empty() {
                return Err(CliError::NotFound(format!("run {run_id} not found")));
            }
            for ev in &events {
                if cli.json {
                    let value = serde_json::to_value(ev).map_err(|e| CliError::Backend(e.to_string()))?;
                    writeln!(out, "{value}")?;
                } else {
                    writeln!(out, "{}", render::event_line(ev))?;
                }
            }
        }
        Command::Breakpoints { run_id, pending } => {
            let manager = manager(stores);
            let records = if *pending {
                manager.pending(*run_id)?.into_iter().collect()
            } else {
                manager.list(*run_id)?
            };
            if cli.json {
                let value = serde_json::to_value(&records).map_err(|e| CliError::Backend(e.to_string()))?;
                writeln!(out, "{}", pretty(&value))?;
            } else {
                for r in &records {
                    render::breakpoint(out, r)?;
                }
            }
        }
        Command::Approve { breakpoint_id, by } => resolve(cli, stores, out, breakpoint_id, Resolution::approve(by))?,
        Command::Modify { breakpoint_id, values, by } => {
            let values = parse_values(values)?;
            resolve(cli, stores, out, breakpoint_id, Resolution::modify(by, values))?
        }
        Command::Reject { breakpoint_id, by } => resolve(cli, stores, out, breakpoint_id, Resolution::reject(by))?,
    }
    Ok(())
}

fn manager(stores: &Stores) -> BreakpointManager {
    BreakpointManager::new(stores.events.clone(), stores.artifacts.clone())
}

fn resolve(cli: &Cli,
           stores: &Stores,
           out: &mut dyn Write,
           breakpoint_id: &BreakpointId,
           resolution: Resolution)
           -> Result<(), CliError> {
    let decision = resolution.decision;
    let state = manager(stores).resolve(breakpoint_id, resolution)?;
    if cli.json {
        writeln!(out,
                 "{}",
                 pretty(&serde_json::json!({
                     "breakpointId": breakpoint_id.to_string(),
                     "decision": decision.as_str(),
                     "status": state.status.as_str(),
                 })))?;
    } else {
        writeln!(out, "{breakpoint_id}: {} (run {})", decision.as_str(), state.status)?;
        if !state.is_terminal() {
            writeln!(out, "resume the run from its owning process to continue")?;
        }
    }
    Ok(())
}

/// `--values` debe ser un objeto JSON.
pub fn parse_values(raw: &str) -> Result<Map<String, Value>, CliError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CliError::Usage(format!("--values must be a JSON object, got {other}"))),
        Err(e) => Err(CliError::Usage(format!("--values is not valid JSON: {e}"))),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
