//! Salida legible para terminal.
use std::io::{self, Write};

use procflow_core::{BreakpointRecord, RunEvent, RunState};
use serde_json::{json, Value};

pub fn run_line(s: &RunState) -> String {
    let archived = if s.archived { " (archived)" } else { "" };
    format!("{}  {:<9}  {}@{}  {}{archived}",
            s.run_id,
            s.status.as_str(),
            s.workflow_id,
            s.workflow_version,
            s.updated_at.to_rfc3339())
}

pub fn run_summary_json(s: &RunState) -> Value {
    json!({
        "runId": s.run_id,
        "workflowId": s.workflow_id,
        "workflowVersion": s.workflow_version,
        "status": s.status.as_str(),
        "archived": s.archived,
        "pendingBreakpoint": s.pending_breakpoint.as_ref().map(|b| b.to_string()),
        "updatedAt": s.updated_at,
    })
}

pub fn status(out: &mut dyn Write, s: &RunState) -> io::Result<()> {
    writeln!(out, "{}", run_line(s))?;
    for slot in &s.steps {
        write!(out, "  {:<24} {:?} attempts={}", slot.step, slot.status, slot.attempts)?;
        if let Some(eid) = &slot.effect_id {
            write!(out, " effect={eid}")?;
        }
        writeln!(out)?;
    }
    if let Some(bp) = s.pending_breakpoint_record() {
        writeln!(out, "waiting on {}: {}", bp.breakpoint_id, bp.question)?;
    }
    if let Some(f) = &s.failure {
        writeln!(out, "failed in '{}': {}", f.phase, f.reason)?;
    }
    if let Some(fp) = &s.run_fingerprint {
        writeln!(out, "fingerprint {fp}")?;
    }
    Ok(())
}

pub fn event_line(ev: &RunEvent) -> String {
    match ev.kind.step() {
        Some(step) => format!("{:>4}  {}  {:<20} {step}", ev.seq, ev.ts.to_rfc3339(), ev.kind.variant_name()),
        None => format!("{:>4}  {}  {}", ev.seq, ev.ts.to_rfc3339(), ev.kind.variant_name()),
    }
}

pub fn breakpoint(out: &mut dyn Write, r: &BreakpointRecord) -> io::Result<()> {
    writeln!(out, "{}  [{}]  {}", r.breakpoint_id, r.resolution.as_str(), r.title)?;
    writeln!(out, "  {}", r.question)?;
    for a in &r.review_context.artifact_refs {
        writeln!(out, "  artifact {}", a.location())?;
    }
    if let Some(by) = &r.resolved_by {
        writeln!(out, "  resolved by {by}")?;
    }
    Ok(())
}
