//! Run/report → human/json string formatting.
//!
//! Two modes:
//! - **Human** (default): aligned trace table followed by findings
//! - **JSON** (`--json`): `serde_json::to_string_pretty`

use serde::Serialize;
use txnlab_core::{
    AnomalyType, Error, Interleaving, IsolationLevel, Run, ScenarioKind, TraceEvent, TxnName,
};
use txnlab_detector::DetectionReport;

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    run: &'a Run,
    report: &'a DetectionReport,
}

/// Format a run and its detection report.
pub fn format_run(run: &Run, report: &DetectionReport, mode: OutputMode, show_trace: bool) -> String {
    match mode {
        OutputMode::Json => to_json(&RunOutput { run, report }),
        OutputMode::Human => format_run_human(run, report, show_trace),
    }
}

/// Format an error.
pub fn format_error(err: &Error, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(&serde_json::json!({
            "error": err.to_string(),
            "code": err.error_code(),
        })),
        OutputMode::Human => format!("(error) {}: {}", err.error_code(), err),
    }
}

/// Format the variant catalog.
pub fn format_list(mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let variants: Vec<_> = ScenarioKind::ALL
                .iter()
                .map(|k| {
                    let (t1, t2) = k.default_params();
                    serde_json::json!({
                        "variant": k.as_str(),
                        "isolation_level": k.isolation_level().as_str(),
                        "description": k.description(),
                        "t1": t1,
                        "t2": t2,
                    })
                })
                .collect();
            to_json(&variants)
        }
        OutputMode::Human => {
            let mut out = String::new();
            for kind in ScenarioKind::ALL {
                let (t1, t2) = kind.default_params();
                out.push_str(&format!(
                    "{:<20} {:<17} {}\n{:<20} T1 {:+} on [{}], T2 {:+} on [{}]\n",
                    kind.as_str(),
                    kind.isolation_level().as_str(),
                    kind.description(),
                    "",
                    t1.amount,
                    join(&t1.keys),
                    t2.amount,
                    join(&t2.keys),
                ));
            }
            out.trim_end().to_string()
        }
    }
}

/// Format the isolation prevention matrix.
pub fn format_matrix(mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let rows: Vec<_> = IsolationLevel::ALL
                .iter()
                .map(|level| {
                    let prevents: Vec<&str> = AnomalyType::ALL
                        .iter()
                        .filter(|a| level.prevents(**a))
                        .map(|a| a.as_str())
                        .collect();
                    serde_json::json!({
                        "isolation_level": level.as_str(),
                        "description": level.description(),
                        "prevents": prevents,
                    })
                })
                .collect();
            to_json(&rows)
        }
        OutputMode::Human => {
            let mut out = format!("{:<17}", "");
            for anomaly in AnomalyType::ALL {
                out.push_str(&format!(" {:<19}", anomaly.as_str()));
            }
            out.push('\n');
            for level in IsolationLevel::ALL {
                out.push_str(&format!("{:<17}", level.as_str()));
                for anomaly in AnomalyType::ALL {
                    let cell = if level.prevents(anomaly) { "prevented" } else { "possible" };
                    out.push_str(&format!(" {:<19}", cell));
                }
                out.push('\n');
            }
            out.trim_end().to_string()
        }
    }
}

fn format_run_human(run: &Run, report: &DetectionReport, show_trace: bool) -> String {
    let mut out = format!(
        "run {} [{} / {}]\n",
        run.id(),
        run.variant(),
        match run.interleaving() {
            Interleaving::Concurrent => "concurrent",
            Interleaving::Sequential => "sequential",
        }
    );
    for txn in TxnName::ALL {
        let t = run.transaction(txn);
        out.push_str(&format!(
            "  {} {:<17} {}\n",
            txn,
            t.isolation_level.as_str(),
            t.status
        ));
    }
    if let Some(invariant) = run.invariant() {
        out.push_str(&format!("  invariant: {}\n", invariant));
    }

    if show_trace {
        out.push_str("\ntrace:\n");
        for event in run.events() {
            out.push_str(&format_event(event));
            out.push('\n');
        }
    }

    out.push('\n');
    if report.anomalies.is_empty() {
        out.push_str("(no anomalies)\n");
    }
    for anomaly in &report.anomalies {
        out.push_str(&format!(
            "[{}] {}: {}\n  events: {}\n  fix: {}\n",
            anomaly.severity,
            anomaly.anomaly_type,
            anomaly.description,
            anomaly
                .event_refs
                .iter()
                .map(|r| format!("#{}", r))
                .collect::<Vec<_>>()
                .join(" "),
            anomaly.anomaly_type.remediation()
        ));
    }
    for failure in &report.failures {
        out.push_str(&format!("(rule error) {}\n", failure));
    }
    out.trim_end().to_string()
}

fn format_event(event: &TraceEvent) -> String {
    let who = event.transaction.map_or("--", |t| t.as_str());
    let target = match (&event.target_key, &event.predicate) {
        (_, Some(predicate)) => predicate.to_string(),
        (Some(key), None) => key.to_string(),
        (None, None) => String::new(),
    };
    let values = match (event.old_value, event.new_value) {
        (Some(old), Some(new)) => format!("{} -> {}", old, new),
        (None, Some(new)) => format!("-> {}", new),
        (Some(old), None) => old.to_string(),
        (None, None) => String::new(),
    };
    let note = event
        .note
        .as_deref()
        .map(|n| format!("  ({})", n))
        .unwrap_or_default();
    format!(
        "  #{:<3} {:<2} {:<8} {:<28} {}{}",
        event.sequence_order, who, event.kind.as_str(), target, values, note
    )
    .trim_end()
    .to_string()
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}
