//! Phantom read
//!
//! One transaction evaluates the same range predicate twice and gets a
//! different row count, and between the scans the other transaction
//! committed an insert or delete of a row the predicate matches.

use txnlab_core::{Anomaly, AnomalyType, RangePredicate, Severity, TraceEvent, TxnName};

use super::{refs, RuleResult};
use crate::error::RuleError;
use crate::index::TraceIndex;

/// Whether an insert or delete changes the predicate's result set
fn changes_membership(predicate: &RangePredicate, event: &TraceEvent) -> bool {
    let Some(key) = &event.target_key else {
        return false;
    };
    if event.is_insert() {
        event.new_value.map_or(false, |v| predicate.matches(key, v))
    } else if event.is_delete() {
        event.old_value.map_or(false, |v| predicate.matches(key, v))
    } else {
        false
    }
}

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    for reader in TxnName::ALL {
        let writer = reader.other();
        let scans: Vec<&TraceEvent> = index.range_reads(reader).collect();
        for (i, first) in scans.iter().enumerate() {
            let predicate = first.predicate.as_ref().ok_or_else(|| RuleError::Inconsistent {
                rule: AnomalyType::PhantomRead,
                reason: format!("range read #{} has no predicate", first.sequence_order),
            })?;
            let Some(second) = scans[i + 1..]
                .iter()
                .find(|s| s.predicate.as_ref() == Some(predicate))
            else {
                continue;
            };
            if first.observed_value() == second.observed_value() {
                continue;
            }
            let Some(commit) =
                index.committed_between(writer, first.sequence_order, second.sequence_order)
            else {
                continue;
            };
            let changes: Vec<&TraceEvent> = index
                .all_writes(writer)
                .into_iter()
                .filter(|w| w.sequence_order < commit.sequence_order)
                .filter(|w| changes_membership(predicate, w))
                .collect();
            if changes.is_empty() {
                continue;
            }

            let rows = |e: &TraceEvent| e.observed_value().unwrap_or_default();
            let description = format!(
                "{} scanned {} twice and counted {} then {} rows; {} committed a matching {} in between",
                reader,
                predicate,
                rows(*first),
                rows(*second),
                writer,
                if changes.iter().all(|c| c.is_insert()) { "insert" } else { "change" }
            );
            return Ok(Some(Anomaly::new(
                AnomalyType::PhantomRead,
                Severity::Medium,
                [reader, writer],
                refs(
                    [*first]
                        .into_iter()
                        .chain(changes.iter().copied())
                        .chain([commit, *second]),
                ),
                description,
            )));
        }
    }
    Ok(None)
}
