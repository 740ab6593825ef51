//! Write skew
//!
//! Both transactions read the invariant's keys, each saw the invariant
//! hold, each wrote a different key of it, both committed, and the
//! combined committed state breaks the invariant.

use std::collections::BTreeSet;

use txnlab_core::{Anomaly, AnomalyType, RecordKey, Severity, TraceEvent, TxnName};

use super::{refs, RuleResult};
use crate::error::RuleError;
use crate::index::TraceIndex;

/// First value a transaction read for each key
fn snapshot<'e>(reads: &[&'e TraceEvent]) -> Vec<(&'e RecordKey, Option<i64>)> {
    let mut seen: Vec<(&RecordKey, Option<i64>)> = Vec::new();
    for &read in reads {
        if let Some(key) = &read.target_key {
            if !seen.iter().any(|(k, _)| *k == key) {
                seen.push((key, read.observed_value()));
            }
        }
    }
    seen
}

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    let run = index.run();
    let Some(invariant) = run.invariant() else {
        return Ok(None);
    };
    let (Some(c1), Some(c2)) = (index.commit(TxnName::T1), index.commit(TxnName::T2)) else {
        return Ok(None);
    };

    let mut reads: [Vec<&TraceEvent>; 2] = Default::default();
    let mut writes: [Vec<&TraceEvent>; 2] = Default::default();
    for (slot, txn) in TxnName::ALL.into_iter().enumerate() {
        for key in &invariant.keys {
            reads[slot].extend(index.point_reads(txn, key));
        }
        reads[slot].sort_by_key(|e| e.sequence_order);
        writes[slot] = index.all_writes(txn);
    }

    let write_keys = |events: &[&TraceEvent]| -> BTreeSet<RecordKey> {
        events.iter().filter_map(|e| e.target_key.clone()).collect()
    };
    let (w1, w2) = (write_keys(writes[0].as_slice()), write_keys(writes[1].as_slice()));
    if w1.is_empty() || w2.is_empty() || !w1.is_disjoint(&w2) {
        return Ok(None);
    }
    if !w1.iter().chain(w2.iter()).all(|k| invariant.covers(k)) {
        return Ok(None);
    }

    let (s1, s2) = (snapshot(&reads[0]), snapshot(&reads[1]));
    let shared = s1.iter().any(|(k, _)| s2.iter().any(|(other, _)| other == k));
    if !shared {
        return Ok(None);
    }
    let held = |seen: &[(&RecordKey, Option<i64>)]| {
        invariant.holds(|key| seen.iter().find(|(k, _)| *k == key).and_then(|(_, v)| *v))
    };
    if held(s1.as_slice()) != Some(true) || held(s2.as_slice()) != Some(true) {
        return Ok(None);
    }

    let post = invariant
        .sum(|key| run.final_value(key))
        .ok_or_else(|| RuleError::MissingData {
            rule: AnomalyType::WriteSkew,
            what: format!("final_state markers for every key of {}", invariant),
        })?;
    if post >= invariant.floor {
        return Ok(None);
    }

    let markers = run
        .events()
        .iter()
        .filter(|e| e.is_marker() && e.target_key.as_ref().map_or(false, |k| invariant.covers(k)));
    let events = reads
        .iter()
        .chain(writes.iter())
        .flatten()
        .copied()
        .chain([c1, c2])
        .chain(markers);
    let description = format!(
        "T1 wrote [{}] and T2 wrote [{}] after both saw {} hold; committed sum is {}",
        join(&w1),
        join(&w2),
        invariant,
        post
    );
    Ok(Some(Anomaly::new(
        AnomalyType::WriteSkew,
        Severity::High,
        TxnName::ALL,
        refs(events),
        description,
    )))
}

fn join(keys: &BTreeSet<RecordKey>) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{begin, build};
    use txnlab_core::{EventDraft, Run, ScenarioKind, SumInvariant};

    fn key(row: &str) -> RecordKey {
        RecordKey::account(row)
    }

    fn invariant() -> SumInvariant {
        SumInvariant::new([key("A"), key("B")], 0)
    }

    fn skewed(t2_end: EventDraft, final_b: i64) -> Run {
        build(
            ScenarioKind::WriteSkew,
            Some(invariant()),
            vec![
                begin(TxnName::T1),
                EventDraft::read(TxnName::T1, key("A"), Some(100)),
                EventDraft::read(TxnName::T1, key("B"), Some(200)),
                begin(TxnName::T2),
                EventDraft::read(TxnName::T2, key("B"), Some(200)),
                EventDraft::read(TxnName::T2, key("A"), Some(100)),
                EventDraft::write(TxnName::T1, key("A"), Some(100), -150),
                EventDraft::commit(TxnName::T1),
                EventDraft::write(TxnName::T2, key("B"), Some(200), -50),
                t2_end,
                EventDraft::final_state(key("A"), Some(-150)),
                EventDraft::final_state(key("B"), Some(final_b)),
            ],
        )
    }

    #[test]
    fn test_violating_post_state() {
        let run = skewed(EventDraft::commit(TxnName::T2), -50);
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert_eq!(found.affected_transactions, TxnName::ALL.to_vec());
        assert_eq!(found.event_refs, (2..=12).filter(|s| *s != 4).collect::<Vec<_>>());
        assert!(found.description.contains("-200"));
    }

    #[test]
    fn test_rolled_back_writer_is_clean() {
        let run = skewed(EventDraft::rollback(TxnName::T2), 200);
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }

    #[test]
    fn test_missing_final_state_is_rule_error() {
        let mut drafts = vec![
            begin(TxnName::T1),
            EventDraft::read(TxnName::T1, key("A"), Some(100)),
            EventDraft::read(TxnName::T1, key("B"), Some(200)),
            EventDraft::write(TxnName::T1, key("A"), Some(100), -150),
            EventDraft::commit(TxnName::T1),
            begin(TxnName::T2),
            EventDraft::read(TxnName::T2, key("B"), Some(200)),
            EventDraft::read(TxnName::T2, key("A"), Some(100)),
            EventDraft::write(TxnName::T2, key("B"), Some(200), -50),
            EventDraft::commit(TxnName::T2),
        ];
        drafts.push(EventDraft::final_state(key("A"), Some(-150)));
        let run = build(ScenarioKind::WriteSkew, Some(invariant()), drafts);
        let err = evaluate(&TraceIndex::new(&run)).unwrap_err();
        assert_eq!(err.rule(), AnomalyType::WriteSkew);
    }

    #[test]
    fn test_no_invariant_no_verdict() {
        let run = build(
            ScenarioKind::LostUpdate,
            None,
            vec![
                begin(TxnName::T1),
                EventDraft::commit(TxnName::T1),
                begin(TxnName::T2),
                EventDraft::commit(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }
}
