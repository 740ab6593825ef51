//! Deadlock
//!
//! The store aborted a transaction to break a lock cycle. The simulator
//! marks that rollback `deadlock_victim`; the rule reports it together with
//! the lock acquisitions of both transactions.

use txnlab_core::{notes, Anomaly, AnomalyType, EventKind, Severity, TxnName};

use super::{refs, RuleResult};
use crate::error::RuleError;
use crate::index::TraceIndex;

pub(super) fn evaluate(index: &TraceIndex<'_>) -> RuleResult {
    let run = index.run();
    let Some(rollback) = run
        .events()
        .iter()
        .find(|e| e.kind == EventKind::Rollback && e.has_note(notes::DEADLOCK_VICTIM))
    else {
        return Ok(None);
    };
    let victim = rollback.transaction.ok_or_else(|| RuleError::Inconsistent {
        rule: AnomalyType::Deadlock,
        reason: format!("victim rollback #{} has no transaction", rollback.sequence_order),
    })?;
    let survivor = victim.other();

    let locks: Vec<_> = TxnName::ALL
        .into_iter()
        .flat_map(|txn| index.of(txn).filter(|e| e.has_note(notes::FOR_UPDATE)))
        .filter(|e| e.sequence_order < rollback.sequence_order)
        .collect();
    let outcome = if run.committed(survivor) {
        "committed"
    } else {
        "also failed"
    };
    let description = format!(
        "{} and {} waited on each other's row locks; the store aborted {} and {} {}",
        TxnName::T1,
        TxnName::T2,
        victim,
        survivor,
        outcome
    );
    Ok(Some(Anomaly::new(
        AnomalyType::Deadlock,
        Severity::High,
        [victim, survivor],
        refs(locks.into_iter().chain([rollback])),
        description,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{begin, build};
    use txnlab_core::{EventDraft, RecordKey, ScenarioKind};

    fn lock(txn: TxnName, row: &str, value: i64) -> EventDraft {
        EventDraft::read(txn, RecordKey::account(row), Some(value)).with_note(notes::FOR_UPDATE)
    }

    #[test]
    fn test_victim_rollback() {
        let run = build(
            ScenarioKind::Deadlock,
            None,
            vec![
                begin(TxnName::T1),
                lock(TxnName::T1, "A", 100),
                begin(TxnName::T2),
                lock(TxnName::T2, "B", 200),
                EventDraft::rollback(TxnName::T2).with_note(notes::DEADLOCK_VICTIM),
                lock(TxnName::T1, "B", 200),
                EventDraft::write(TxnName::T1, RecordKey::account("A"), Some(100), 110),
                EventDraft::commit(TxnName::T1),
            ],
        );
        let found = evaluate(&TraceIndex::new(&run)).unwrap().unwrap();
        assert!(found.affects(TxnName::T2));
        assert_eq!(found.event_refs, vec![2, 4, 5]);
        assert!(found.description.contains("aborted T2"));
    }

    #[test]
    fn test_plain_rollback_is_not_deadlock() {
        let run = build(
            ScenarioKind::Deadlock,
            None,
            vec![
                begin(TxnName::T1),
                EventDraft::rollback(TxnName::T1),
                begin(TxnName::T2),
                EventDraft::commit(TxnName::T2),
            ],
        );
        assert_eq!(evaluate(&TraceIndex::new(&run)).unwrap(), None);
    }
}
