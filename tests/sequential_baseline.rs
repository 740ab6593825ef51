//! Sequential baseline
//!
//! Running T1 to completion before T2 starts removes every interleaving,
//! so no variant may produce a finding.

use proptest::prelude::*;

use txnlab::{notes, Interleaving, RecordKey, ScenarioKind, TxnLab, TxnName, TxnParams};

fn lab() -> TxnLab {
    TxnLab::in_memory().unwrap()
}

#[test]
fn test_every_variant_is_clean_when_sequential() {
    let lab = lab();
    for kind in ScenarioKind::ALL {
        let (t1, t2) = kind.default_params();
        let run = lab.simulate_with(kind, t1, t2, Interleaving::Sequential).unwrap();
        let report = lab.analyze(&run);
        assert!(report.is_complete(), "{}: {:?}", kind, report.failures);
        assert!(report.is_clean(), "{}: {:?}", kind, report.anomalies);
    }
}

#[test]
fn test_sequential_transactions_do_not_overlap() {
    let lab = lab();
    for kind in ScenarioKind::ALL {
        let (t1, t2) = kind.default_params();
        let run = lab.simulate_with(kind, t1, t2, Interleaving::Sequential).unwrap();
        let t1_end = run.terminal_event(TxnName::T1).unwrap().sequence_order;
        let t2_start = run.events_of(TxnName::T2).next().unwrap().sequence_order;
        assert!(t1_end < t2_start, "{}", kind);
    }
}

#[test]
fn test_sequential_lost_update_keeps_both_deltas() {
    let lab = lab();
    let (t1, t2) = ScenarioKind::LostUpdate.default_params();
    let run = lab
        .simulate_with(ScenarioKind::LostUpdate, t1, t2, Interleaving::Sequential)
        .unwrap();
    assert_eq!(run.final_value(&RecordKey::account("A")), Some(130));
}

#[test]
fn test_sequential_write_skew_is_guarded() {
    let lab = lab();
    let (t1, t2) = ScenarioKind::WriteSkew.default_params();
    let run = lab
        .simulate_with(ScenarioKind::WriteSkew, t1, t2, Interleaving::Sequential)
        .unwrap();
    assert!(run.committed(TxnName::T1));
    assert!(run
        .terminal_event(TxnName::T2)
        .unwrap()
        .has_note(notes::INVARIANT_GUARD));
    let invariant = run.invariant().unwrap();
    assert!(invariant.sum(|k| run.final_value(k)).unwrap() >= invariant.floor);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Sequential lost update with any deltas is clean and applies both
    #[test]
    fn prop_sequential_lost_update_is_clean(d1 in -90i64..90, d2 in -90i64..90) {
        let lab = lab();
        let a = RecordKey::account("A");
        let run = lab
            .simulate_with(
                ScenarioKind::LostUpdate,
                TxnParams::new(d1, [a.clone()]),
                TxnParams::new(d2, [a.clone()]),
                Interleaving::Sequential,
            )
            .unwrap();
        prop_assert_eq!(run.final_value(&a), Some(100 + d1 + d2));
        prop_assert!(lab.detect(&run).is_empty());
    }
}
