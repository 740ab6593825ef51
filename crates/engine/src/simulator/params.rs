//! Request validation
//!
//! Every check here runs before the store is touched, so a rejected request
//! leaves no trace, no run and no store state behind.

use std::collections::BTreeSet;

use txnlab_core::{
    Error, RangePredicate, RecordKey, Result, ScenarioKind, SumInvariant, TxnName, TxnParams,
};

use crate::config::EngineConfig;

/// A validated request, ready to execute
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub(crate) kind: ScenarioKind,
    pub(crate) t1: TxnParams,
    pub(crate) t2: TxnParams,
    /// Record the variant revolves around
    pub(crate) target: RecordKey,
    /// Range re-evaluated by the phantom reader
    pub(crate) predicate: Option<RangePredicate>,
    /// Shared constraint of write skew
    pub(crate) invariant: Option<SumInvariant>,
}

impl Plan {
    /// Parameters of one transaction
    pub(crate) fn params(&self, txn: TxnName) -> &TxnParams {
        match txn {
            TxnName::T1 => &self.t1,
            TxnName::T2 => &self.t2,
        }
    }

    /// Every record either transaction names, ordered
    pub(crate) fn touched_keys(&self) -> BTreeSet<RecordKey> {
        self.t1
            .keys
            .iter()
            .chain(self.t2.keys.iter())
            .cloned()
            .collect()
    }
}

/// Check a request against the variant's rules and the seed data
pub(crate) fn validate(
    kind: ScenarioKind,
    t1: TxnParams,
    t2: TxnParams,
    config: &EngineConfig,
) -> Result<Plan> {
    if t1.keys.is_empty() || t2.keys.is_empty() {
        return Err(Error::invalid_parameters(
            "both transactions need at least one key",
        ));
    }
    let overlap: Vec<RecordKey> = t1.overlap(&t2).into_iter().cloned().collect();
    let Some(first_shared) = overlap.first().cloned() else {
        return Err(Error::invalid_parameters(format!(
            "{} needs overlapping keys, T1 has [{}] and T2 has [{}]",
            kind,
            join(&t1.keys),
            join(&t2.keys)
        )));
    };

    let mut plan = Plan {
        kind,
        target: first_shared,
        predicate: None,
        invariant: None,
        t1,
        t2,
    };

    match kind {
        ScenarioKind::LostUpdate | ScenarioKind::DirtyRead | ScenarioKind::NonRepeatableRead => {
            require_seeded(plan.touched_keys().iter(), config)?;
        }
        ScenarioKind::PhantomRead => validate_phantom(&mut plan, config)?,
        ScenarioKind::WriteSkew => validate_write_skew(&mut plan, config)?,
        ScenarioKind::Deadlock => validate_deadlock(&mut plan, config)?,
    }
    Ok(plan)
}

fn validate_phantom(plan: &mut Plan, config: &EngineConfig) -> Result<()> {
    let predicate = config.phantom_predicate();
    predicate.validate()?;
    let insert = first_key(&plan.t1)?;
    if config.seed_value(&insert).is_some() {
        return Err(Error::invalid_parameters(format!(
            "phantom insert key {} is already seeded",
            insert
        )));
    }
    if !predicate.matches(&insert, plan.t1.amount) {
        return Err(Error::invalid_parameters(format!(
            "phantom insert {} = {} does not match {}",
            insert, plan.t1.amount, predicate
        )));
    }
    require_seeded(plan.touched_keys().iter().filter(|k| **k != insert), config)?;
    plan.target = insert;
    plan.predicate = Some(predicate);
    Ok(())
}

fn validate_write_skew(plan: &mut Plan, config: &EngineConfig) -> Result<()> {
    let p1 = first_key(&plan.t1)?;
    let p2 = first_key(&plan.t2)?;
    if p1 == p2 {
        return Err(Error::invalid_parameters(format!(
            "write skew needs disjoint writes, both transactions write {}",
            p1
        )));
    }
    let keys = plan.touched_keys();
    require_seeded(keys.iter(), config)?;
    plan.invariant = Some(config.write_skew_invariant(keys));
    plan.target = p1;
    Ok(())
}

fn validate_deadlock(plan: &mut Plan, config: &EngineConfig) -> Result<()> {
    if plan.t1.keys.len() < 2 || plan.t2.keys.len() < 2 {
        return Err(Error::invalid_parameters(
            "deadlock needs two keys per transaction",
        ));
    }
    let (a, b) = (&plan.t1.keys[0], &plan.t1.keys[1]);
    if a == b || plan.t2.keys[0] != *b || plan.t2.keys[1] != *a {
        return Err(Error::invalid_parameters(format!(
            "deadlock needs opposite lock order, T1 locks [{}] and T2 locks [{}]",
            join(&plan.t1.keys[..2]),
            join(&plan.t2.keys[..2])
        )));
    }
    require_seeded(plan.touched_keys().iter(), config)?;
    plan.target = a.clone();
    Ok(())
}

fn first_key(params: &TxnParams) -> Result<RecordKey> {
    params
        .primary_key()
        .cloned()
        .ok_or_else(|| Error::invalid_parameters("transaction has no keys"))
}

fn require_seeded<'a>(
    keys: impl IntoIterator<Item = &'a RecordKey>,
    config: &EngineConfig,
) -> Result<()> {
    for key in keys {
        if config.seed_value(key).is_none() {
            return Err(Error::invalid_parameters(format!(
                "key {} is not in the seed data",
                key
            )));
        }
    }
    Ok(())
}

fn join(keys: &[RecordKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(row: &str) -> RecordKey {
        RecordKey::account(row)
    }

    fn check(kind: ScenarioKind, t1: TxnParams, t2: TxnParams) -> Result<Plan> {
        validate(kind, t1, t2, &EngineConfig::default())
    }

    #[test]
    fn test_defaults_are_valid() {
        for kind in ScenarioKind::ALL {
            let (t1, t2) = kind.default_params();
            check(kind, t1, t2).unwrap();
        }
    }

    #[test]
    fn test_target_is_first_shared_key() {
        let plan = check(
            ScenarioKind::LostUpdate,
            TxnParams::new(1, [key("C"), key("A")]),
            TxnParams::new(1, [key("A"), key("C")]),
        )
        .unwrap();
        assert_eq!(plan.target, key("C"));
    }

    #[test]
    fn test_empty_and_disjoint_keys_rejected() {
        let empty = check(
            ScenarioKind::LostUpdate,
            TxnParams::new(1, Vec::<RecordKey>::new()),
            TxnParams::new(1, [key("A")]),
        );
        assert!(matches!(empty, Err(Error::InvalidParameters(_))));

        let disjoint = check(
            ScenarioKind::DirtyRead,
            TxnParams::new(1, [key("A")]),
            TxnParams::new(1, [key("B")]),
        );
        assert!(matches!(disjoint, Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_unseeded_key_rejected() {
        let err = check(
            ScenarioKind::NonRepeatableRead,
            TxnParams::new(1, [key("Z")]),
            TxnParams::new(1, [key("Z")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("accounts:Z"));
    }

    #[test]
    fn test_phantom_insert_rules() {
        let seeded = check(
            ScenarioKind::PhantomRead,
            TxnParams::new(120, [key("A")]),
            TxnParams::new(0, [key("A")]),
        );
        assert!(seeded.is_err());

        let outside_range = check(
            ScenarioKind::PhantomRead,
            TxnParams::new(5, [key("D")]),
            TxnParams::new(0, [key("D")]),
        );
        assert!(outside_range.is_err());

        let plan = check(
            ScenarioKind::PhantomRead,
            TxnParams::new(120, [key("D")]),
            TxnParams::new(0, [key("D")]),
        )
        .unwrap();
        assert_eq!(plan.target, key("D"));
        assert!(plan.predicate.is_some());
    }

    #[test]
    fn test_write_skew_needs_distinct_primaries() {
        let err = check(
            ScenarioKind::WriteSkew,
            TxnParams::new(-1, [key("A"), key("B")]),
            TxnParams::new(-1, [key("A"), key("B")]),
        );
        assert!(err.is_err());

        let plan = check(
            ScenarioKind::WriteSkew,
            TxnParams::new(-1, [key("A"), key("B")]),
            TxnParams::new(-1, [key("B"), key("A")]),
        )
        .unwrap();
        let invariant = plan.invariant.unwrap();
        assert_eq!(invariant.keys, vec![key("A"), key("B")]);
        assert_eq!(invariant.floor, 0);
    }

    #[test]
    fn test_deadlock_needs_opposite_order() {
        let same_order = check(
            ScenarioKind::Deadlock,
            TxnParams::new(1, [key("A"), key("B")]),
            TxnParams::new(1, [key("A"), key("B")]),
        );
        assert!(same_order.is_err());

        let one_key = check(
            ScenarioKind::Deadlock,
            TxnParams::new(1, [key("A")]),
            TxnParams::new(1, [key("A"), key("B")]),
        );
        assert!(one_key.is_err());
    }
}
