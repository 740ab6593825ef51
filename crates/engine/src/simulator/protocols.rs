//! Interleaving protocols
//!
//! Each variant is a pair of straight-line scripts, one per transaction.
//! Rendezvous points force the interleaving that exposes the anomaly; with
//! disabled points the same scripts run back to back, T1 first.
//!
//! A point is named after the step that has completed when both parties
//! pass it. Every point is waited on by both contexts exactly once.

use txnlab_core::{notes, Error, Result, ScenarioKind, StoreError, StoreSession, TxnName};

use super::context::TxnContext;
use super::params::Plan;

const T1_READ: &str = "t1_read";
const T2_READ: &str = "t2_read";
const T1_COMMITTED: &str = "t1_committed";
const T1_WROTE: &str = "t1_wrote";
const T1_DONE: &str = "t1_done";
const T2_SCANNED: &str = "t2_scanned";
const T1_LOCKED: &str = "t1_locked";
const T2_LOCKED: &str = "t2_locked";

/// Rendezvous points of a variant, in protocol order
pub(crate) fn points(kind: ScenarioKind) -> &'static [&'static str] {
    match kind {
        ScenarioKind::LostUpdate | ScenarioKind::WriteSkew => &[T1_READ, T2_READ, T1_COMMITTED],
        ScenarioKind::DirtyRead => &[T1_WROTE, T2_READ, T1_DONE],
        ScenarioKind::NonRepeatableRead => &[T2_READ, T1_COMMITTED],
        ScenarioKind::PhantomRead => &[T2_SCANNED, T1_COMMITTED],
        ScenarioKind::Deadlock => &[T1_LOCKED, T2_LOCKED],
    }
}

/// Run one transaction's script to its terminal event
pub(crate) fn execute<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    match (plan.kind, ctx.name()) {
        (ScenarioKind::LostUpdate, TxnName::T1) => lost_update_t1(ctx, plan),
        (ScenarioKind::LostUpdate, TxnName::T2) => lost_update_t2(ctx, plan),
        (ScenarioKind::DirtyRead, TxnName::T1) => dirty_read_t1(ctx, plan),
        (ScenarioKind::DirtyRead, TxnName::T2) => dirty_read_t2(ctx, plan),
        (ScenarioKind::NonRepeatableRead, TxnName::T1) => non_repeatable_t1(ctx, plan),
        (ScenarioKind::NonRepeatableRead, TxnName::T2) => non_repeatable_t2(ctx, plan),
        (ScenarioKind::PhantomRead, TxnName::T1) => phantom_t1(ctx, plan),
        (ScenarioKind::PhantomRead, TxnName::T2) => phantom_t2(ctx, plan),
        (ScenarioKind::WriteSkew, txn) => write_skew(ctx, plan, txn),
        (ScenarioKind::Deadlock, txn) => deadlock(ctx, plan, txn),
    }
}

// Lost update: both read the same value, T2 writes from its stale read
// after T1 has committed.

fn lost_update_t1<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let key = &plan.target;
    ctx.begin()?;
    let value = ctx.read_existing(key)?;
    ctx.wait(T1_READ)?;
    ctx.wait(T2_READ)?;
    ctx.write(key, value + plan.t1.amount)?;
    ctx.commit()?;
    ctx.wait(T1_COMMITTED)
}

fn lost_update_t2<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let key = &plan.target;
    ctx.wait(T1_READ)?;
    ctx.begin()?;
    let stale = ctx.read_existing(key)?;
    ctx.wait(T2_READ)?;
    ctx.wait(T1_COMMITTED)?;
    ctx.write(key, stale + plan.t2.amount)?;
    ctx.commit()
}

// Dirty read: T2 reads T1's uncommitted write, then T1 rolls back.

fn dirty_read_t1<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let key = &plan.target;
    ctx.begin()?;
    let value = ctx.read_existing(key)?;
    ctx.write(key, value + plan.t1.amount)?;
    ctx.wait(T1_WROTE)?;
    ctx.wait(T2_READ)?;
    ctx.rollback(None)?;
    ctx.wait(T1_DONE)
}

fn dirty_read_t2<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    ctx.wait(T1_WROTE)?;
    ctx.begin()?;
    ctx.read(&plan.target)?;
    ctx.wait(T2_READ)?;
    ctx.wait(T1_DONE)?;
    ctx.commit()
}

// Non-repeatable read: T1 commits an update between T2's two reads.

fn non_repeatable_t1<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let key = &plan.target;
    ctx.wait(T2_READ)?;
    ctx.begin()?;
    let value = ctx.read_existing(key)?;
    ctx.write(key, value + plan.t1.amount)?;
    ctx.commit()?;
    ctx.wait(T1_COMMITTED)
}

fn non_repeatable_t2<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let key = &plan.target;
    ctx.begin()?;
    ctx.read(key)?;
    ctx.wait(T2_READ)?;
    ctx.wait(T1_COMMITTED)?;
    ctx.read(key)?;
    ctx.commit()
}

// Phantom read: T1 commits a matching insert between T2's two scans.

fn phantom_t1<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    ctx.wait(T2_SCANNED)?;
    ctx.begin()?;
    ctx.insert(&plan.target, plan.t1.amount)?;
    ctx.commit()?;
    ctx.wait(T1_COMMITTED)
}

fn phantom_t2<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan) -> Result<()> {
    let predicate = plan
        .predicate
        .as_ref()
        .ok_or_else(|| Error::invalid_state("phantom plan without a predicate"))?;
    ctx.begin()?;
    ctx.read_range(predicate)?;
    ctx.wait(T2_SCANNED)?;
    ctx.wait(T1_COMMITTED)?;
    ctx.read_range(predicate)?;
    ctx.commit()
}

// Write skew: both read every invariant key from their snapshots, each
// checks its own write against what it saw, and writes a different row.

fn write_skew<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan, txn: TxnName) -> Result<()> {
    let invariant = plan
        .invariant
        .as_ref()
        .ok_or_else(|| Error::invalid_state("write skew plan without an invariant"))?;
    let params = plan.params(txn);
    let primary = params
        .primary_key()
        .ok_or_else(|| Error::invalid_state("write skew transaction without a key"))?;

    if txn == TxnName::T2 {
        ctx.wait(T1_READ)?;
    }
    ctx.begin()?;
    let mut seen = Vec::with_capacity(invariant.keys.len());
    let order = params
        .keys
        .iter()
        .chain(invariant.keys.iter().filter(|k| !params.keys.contains(*k)));
    for key in order {
        if invariant.covers(key) {
            seen.push((key.clone(), ctx.read_existing(key)?));
        }
    }
    let current = seen
        .iter()
        .find(|(k, _)| k == primary)
        .map(|(_, v)| *v)
        .ok_or_else(|| Error::invalid_state(format!("{} is outside the invariant", primary)))?;
    let proposed = current + params.amount;

    match txn {
        TxnName::T1 => {
            ctx.wait(T1_READ)?;
            ctx.wait(T2_READ)?;
        }
        TxnName::T2 => {
            ctx.wait(T2_READ)?;
            ctx.wait(T1_COMMITTED)?;
        }
    }

    let safe = invariant.holds(|key| {
        if key == primary {
            Some(proposed)
        } else {
            seen.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
        }
    });
    if safe == Some(true) {
        ctx.write(primary, proposed)?;
        ctx.commit()?;
    } else {
        ctx.rollback(Some(notes::INVARIANT_GUARD))?;
    }

    if txn == TxnName::T1 {
        ctx.wait(T1_COMMITTED)?;
    }
    Ok(())
}

// Deadlock: each locks its first key, both wait until the other holds its
// lock, then each requests the other's key. The store breaks the cycle.

fn deadlock<S: StoreSession>(ctx: &mut TxnContext<'_, S>, plan: &Plan, txn: TxnName) -> Result<()> {
    let keys = &plan.params(txn).keys;
    let (first, second) = match keys.as_slice() {
        [first, second, ..] => (first, second),
        _ => return Err(Error::invalid_state("deadlock transaction needs two keys")),
    };

    ctx.begin()?;
    let value = ctx.lock_for_update(first)?;
    ctx.wait(T1_LOCKED)?;
    ctx.wait(T2_LOCKED)?;

    match ctx.lock_for_update(second) {
        Ok(_) => {}
        Err(Error::StoreConflict { source, .. }) if is_victim(&source) => {
            ctx.rollback(Some(notes::DEADLOCK_VICTIM))?;
            return Err(Error::DeadlockVictim {
                transaction: txn,
                source,
            });
        }
        Err(e) => return Err(e),
    }
    ctx.write(first, value + plan.params(txn).amount)?;
    ctx.commit()
}

fn is_victim(source: &StoreError) -> bool {
    matches!(source, StoreError::Deadlock(_) | StoreError::LockTimeout { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_are_unique_per_variant() {
        for kind in ScenarioKind::ALL {
            let names = points(kind);
            let mut sorted = names.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), names.len(), "{}", kind);
        }
    }
}
