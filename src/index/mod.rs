pub mod session;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_epoch::{self as epoch, Guard};
use log::{debug, info};
use rand::prelude::*;

use crate::group::{GroupOps, PredicateGroup};
use crate::index::session::IndexSession;
use crate::key::SecondaryKey;
use crate::liveness::Liveness;
use crate::predicate::{GroupSpec, PredicateHandle, PredicateSpec};
use crate::query::iterators::{MergedWalk, PairState};
use crate::query::{BoolMatrix, BoolOp, MatchFn, Operand, QueryIter};
use crate::stats::{Counters, GroupStats, MutationReport};
use crate::tracker::{ChangeTracker, SlotBuffer, UpdateOp};
use crate::types::errors::IndexError;
use crate::types::query_options::QueryOptions;
use crate::types::RecordId;
use crate::log::OnceBoxSlice;

/// The fixed group capacity of one index instance.
pub const MAX_GROUPS: usize = 256;

//------------ SubsetHashIndex -----------------------------------------------

/// The manager of a set of secondary-index groups over one provider
/// store.
///
/// The index owns its groups, routes provider mutations to them, hands
/// out per-thread [sessions](IndexSession) and orchestrates
/// checkpointing. Groups are registered once and live until the index is
/// dropped; the registration name table is the only globally locked
/// state, and its mutex is taken only at registration, lookup and
/// recovery.
///
/// Every index instance draws a random instance token; predicate handles
/// carry it, so a handle from another instance (or another incarnation
/// of this process) is rejected instead of silently querying the wrong
/// group.
pub struct SubsetHashIndex<D> {
    instance: u64,
    groups: OnceBoxSlice<Box<dyn GroupOps<D>>>,
    group_count: AtomicUsize,
    names: Mutex<HashMap<String, PredicateHandle>>,
}

impl<D: Send + Sync + 'static> SubsetHashIndex<D> {
    pub fn new() -> Self {
        Self {
            instance: rand::rng().random(),
            groups: OnceBoxSlice::new(MAX_GROUPS),
            group_count: AtomicUsize::new(0),
            names: Mutex::new(HashMap::new()),
        }
    }

    /// A per-thread session over this index.
    pub fn session(&self) -> IndexSession<'_, D> {
        IndexSession::new(self)
    }

    //--- registration

    /// Registers one group: its geometry plus up to 255 predicates over
    /// one secondary-key type.
    ///
    /// Returns the predicate handles in input order. Nothing is
    /// registered if any check fails: duplicate predicate name anywhere
    /// in the index, too many predicates, oversized key type, bad
    /// geometry, or unsupported log settings.
    pub fn register_group<K: SecondaryKey>(
        &self,
        spec: GroupSpec,
        predicates: Vec<PredicateSpec<D, K>>,
    ) -> Result<Vec<PredicateHandle>, IndexError> {
        spec.validate(size_of::<K>(), predicates.len())?;

        #[allow(clippy::unwrap_used)]
        let mut names = self.names.lock().unwrap();

        let group_id = self.group_count.load(Ordering::Acquire);
        if group_id >= MAX_GROUPS {
            return Err(IndexError::TooManyGroups);
        }

        // All-or-nothing: check every name before touching the table.
        {
            let mut seen = HashSet::new();
            for p in &predicates {
                if names.contains_key(p.name()) || !seen.insert(p.name())
                {
                    return Err(IndexError::DuplicatePredicateName);
                }
            }
        }

        let handles: Vec<PredicateHandle> = predicates
            .iter()
            .enumerate()
            .map(|(ordinal, p)| PredicateHandle {
                instance: self.instance,
                group: group_id as u32,
                ordinal: ordinal as u8,
                name: p.name().into(),
            })
            .collect();

        info!(
            "index: register group {} with {} predicates",
            group_id,
            predicates.len()
        );
        self.groups.get_or_init(group_id, || {
            Box::new(PredicateGroup::new(group_id as u32, spec, predicates))
        });
        self.group_count.store(group_id + 1, Ordering::Release);

        for handle in &handles {
            names.insert(handle.name().to_string(), handle.clone());
        }
        Ok(handles)
    }

    /// Looks a predicate up by its globally unique name.
    pub fn predicate(&self, name: &str) -> Option<PredicateHandle> {
        #[allow(clippy::unwrap_used)]
        let names = self.names.lock().unwrap();
        names.get(name).cloned()
    }

    pub fn group_count(&self) -> usize {
        self.group_count.load(Ordering::Acquire)
    }

    fn group(&self, id: u32) -> Result<&dyn GroupOps<D>, IndexError> {
        if (id as usize) < self.group_count() {
            self.groups
                .get(id as usize)
                .map(|g| &**g)
                .ok_or(IndexError::InternalInvariantViolation)
        } else {
            Err(IndexError::ForeignPredicateHandle)
        }
    }

    fn check_handle(
        &self,
        handle: &PredicateHandle,
    ) -> Result<&dyn GroupOps<D>, IndexError> {
        if handle.instance != self.instance {
            return Err(IndexError::ForeignPredicateHandle);
        }
        self.group(handle.group)
    }

    //--- mutation hooks
    //
    // The provider (or the IndexedKv wrapper) calls these around its own
    // mutations. All of them run inside an epoch pin and are atomic per
    // group per bucket; a predicate failure aborts before anything is
    // appended anywhere.

    /// Hook for a committed provider insert.
    pub fn on_insert(
        &self,
        data: &D,
        id: RecordId,
    ) -> Result<MutationReport, IndexError> {
        let guard = &epoch::pin();
        let mut report = MutationReport::default();
        for group_id in 0..self.group_count() {
            report += self
                .group(group_id as u32)?
                .insert(data, id, guard)?;
        }
        debug!("index: insert {}: {}", id, report);
        Ok(report)
    }

    /// First phase of an update or delete: capture the pre-image.
    ///
    /// With `execute_now` the pre-image keys are evaluated immediately
    /// and `data` is not retained; this is mandatory when the provider
    /// is about to mutate the record in place. Without it, evaluation is
    /// deferred to [on_update](Self::on_update) and a copy of `data` is
    /// kept on the tracker.
    pub fn set_before_data(
        &self,
        tracker: &mut ChangeTracker<D>,
        data: &D,
        id: RecordId,
        execute_now: bool,
    ) -> Result<(), IndexError>
    where
        D: Clone,
    {
        tracker.reset();
        tracker.before_id = Some(id);
        if execute_now {
            let count = self.group_count();
            tracker.widen(count);
            for group_id in 0..count {
                let group = self.group(group_id as u32)?;
                group.eval_into(
                    data,
                    &mut tracker.groups[group_id].before,
                )?;
            }
            tracker.has_before_keys = true;
        } else {
            tracker.before = Some(data.clone());
        }
        Ok(())
    }

    /// Second phase: the provider produced the new record.
    pub fn set_after_data(
        &self,
        tracker: &mut ChangeTracker<D>,
        data: &D,
        id: RecordId,
    ) where
        D: Clone,
    {
        tracker.after = Some(data.clone());
        tracker.after_id = Some(id);
    }

    /// Applies the tracked update to every group.
    ///
    /// Requires the after-image; a missing before-image degrades to an
    /// insert through the update path (all pre-keys null). All predicate
    /// evaluation happens before any group is touched.
    pub fn on_update(
        &self,
        tracker: &mut ChangeTracker<D>,
    ) -> Result<MutationReport, IndexError> {
        let after_id = tracker.after_id.ok_or(IndexError::TrackerNotReady)?;
        let after = tracker.after.take().ok_or(IndexError::TrackerNotReady)?;
        let before_id = tracker.before_id.unwrap_or(after_id);
        tracker.op = Some(match tracker.before_id {
            None => UpdateOp::Insert,
            Some(b) if b == after_id => UpdateOp::InPlaceUpdate,
            Some(_) => UpdateOp::ReadCopyUpdate,
        });

        let count = self.group_count();
        tracker.widen(count);
        let before = tracker.before.take();

        for group_id in 0..count {
            let group = self.group(group_id as u32)?;
            let slots = &mut tracker.groups[group_id];
            if !tracker.has_before_keys {
                if let Some(before) = &before {
                    group.eval_into(before, &mut slots.before)?;
                }
            }
            group.eval_into(&after, &mut slots.after)?;
        }

        let guard = &epoch::pin();
        let mut report = MutationReport::default();
        for group_id in 0..count {
            let group = self.group(group_id as u32)?;
            let slots = &tracker.groups[group_id];
            report += group.update(
                &slots.before,
                before_id,
                &slots.after,
                after_id,
                guard,
            )?;
        }

        debug!(
            "index: {} {} -> {}: {}",
            tracker.op.map(|op| op.to_string()).unwrap_or_default(),
            before_id,
            after_id,
            report
        );
        tracker.reset();
        Ok(report)
    }

    /// Hook for a provider delete, with the outgoing record's data.
    pub fn on_delete(
        &self,
        data: &D,
        id: RecordId,
    ) -> Result<MutationReport, IndexError> {
        let count = self.group_count();
        let mut buffers: Vec<SlotBuffer> = Vec::new();
        buffers.resize_with(count, SlotBuffer::default);
        for group_id in 0..count {
            self.group(group_id as u32)?
                .eval_into(data, &mut buffers[group_id])?;
        }

        let guard = &epoch::pin();
        let mut report = MutationReport::default();
        for group_id in 0..count {
            report += self.group(group_id as u32)?.delete(
                &buffers[group_id],
                id,
                guard,
            )?;
        }
        debug!("index: delete {}: {}", id, report);
        Ok(report)
    }

    //--- queries

    /// Builds one (predicate, key-set) operand, validating that the
    /// handle belongs to this index and that the key type is the
    /// group's.
    pub fn operand<K: SecondaryKey>(
        &self,
        handle: &PredicateHandle,
        keys: &[K],
    ) -> Result<Operand, IndexError> {
        let group = self.check_handle(handle)?;
        if group.key_size() != size_of::<K>() {
            return Err(IndexError::ForeignPredicateHandle);
        }
        Ok(Operand::new(
            self.instance,
            handle.group,
            handle.ordinal,
            keys,
        ))
    }

    /// The uniform query shape: operand groups plus an arbitrary
    /// combinator over the per-step [BoolMatrix].
    ///
    /// The iterator yields matching record ids in strictly decreasing
    /// order, liveness-checked through `live`, until exhaustion,
    /// cancellation or the deadline. The guard pins the query's epoch;
    /// reuse one guard across queries for a time-consistent view.
    pub fn query<'g, L, F>(
        &'g self,
        spec: Vec<Vec<Operand>>,
        match_fn: F,
        live: L,
        opts: QueryOptions,
        guard: &'g Guard,
    ) -> Result<QueryIter<'g, L, F>, IndexError>
    where
        L: Liveness,
        F: Fn(&BoolMatrix) -> bool,
    {
        let row_widths: Vec<usize> =
            spec.iter().map(|row| row.len()).collect();
        let mut pairs = Vec::new();
        for (row, operands) in spec.iter().enumerate() {
            for (col, operand) in operands.iter().enumerate() {
                if operand.instance != self.instance {
                    return Err(IndexError::ForeignPredicateHandle);
                }
                let group = self.group(operand.group)?;
                let mut walks = Vec::with_capacity(operand.keys.len());
                for key in &operand.keys {
                    walks.push(group.open_walk(
                        operand.ordinal,
                        key,
                        opts.terminate.clone(),
                        guard,
                    )?);
                }
                pairs.push(PairState {
                    row,
                    col,
                    walk: MergedWalk::new(walks),
                });
            }
        }
        Ok(QueryIter::new(pairs, &row_widths, match_fn, live, opts))
    }

    /// Convenience shape: all record ids matching one (predicate, key)
    /// pair.
    pub fn query_single<'g, K, L>(
        &'g self,
        handle: &PredicateHandle,
        key: K,
        live: L,
        opts: QueryOptions,
        guard: &'g Guard,
    ) -> Result<QueryIter<'g, L, MatchFn>, IndexError>
    where
        K: SecondaryKey,
        L: Liveness,
    {
        let operand = self.operand(handle, &[key])?;
        self.query(
            vec![vec![operand]],
            BoolOp::Or.matcher(),
            live,
            opts,
            guard,
        )
    }

    /// Convenience shape: two (predicate, key) pairs under `And`/`Or`.
    /// The key types may differ; the predicates may live in different
    /// groups.
    pub fn query2<'g, K1, K2, L>(
        &'g self,
        h1: &PredicateHandle,
        k1: K1,
        op: BoolOp,
        h2: &PredicateHandle,
        k2: K2,
        live: L,
        opts: QueryOptions,
        guard: &'g Guard,
    ) -> Result<QueryIter<'g, L, MatchFn>, IndexError>
    where
        K1: SecondaryKey,
        K2: SecondaryKey,
        L: Liveness,
    {
        let o1 = self.operand(h1, &[k1])?;
        let o2 = self.operand(h2, &[k2])?;
        self.query(vec![vec![o1], vec![o2]], op.matcher(), live, opts, guard)
    }

    /// Convenience shape: three (predicate, key) pairs under a single
    /// `And`/`Or`.
    pub fn query3<'g, K1, K2, K3, L>(
        &'g self,
        h1: &PredicateHandle,
        k1: K1,
        h2: &PredicateHandle,
        k2: K2,
        h3: &PredicateHandle,
        k3: K3,
        op: BoolOp,
        live: L,
        opts: QueryOptions,
        guard: &'g Guard,
    ) -> Result<QueryIter<'g, L, MatchFn>, IndexError>
    where
        K1: SecondaryKey,
        K2: SecondaryKey,
        K3: SecondaryKey,
        L: Liveness,
    {
        let o1 = self.operand(h1, &[k1])?;
        let o2 = self.operand(h2, &[k2])?;
        let o3 = self.operand(h3, &[k3])?;
        self.query(
            vec![vec![o1], vec![o2], vec![o3]],
            op.matcher(),
            live,
            opts,
            guard,
        )
    }

    //--- persistence

    /// Checkpoints every group into its own checkpoint directory.
    ///
    /// Groups are checkpointed independently; the first failure stops
    /// the sweep and is returned, leaving already-written group
    /// checkpoints valid and the remaining groups on their previous
    /// checkpoint. There is no cross-group atomicity.
    pub fn checkpoint(&self) -> Result<(), IndexError> {
        for group_id in 0..self.group_count() {
            self.group(group_id as u32)?.checkpoint()?;
        }
        info!("index: checkpoint complete");
        Ok(())
    }

    /// Refreshes the log image of every group's checkpoint without
    /// rewriting the hash tables. Requires a prior full checkpoint.
    pub fn flush(&self) -> Result<(), IndexError> {
        for group_id in 0..self.group_count() {
            self.group(group_id as u32)?.flush()?;
        }
        Ok(())
    }

    /// Re-attaches every group to its checkpoint.
    ///
    /// The caller must have re-registered all predicates by name, in
    /// the same groups and ordinals as when the checkpoint was taken;
    /// the manifests are verified against the registered groups.
    /// Registering a different function for a known name is fine,
    /// rebinding a name to a different ordinal is not.
    pub fn recover(&self) -> Result<(), IndexError> {
        for group_id in 0..self.group_count() {
            self.group(group_id as u32)?.recover()?;
        }
        info!("index: recovered {} groups", self.group_count());
        Ok(())
    }

    /// The running counters of the group behind a predicate handle.
    pub fn group_counters(
        &self,
        handle: &PredicateHandle,
    ) -> Result<&Counters, IndexError> {
        Ok(self.check_handle(handle)?.counters())
    }

    /// Storage snapshots of every group, in group order.
    pub fn stats(&self) -> Vec<GroupStats> {
        (0..self.group_count())
            .filter_map(|id| self.groups.get(id))
            .map(|g| g.stats())
            .collect()
    }
}

impl<D: Send + Sync + 'static> Default for SubsetHashIndex<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> std::fmt::Debug for SubsetHashIndex<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsetHashIndex")
            .field("instance", &self.instance)
            .field("groups", &self.group_count.load(Ordering::Relaxed))
            .finish()
    }
}
