pub(crate) mod bucket;
pub(crate) mod chain;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{Atomic, Guard, Owned};
use crossbeam_utils::Backoff;
use log::{debug, error, trace};
use roaring::RoaringTreemap;
use zerocopy::IntoBytes;

use crate::group::bucket::BucketTable;
use crate::group::chain::ChainWalk;
use crate::key::accessor::{slot_address, slot_hash};
use crate::key::key_pointer::{
    build_record_image, slot_size, SlotState, FLAG_TOMBSTONE,
    SLOT_FLAGS_OFFSET, SLOT_PREVIOUS_OFFSET,
};
use crate::key::SecondaryKey;
use crate::log::AppendLog;
use crate::predicate::{GroupSpec, Predicate, PredicateSpec};
use crate::stats::{Counters, GroupStats, MutationReport};
use crate::tracker::SlotBuffer;
use crate::types::errors::{FatalResult, IndexError};
use crate::types::query_options::TerminationFn;
use crate::types::RecordId;

//------------ GroupCore -----------------------------------------------------

// The key-type-independent engine of one group: the bucket table, the
// append log and the mutation protocol over packed composite records.
// Everything here works on key bytes; only predicate evaluation above
// knows the key type.

pub(crate) struct GroupCore {
    pub(crate) id: u32,
    pub(crate) spec: GroupSpec,
    pub(crate) key_size: usize,
    pub(crate) names: Vec<Arc<str>>,
    pub(crate) table: BucketTable,
    pub(crate) log: AppendLog,
    // Record ids removed by a full delete. A deleted id is dead for every
    // predicate of the group, so walks can skip its entries without a
    // provider read. Replaced wholesale under the epoch guard.
    retired: Atomic<RoaringTreemap>,
    pub(crate) counters: Counters,
}

impl GroupCore {
    pub(crate) fn new(
        id: u32,
        spec: GroupSpec,
        key_size: usize,
        names: Vec<Arc<str>>,
    ) -> Self {
        let table = BucketTable::new(spec.hash_table_size);
        let log = AppendLog::new(
            spec.log_page_size,
            spec.log_segment_size,
            spec.log_memory_size,
        );
        Self {
            id,
            spec,
            key_size,
            names,
            table,
            log,
            retired: Atomic::null(),
            counters: Counters::default(),
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.names.len()
    }

    fn slot_size(&self) -> usize {
        slot_size(self.key_size)
    }

    // Appends one composite record and links every non-null slot into its
    // bucket chain. The record becomes visible slot by slot; each bucket
    // update is independently linearizable.
    fn append_and_link(
        &self,
        id: RecordId,
        slots: &[SlotState<'_>],
        _guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        let mut report = MutationReport::default();
        if !slots.iter().any(SlotState::is_linked) {
            return Ok(report);
        }

        let mut image = Vec::new();
        build_record_image(id, self.key_size, slots, &mut image);
        let record_addr = self.log.append(&image)?;
        report.records_appended = 1;
        self.counters.inc_records_count();

        debug!(
            "group {}: append record for {} at {}",
            self.id, id, record_addr
        );

        for (ordinal, slot) in slots.iter().enumerate() {
            let Some(key) = slot.key() else { continue };
            let ordinal = ordinal as u8;
            let tombstone = matches!(slot, SlotState::Tombstone(_));
            let slot_addr =
                slot_address(record_addr, ordinal, self.key_size);

            // The slot is still unreachable: clear its tentative flag,
            // then publish it through the bucket head. A lost CAS means
            // someone else got in front of us; re-read the head, re-link
            // and retry so the entries that won stay on the chain.
            self.log.write_u8(
                slot_addr + SLOT_FLAGS_OFFSET as u64,
                if tombstone { FLAG_TOMBSTONE } else { 0 },
            );

            let bucket =
                self.table.bucket_index(slot_hash(ordinal, key));
            let backoff = Backoff::new();
            let mut expected = self.table.head(bucket);
            loop {
                self.log.write_u64(
                    slot_addr + SLOT_PREVIOUS_OFFSET as u64,
                    expected,
                );
                match self.table.try_install(bucket, expected, slot_addr) {
                    Ok(()) => break,
                    Err(actual) => {
                        trace!(
                            "group {}: lost head CAS on bucket {}",
                            self.id,
                            bucket
                        );
                        expected = actual;
                        report.cas_count += 1;
                        backoff.spin();
                    }
                }
            }

            if tombstone {
                report.tombstones_linked += 1;
                self.counters.inc_tombstones_count();
            } else {
                report.slots_linked += 1;
                self.counters.inc_slots_count();
            }
        }

        self.counters.add_cas_retries(report.cas_count);
        Ok(report)
    }

    // The update protocol over evaluated key buffers. An absent before
    // buffer (never evaluated, or the group was registered after the
    // tracker was created) reads as all-null and turns the update into a
    // plain insert of the after keys.
    pub(crate) fn update(
        &self,
        before: &SlotBuffer,
        before_id: RecordId,
        after: &SlotBuffer,
        after_id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        let n = self.slot_count();
        let mut live: Vec<Option<&[u8]>> = Vec::with_capacity(n);
        let mut tomb: Vec<Option<&[u8]>> = Vec::with_capacity(n);
        for ordinal in 0..n {
            let b = before.key(ordinal);
            let a = after.key(ordinal);
            live.push(a);
            tomb.push(match (b, a) {
                (Some(bk), None) => Some(bk),
                (Some(bk), Some(ak)) if bk != ak => Some(bk),
                _ => None,
            });
        }

        let any_live = live.iter().any(Option::is_some);
        let any_tomb = tomb.iter().any(Option::is_some);
        if !any_live && !any_tomb {
            return Ok(MutationReport::default());
        }

        // One composite record can carry both the new live slots and the
        // tombstones as long as they do not compete for a slot position
        // and agree on the record id. A key change on one ordinal, or a
        // read-copy-update that produced a fresh id, needs two records.
        let overlap = (0..n)
            .any(|o| live[o].is_some() && tomb[o].is_some());
        let single = !any_tomb
            || !any_live
            || (before_id == after_id && !overlap);

        if single {
            let id = if any_live { after_id } else { before_id };
            let slots: Vec<SlotState<'_>> = (0..n)
                .map(|o| match (live[o], tomb[o]) {
                    (Some(k), _) => SlotState::Live(k),
                    (None, Some(k)) => SlotState::Tombstone(k),
                    (None, None) => SlotState::Null,
                })
                .collect();
            self.append_and_link(id, &slots, guard)
        } else {
            // Live entries first: between the two appends a concurrent
            // query sees the record under its old keys, its new keys or
            // both, but never under neither.
            let live_slots: Vec<SlotState<'_>> = live
                .iter()
                .map(|k| k.map_or(SlotState::Null, SlotState::Live))
                .collect();
            let mut report =
                self.append_and_link(after_id, &live_slots, guard)?;
            let tomb_slots: Vec<SlotState<'_>> = tomb
                .iter()
                .map(|k| k.map_or(SlotState::Null, SlotState::Tombstone))
                .collect();
            report += self.append_and_link(before_id, &tomb_slots, guard)?;
            Ok(report)
        }
    }

    pub(crate) fn delete(
        &self,
        before: &SlotBuffer,
        id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        let n = self.slot_count();
        let slots: Vec<SlotState<'_>> = (0..n)
            .map(|o| {
                before
                    .key(o)
                    .map_or(SlotState::Null, SlotState::Tombstone)
            })
            .collect();
        if !slots.iter().any(SlotState::is_linked) {
            // No predicate held this record; nothing to withdraw.
            return Ok(MutationReport::default());
        }
        let report = self.append_and_link(id, &slots, guard)?;
        self.retire(id, guard);
        Ok(report)
    }

    // Adds `id` to the retired bitmap by cloning and swapping it. The old
    // bitmap is reclaimed once all current epoch guards are gone.
    fn retire(&self, id: RecordId, guard: &Guard) {
        let backoff = Backoff::new();
        loop {
            let shared = self.retired.load(Ordering::Acquire, guard);
            let mut next = unsafe { shared.as_ref() }
                .cloned()
                .unwrap_or_default();
            next.insert(id.as_u64());
            match self.retired.compare_exchange(
                shared,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    if !shared.is_null() {
                        unsafe { guard.defer_destroy(shared) };
                    }
                    return;
                }
                Err(_) => backoff.spin(),
            }
        }
    }

    pub(crate) fn retired_snapshot<'g>(
        &'g self,
        guard: &'g Guard,
    ) -> Option<&'g RoaringTreemap> {
        unsafe { self.retired.load(Ordering::Acquire, guard).as_ref() }
    }

    // Recovery only; runs before the group is shared.
    pub(crate) fn restore_retired(&self, map: RoaringTreemap) {
        self.retired.store(Owned::new(map), Ordering::Release);
    }

    pub(crate) fn open_walk<'g>(
        &'g self,
        ordinal: u8,
        key: &[u8],
        terminate: Option<TerminationFn>,
        guard: &'g Guard,
    ) -> FatalResult<ChainWalk<'g>> {
        self.counters.inc_walks_count();
        let head = self.table.head(
            self.table.bucket_index(slot_hash(ordinal, key)),
        );
        ChainWalk::new(
            &self.log,
            self.retired_snapshot(guard),
            self.slot_size(),
            ordinal,
            key,
            head,
            terminate,
        )
    }

    pub(crate) fn stats(&self) -> GroupStats {
        GroupStats {
            group_id: self.id,
            log_tail: self.log.tail(),
            buckets: self.table.len(),
            records: self.counters.records_count(),
            tombstones: self.counters.tombstones_count(),
        }
    }
}

impl Drop for GroupCore {
    fn drop(&mut self) {
        // Teardown: `&mut self` proves no guards still see the bitmap.
        unsafe {
            let shared = self
                .retired
                .load(Ordering::Relaxed, crossbeam_epoch::unprotected());
            if !shared.is_null() {
                drop(shared.into_owned());
            }
        }
    }
}

impl std::fmt::Debug for GroupCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCore")
            .field("id", &self.id)
            .field("key_size", &self.key_size)
            .field("predicates", &self.names)
            .finish()
    }
}

//------------ PredicateGroup ------------------------------------------------

// One registered group: the byte-level core plus the typed predicate
// vector that feeds it.
pub(crate) struct PredicateGroup<D, K: SecondaryKey> {
    pub(crate) core: GroupCore,
    predicates: Vec<Predicate<D, K>>,
}

impl<D, K: SecondaryKey> PredicateGroup<D, K> {
    pub(crate) fn new(
        id: u32,
        spec: GroupSpec,
        specs: Vec<PredicateSpec<D, K>>,
    ) -> Self {
        let predicates: Vec<Predicate<D, K>> = specs
            .into_iter()
            .enumerate()
            .map(|(ordinal, spec)| Predicate {
                name: spec.name.into(),
                ordinal: ordinal as u8,
                f: spec.f,
            })
            .collect();
        let names =
            predicates.iter().map(|p| p.name.clone()).collect();
        Self {
            core: GroupCore::new(id, spec, size_of::<K>(), names),
            predicates,
        }
    }

    // Evaluates every predicate before anything is appended, so a failing
    // predicate aborts the mutation with the group untouched. Predicates
    // are contractually total; a panic is reported as a failure of the
    // whole mutation.
    fn eval(&self, data: &D) -> Result<Vec<Option<K>>, IndexError> {
        let mut keys = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            match catch_unwind(AssertUnwindSafe(|| (predicate.f)(data))) {
                Ok(key) => keys.push(key),
                Err(_) => {
                    error!(
                        "group {}: predicate {} (ordinal {}) panicked; \
                        mutation aborted",
                        self.core.id, predicate.name, predicate.ordinal
                    );
                    return Err(IndexError::PredicateFailed);
                }
            }
        }
        Ok(keys)
    }
}

//------------ GroupOps ------------------------------------------------------

// The type-erased face of a group. The index stores every group behind
// this trait; keys cross the boundary as byte slices, which is exact for
// memcpy-safe key types.
pub(crate) trait GroupOps<D>: Send + Sync {
    fn key_size(&self) -> usize;

    fn insert(
        &self,
        data: &D,
        id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError>;

    fn eval_into(
        &self,
        data: &D,
        buf: &mut SlotBuffer,
    ) -> Result<(), IndexError>;

    fn update(
        &self,
        before: &SlotBuffer,
        before_id: RecordId,
        after: &SlotBuffer,
        after_id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError>;

    fn delete(
        &self,
        before: &SlotBuffer,
        id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError>;

    fn open_walk<'g>(
        &'g self,
        ordinal: u8,
        key: &[u8],
        terminate: Option<TerminationFn>,
        guard: &'g Guard,
    ) -> FatalResult<ChainWalk<'g>>;

    fn stats(&self) -> GroupStats;
    fn counters(&self) -> &Counters;

    fn checkpoint(&self) -> Result<(), IndexError>;
    fn flush(&self) -> Result<(), IndexError>;
    fn recover(&self) -> Result<(), IndexError>;
}

impl<D: Send + Sync, K: SecondaryKey> GroupOps<D>
    for PredicateGroup<D, K>
{
    fn key_size(&self) -> usize {
        self.core.key_size
    }

    fn insert(
        &self,
        data: &D,
        id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        let keys = self.eval(data)?;
        let slots: Vec<SlotState<'_>> = keys
            .iter()
            .map(|k| {
                k.as_ref()
                    .map_or(SlotState::Null, |k| SlotState::Live(k.as_bytes()))
            })
            .collect();
        // A record every predicate skipped appends nothing, not even an
        // all-null composite.
        self.core.append_and_link(id, &slots, guard)
    }

    fn eval_into(
        &self,
        data: &D,
        buf: &mut SlotBuffer,
    ) -> Result<(), IndexError> {
        let keys = self.eval(data)?;
        buf.reset(self.core.key_size, keys.len());
        for (ordinal, key) in keys.iter().enumerate() {
            if let Some(key) = key {
                buf.set(ordinal, key.as_bytes());
            }
        }
        Ok(())
    }

    fn update(
        &self,
        before: &SlotBuffer,
        before_id: RecordId,
        after: &SlotBuffer,
        after_id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        self.core.update(before, before_id, after, after_id, guard)
    }

    fn delete(
        &self,
        before: &SlotBuffer,
        id: RecordId,
        guard: &Guard,
    ) -> Result<MutationReport, IndexError> {
        self.core.delete(before, id, guard)
    }

    fn open_walk<'g>(
        &'g self,
        ordinal: u8,
        key: &[u8],
        terminate: Option<TerminationFn>,
        guard: &'g Guard,
    ) -> FatalResult<ChainWalk<'g>> {
        self.core.open_walk(ordinal, key, terminate, guard)
    }

    fn stats(&self) -> GroupStats {
        self.core.stats()
    }

    fn counters(&self) -> &Counters {
        &self.core.counters
    }

    fn checkpoint(&self) -> Result<(), IndexError> {
        crate::persist::checkpoint_group(&self.core)
    }

    fn flush(&self) -> Result<(), IndexError> {
        crate::persist::flush_group(&self.core)
    }

    fn recover(&self) -> Result<(), IndexError> {
        crate::persist::recover_group(&self.core)
    }
}
