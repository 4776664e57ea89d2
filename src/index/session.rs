use crossbeam_epoch::Guard;

use crate::index::SubsetHashIndex;
use crate::key::SecondaryKey;
use crate::liveness::Liveness;
use crate::predicate::PredicateHandle;
use crate::query::{BoolMatrix, BoolOp, MatchFn, Operand, QueryIter};
use crate::stats::MutationReport;
use crate::tracker::ChangeTracker;
use crate::types::errors::IndexError;
use crate::types::query_options::QueryOptions;
use crate::types::RecordId;

//------------ IndexSession --------------------------------------------------

/// A per-thread handle over one index.
///
/// A session is the intended way to drive mutations: it pools one
/// [ChangeTracker] so the update protocol's buffers are reused across
/// mutations, and every operation runs under an epoch pin for its whole
/// duration. Sessions are cheap; create one per thread and keep it.
///
/// Queries take an explicit [Guard](crate::Guard) (`let guard =
/// &subset_store::epoch::pin();`) so the caller controls how long the
/// epoch stays pinned; one guard can span several queries for a
/// time-consistent view.
pub struct IndexSession<'i, D> {
    index: &'i SubsetHashIndex<D>,
    tracker: ChangeTracker<D>,
}

impl<'i, D: Send + Sync + 'static> IndexSession<'i, D> {
    pub(crate) fn new(index: &'i SubsetHashIndex<D>) -> Self {
        Self {
            index,
            tracker: ChangeTracker::new(),
        }
    }

    pub fn index(&self) -> &'i SubsetHashIndex<D> {
        self.index
    }

    pub fn tracker(&self) -> &ChangeTracker<D> {
        &self.tracker
    }

    //--- mutations

    /// Indexes a freshly inserted provider record.
    pub fn insert(
        &mut self,
        data: &D,
        id: RecordId,
    ) -> Result<MutationReport, IndexError> {
        self.index.on_insert(data, id)
    }

    /// Captures the pre-image of an update. See [set_before_data](
    /// SubsetHashIndex::set_before_data) for the `execute_now` contract.
    pub fn set_before_data(
        &mut self,
        data: &D,
        id: RecordId,
        execute_now: bool,
    ) -> Result<(), IndexError>
    where
        D: Clone,
    {
        self.index
            .set_before_data(&mut self.tracker, data, id, execute_now)
    }

    /// Records the post-image of an update.
    pub fn set_after_data(&mut self, data: &D, id: RecordId)
    where
        D: Clone,
    {
        self.index.set_after_data(&mut self.tracker, data, id);
    }

    /// Applies the staged update and resets the pooled tracker.
    pub fn apply_update(&mut self) -> Result<MutationReport, IndexError> {
        self.index.on_update(&mut self.tracker)
    }

    /// Withdraws a deleted provider record from every group.
    pub fn delete(
        &mut self,
        data: &D,
        id: RecordId,
    ) -> Result<MutationReport, IndexError> {
        self.index.on_delete(data, id)
    }

    //--- queries

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
        self.index.query(spec, match_fn, live, opts, guard)
    }

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
        self.index.query_single(handle, key, live, opts, guard)
    }

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
        self.index.query2(h1, k1, op, h2, k2, live, opts, guard)
    }
}

impl<D> std::fmt::Debug for IndexSession<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSession")
            .field("tracker", &self.tracker)
            .finish()
    }
}
