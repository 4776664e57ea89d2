use crossbeam_epoch as epoch;
use log::trace;

use crate::index::SubsetHashIndex;
use crate::key::SecondaryKey;
use crate::liveness::{Liveness, LivenessFilter, Provider};
use crate::predicate::{GroupSpec, PredicateHandle, PredicateSpec};
use crate::query::{BoolMatrix, BoolOp, Operand, QueryIter};
use crate::types::errors::IndexError;
use crate::types::query_options::QueryOptions;
use crate::types::RecordId;

//------------ IndexedKv -----------------------------------------------------

/// A provider store with its subset hash index wired in.
///
/// The wrapper intercepts upsert, read-modify-write and delete, runs the
/// provider mutation and drives the index's before/after protocol around
/// it, so the caller never talks to the hooks directly. Its query
/// methods resolve matching record ids through the
/// [LivenessFilter] and materialize the provider records.
///
/// The hooks on [SubsetHashIndex] stay public for providers that invoke
/// the index themselves.
pub struct IndexedKv<P: Provider> {
    provider: P,
    index: SubsetHashIndex<P::Data>,
}

impl<P: Provider> IndexedKv<P>
where
    P::Data: 'static,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            index: SubsetHashIndex::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn index(&self) -> &SubsetHashIndex<P::Data> {
        &self.index
    }

    pub fn register_group<K: SecondaryKey>(
        &self,
        spec: GroupSpec,
        predicates: Vec<PredicateSpec<P::Data, K>>,
    ) -> Result<Vec<PredicateHandle>, IndexError> {
        self.index.register_group(spec, predicates)
    }

    //--- mutations

    /// Inserts or updates `key`, indexing the change.
    ///
    /// For an existing key the pre-image is captured eagerly before the
    /// provider writes, then the provider gets a chance to update in
    /// place (keeping the record id) and otherwise appends a new
    /// version.
    pub fn upsert(
        &self,
        key: P::Key,
        data: P::Data,
    ) -> Result<RecordId, IndexError> {
        let mut session = self.index.session();
        match self.provider.current_record_id(&key) {
            None => {
                let id = self.provider.write(key, data.clone())?;
                trace!("indexed: insert {}", id);
                session.insert(&data, id)?;
                Ok(id)
            }
            Some(old_id) => {
                let before = self
                    .provider
                    .read(old_id)
                    .ok_or(IndexError::InternalInvariantViolation)?;
                session.set_before_data(&before, old_id, true)?;
                let new_id =
                    match self.provider.write_in_place(&key, data.clone())? {
                        Some(id) => id,
                        None => self.provider.write(key, data.clone())?,
                    };
                trace!("indexed: update {} -> {}", old_id, new_id);
                session.set_after_data(&data, new_id);
                session.apply_update()?;
                Ok(new_id)
            }
        }
    }

    /// Read-modify-write: `f` sees the current record, or `None` for an
    /// absent key, and produces the new one.
    pub fn read_modify_write(
        &self,
        key: P::Key,
        f: impl FnOnce(Option<&P::Data>) -> P::Data,
    ) -> Result<RecordId, IndexError> {
        match self.provider.current_record_id(&key) {
            None => self.upsert(key, f(None)),
            Some(old_id) => {
                let before = self
                    .provider
                    .read(old_id)
                    .ok_or(IndexError::InternalInvariantViolation)?;
                self.upsert(key, f(Some(&before)))
            }
        }
    }

    /// Deletes `key`, withdrawing it from every group. Returns whether
    /// the key existed.
    pub fn delete(&self, key: &P::Key) -> Result<bool, IndexError> {
        match self.provider.remove(key)? {
            Some((data, id)) => {
                trace!("indexed: delete {}", id);
                let mut session = self.index.session();
                session.delete(&data, id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    //--- queries

    /// All live records matching one (predicate, key) pair, newest
    /// first.
    pub fn query_single<K: SecondaryKey>(
        &self,
        handle: &PredicateHandle,
        key: K,
        opts: QueryOptions,
    ) -> Result<Vec<(RecordId, P::Data)>, IndexError> {
        let guard = &epoch::pin();
        let iter = self.index.query_single(
            handle,
            key,
            LivenessFilter::new(&self.provider),
            opts,
            guard,
        )?;
        self.materialize(iter)
    }

    /// Two (predicate, key) pairs under `And`/`Or`.
    pub fn query2<K1, K2>(
        &self,
        h1: &PredicateHandle,
        k1: K1,
        op: BoolOp,
        h2: &PredicateHandle,
        k2: K2,
        opts: QueryOptions,
    ) -> Result<Vec<(RecordId, P::Data)>, IndexError>
    where
        K1: SecondaryKey,
        K2: SecondaryKey,
    {
        let guard = &epoch::pin();
        let iter = self.index.query2(
            h1,
            k1,
            op,
            h2,
            k2,
            LivenessFilter::new(&self.provider),
            opts,
            guard,
        )?;
        self.materialize(iter)
    }

    /// The uniform shape: operand groups plus an arbitrary combinator.
    pub fn query<F>(
        &self,
        spec: Vec<Vec<Operand>>,
        match_fn: F,
        opts: QueryOptions,
    ) -> Result<Vec<(RecordId, P::Data)>, IndexError>
    where
        F: Fn(&BoolMatrix) -> bool,
    {
        let guard = &epoch::pin();
        let iter = self.index.query(
            spec,
            match_fn,
            LivenessFilter::new(&self.provider),
            opts,
            guard,
        )?;
        self.materialize(iter)
    }

    fn materialize<L, F>(
        &self,
        iter: QueryIter<'_, L, F>,
    ) -> Result<Vec<(RecordId, P::Data)>, IndexError>
    where
        L: Liveness,
        F: Fn(&BoolMatrix) -> bool,
    {
        let mut out = Vec::new();
        for id in iter {
            let id = id?;
            // A record can lose a race with a delete between the
            // liveness check and this read; it is simply not a result
            // anymore.
            if let Some(data) = self.provider.read(id) {
                out.push((id, data));
            }
        }
        Ok(out)
    }
}

impl<P: Provider> std::fmt::Debug for IndexedKv<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedKv")
            .field("index", &self.index)
            .finish()
    }
}
