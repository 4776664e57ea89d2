use crate::types::RecordId;

//------------ Provider ------------------------------------------------------

/// The contract between the index and the primary key/value store it
/// augments.
///
/// The index never looks inside the provider; it only needs the provider
/// to (a) resolve a record id back to its primary key, (b) report the
/// current authoritative record id for a primary key, (c) materialize a
/// record, and (d) expose a mutation surface for the
/// [IndexedKv](crate::IndexedKv) wrapper. Record ids must be unique per
/// physical write and monotone in write order.
///
/// A provider whose pending-operation limit is reached reports
/// [IndexError::OperationPending](crate::IndexError::OperationPending);
/// the wrapper surfaces it unchanged so the caller can retry through the
/// provider's completion mechanism.
pub trait Provider: Send + Sync {
    type Key: Clone + Send + Sync;
    type Data: Clone + Send + Sync;

    /// The current authoritative record id for this primary key, or
    /// `None` when the key is absent or deleted.
    fn current_record_id(&self, key: &Self::Key) -> Option<RecordId>;

    /// The primary key of the record version `id`, resolved from the
    /// provider's record header or log. `None` when the id is unknown.
    fn primary_key_of(&self, id: RecordId) -> Option<Self::Key>;

    /// Materializes the record version `id`.
    fn read(&self, id: RecordId) -> Option<Self::Data>;

    /// Writes a new version for `key` and returns its record id.
    fn write(
        &self,
        key: Self::Key,
        data: Self::Data,
    ) -> Result<RecordId, crate::IndexError>;

    /// Overwrites the current version of `key` in place, keeping its
    /// record id, when the provider supports that for this value type.
    /// The default provider cannot.
    fn write_in_place(
        &self,
        _key: &Self::Key,
        _data: Self::Data,
    ) -> Result<Option<RecordId>, crate::IndexError> {
        Ok(None)
    }

    /// Removes `key`, returning the removed version and its record id.
    fn remove(
        &self,
        key: &Self::Key,
    ) -> Result<Option<(Self::Data, RecordId)>, crate::IndexError>;
}

//------------ Liveness ------------------------------------------------------

/// The query-time check that a record id emitted from a chain is still
/// the provider's authoritative version.
pub trait Liveness {
    fn is_live(&self, id: RecordId) -> bool;
}

/// A liveness check that trusts every chain entry. Only sensible in
/// tests, or when the caller re-validates emitted ids itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeLive;

impl Liveness for AssumeLive {
    fn is_live(&self, _id: RecordId) -> bool {
        true
    }
}

//------------ LivenessFilter ------------------------------------------------

/// Validates chain entries against the provider.
///
/// A chain entry records the record id at mutation time. By the time a
/// query emits it, the provider may have advanced the primary key to a
/// newer version, or deleted it. The filter resolves the id to its
/// primary key and compares against the provider's current authoritative
/// id; only an exact match is live. This is the sole reconciliation
/// point for stale chain entries, which is what lets chains go without
/// compaction.
pub struct LivenessFilter<'p, P: Provider> {
    provider: &'p P,
}

impl<'p, P: Provider> LivenessFilter<'p, P> {
    pub fn new(provider: &'p P) -> Self {
        Self { provider }
    }
}

impl<P: Provider> Liveness for LivenessFilter<'_, P> {
    fn is_live(&self, id: RecordId) -> bool {
        match self.provider.primary_key_of(id) {
            Some(key) => {
                self.provider.current_record_id(&key) == Some(id)
            }
            None => false,
        }
    }
}

impl<P: Provider> std::fmt::Debug for LivenessFilter<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LivenessFilter")
    }
}
