use crate::types::RecordId;

//------------ UpdateOp ------------------------------------------------------

/// The kind of provider mutation a [ChangeTracker] is carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// A fresh record; there is no before-image.
    Insert,
    /// The provider mutated the record in place; the record id did not
    /// change.
    InPlaceUpdate,
    /// The provider wrote a new version of the record; the record id
    /// advanced.
    ReadCopyUpdate,
    /// The record is going away; there is no after-image.
    Delete,
}

impl std::fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UpdateOp::Insert => write!(f, "insert"),
            UpdateOp::InPlaceUpdate => write!(f, "in-place-update"),
            UpdateOp::ReadCopyUpdate => write!(f, "read-copy-update"),
            UpdateOp::Delete => write!(f, "delete"),
        }
    }
}

//------------ SlotBuffer ----------------------------------------------------

// The evaluated keys of one data image for one group, type-erased to
// bytes: slot `o` holds the key the group's predicate `o` produced, or
// nothing. An empty buffer (never evaluated, or belonging to a group
// registered after the tracker was created) reads as all-null.
#[derive(Debug, Default, Clone)]
pub(crate) struct SlotBuffer {
    key_size: usize,
    present: Vec<bool>,
    bytes: Vec<u8>,
}

impl SlotBuffer {
    pub(crate) fn reset(&mut self, key_size: usize, slots: usize) {
        self.key_size = key_size;
        self.present.clear();
        self.present.resize(slots, false);
        self.bytes.clear();
        self.bytes.resize(slots * key_size, 0);
    }

    pub(crate) fn clear(&mut self) {
        self.present.clear();
        self.bytes.clear();
    }

    pub(crate) fn set(&mut self, ordinal: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.key_size);
        self.present[ordinal] = true;
        let start = ordinal * self.key_size;
        self.bytes[start..start + self.key_size].copy_from_slice(key);
    }

    pub(crate) fn key(&self, ordinal: usize) -> Option<&[u8]> {
        if *self.present.get(ordinal)? {
            let start = ordinal * self.key_size;
            Some(&self.bytes[start..start + self.key_size])
        } else {
            None
        }
    }
}

//------------ GroupSlots ----------------------------------------------------

#[derive(Debug, Default, Clone)]
pub(crate) struct GroupSlots {
    pub(crate) before: SlotBuffer,
    pub(crate) after: SlotBuffer,
}

//------------ ChangeTracker -------------------------------------------------

/// Carries one mutation's before- and after-images, their record ids and
/// the per-group evaluated key buffers between the two phases of the
/// update protocol.
///
/// The protocol is: [set_before_data](
/// crate::SubsetHashIndex::set_before_data) once the pre-image is known
/// (eagerly evaluated when the provider is about to destroy it), then
/// [set_after_data](crate::SubsetHashIndex::set_after_data) once the new
/// record exists, then [on_update](crate::SubsetHashIndex::on_update).
/// Sessions pool one tracker and reset it between mutations, so the
/// buffers' allocations are reused.
pub struct ChangeTracker<D> {
    pub(crate) op: Option<UpdateOp>,
    // The before-image, kept only when evaluation was deferred.
    pub(crate) before: Option<D>,
    pub(crate) before_id: Option<RecordId>,
    pub(crate) after: Option<D>,
    pub(crate) after_id: Option<RecordId>,
    pub(crate) groups: Vec<GroupSlots>,
    pub(crate) has_before_keys: bool,
}

impl<D> ChangeTracker<D> {
    pub fn new() -> Self {
        Self {
            op: None,
            before: None,
            before_id: None,
            after: None,
            after_id: None,
            groups: Vec::new(),
            has_before_keys: false,
        }
    }

    pub fn op(&self) -> Option<UpdateOp> {
        self.op
    }

    pub fn before_id(&self) -> Option<RecordId> {
        self.before_id
    }

    pub fn after_id(&self) -> Option<RecordId> {
        self.after_id
    }

    /// Whether the pre-image keys have already been evaluated.
    pub fn has_before_keys(&self) -> bool {
        self.has_before_keys
    }

    // Back to the idle state, keeping every allocation.
    pub(crate) fn reset(&mut self) {
        self.op = None;
        self.before = None;
        self.before_id = None;
        self.after = None;
        self.after_id = None;
        self.has_before_keys = false;
        for slots in &mut self.groups {
            slots.before.clear();
            slots.after.clear();
        }
    }

    // Groups registered after this tracker was created get an empty
    // buffer pair; their pre-image reads as all-null.
    pub(crate) fn widen(&mut self, groups: usize) {
        if self.groups.len() < groups {
            self.groups.resize_with(groups, GroupSlots::default);
        }
    }
}

impl<D> Default for ChangeTracker<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> std::fmt::Debug for ChangeTracker<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("op", &self.op)
            .field("before_id", &self.before_id)
            .field("after_id", &self.after_id)
            .field("has_before_keys", &self.has_before_keys)
            .field("groups", &self.groups.len())
            .finish()
    }
}
