use zerocopy::{Immutable, IntoBytes, KnownLayout, TryFromBytes};

//------------ RecordId ------------------------------------------------------

/// The opaque identifier of one physical record version in the provider
/// store.
///
/// For a log-structured provider this is the log offset of the record, so
/// identifiers are unique per physical write and totally ordered: a newer
/// version of a record always carries a greater `RecordId` than the
/// version it supersedes. The index never interprets the value beyond
/// comparing it.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    TryFromBytes,
    KnownLayout,
    Immutable,
    IntoBytes,
)]
#[repr(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        RecordId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        RecordId(value)
    }
}

impl From<RecordId> for u64 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

//------------ LogAddress ----------------------------------------------------

// A byte address into a group's secondary log. Chain links and bucket
// heads store these; `INVALID` marks the end of a chain and an empty
// bucket. Address 0 is a valid address (the first record in the log), so
// the sentinel lives at the top of the range.

pub type LogAddress = u64;

pub(crate) const INVALID_ADDRESS: LogAddress = u64::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_order_by_log_offset() {
        let r1 = RecordId::new(16);
        let r2 = RecordId::new(4096);
        assert!(r1 < r2);
        assert_eq!(r1, RecordId::from(16u64));
        assert_eq!(u64::from(r2), 4096);
    }
}
