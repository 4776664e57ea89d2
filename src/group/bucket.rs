use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::errors::FatalError;
use crate::types::record_id::{LogAddress, INVALID_ADDRESS};

//------------ BucketTable ---------------------------------------------------

// The hash table of one group: a power-of-two array of chain heads. Every
// head stores the log address of the newest slot that hashed into the
// bucket, or the invalid sentinel for an empty bucket. Heads are the only
// mutable cells of a group's store and the only publication points: a
// successful release-CAS of a head is what makes a slot (and the record
// bytes behind it) visible to readers.

#[derive(Debug)]
pub(crate) struct BucketTable {
    mask: u64,
    heads: Box<[AtomicU64]>,
}

impl BucketTable {
    pub(crate) fn new(size: usize) -> Self {
        debug_assert!(size.is_power_of_two());
        let mut heads = Vec::with_capacity(size);
        heads.resize_with(size, || AtomicU64::new(INVALID_ADDRESS));
        Self {
            mask: size as u64 - 1,
            heads: heads.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heads.len()
    }

    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    pub(crate) fn head(&self, bucket: usize) -> LogAddress {
        self.heads[bucket].load(Ordering::Acquire)
    }

    // One CAS attempt to swing the head from `expected` to `new`. On a
    // lost race the actual head comes back so the caller can re-link its
    // slot before retrying; an install must never orphan the entries that
    // won.
    pub(crate) fn try_install(
        &self,
        bucket: usize,
        expected: LogAddress,
        new: LogAddress,
    ) -> Result<(), LogAddress> {
        self.heads[bucket]
            .compare_exchange(
                expected,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
    }

    //--- checkpoint support

    pub(crate) fn snapshot(&self) -> Vec<u64> {
        self.heads
            .iter()
            .map(|h| h.load(Ordering::Acquire))
            .collect()
    }

    // Recovery runs before the group is shared; plain stores suffice.
    pub(crate) fn restore(&self, heads: &[u64]) -> Result<(), FatalError> {
        if heads.len() != self.heads.len() {
            return Err(FatalError);
        }
        for (cell, head) in self.heads.iter().zip(heads) {
            cell.store(*head, Ordering::Release);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_retries_report_the_actual_head() {
        let table = BucketTable::new(8);
        let bucket = table.bucket_index(0xdead_beef);
        let head = table.head(bucket);
        assert_eq!(head, INVALID_ADDRESS);

        assert_eq!(table.try_install(bucket, head, 16), Ok(()));
        // A stale expectation loses and learns the real head.
        assert_eq!(table.try_install(bucket, head, 32), Err(16));
        assert_eq!(table.try_install(bucket, 16, 32), Ok(()));
        assert_eq!(table.head(bucket), 32);
    }

    #[test]
    fn snapshot_round_trips() {
        let table = BucketTable::new(4);
        table.try_install(1, INVALID_ADDRESS, 64).unwrap();
        let snap = table.snapshot();

        let restored = BucketTable::new(4);
        restored.restore(&snap).unwrap();
        assert_eq!(restored.head(1), 64);
        assert_eq!(restored.head(0), INVALID_ADDRESS);
    }
}
