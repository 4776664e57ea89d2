use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::key::key_pointer::{
    slot_size, KeyPointer, RECORD_HEADER_SIZE,
};
use crate::types::record_id::LogAddress;

//------------ KeyAccessor ---------------------------------------------------

// Hashing, equality and address arithmetic over a single slot of a
// composite key. Bucket assignment derives from these hashes and is
// persisted in checkpoints, so the hash must be stable across processes:
// xxh3 over the key bytes, seeded with the ordinal.

// The seed folds the predicate ordinal into the hash so that two
// predicates of the same group never share a bucket chain just because
// they happen to produce equal key values. Seeds start at 1; seed 0 is
// plain xxh3 and stays reserved.
pub(crate) fn slot_hash(ordinal: u8, key: &[u8]) -> u64 {
    xxh3_64_with_seed(key, ordinal as u64 + 1)
}

// A query slot matches a stored slot when both the ordinal and the key
// bytes agree. Null and tentative slots never match anything.
pub(crate) fn slot_matches(
    slot: &KeyPointer,
    ordinal: u8,
    key: &[u8],
) -> bool {
    !slot.is_null()
        && !slot.is_tentative()
        && slot.ordinal() == ordinal
        && slot.key() == key
}

// The start of the composite record that contains the slot at
// `slot_addr`.
pub(crate) fn record_address(
    slot_addr: LogAddress,
    slot: &KeyPointer,
) -> LogAddress {
    slot_addr - slot.offset_to_start() as u64 - RECORD_HEADER_SIZE as u64
}

// The address of the slot for `ordinal` within the composite record at
// `record_addr`.
pub(crate) fn slot_address(
    record_addr: LogAddress,
    ordinal: u8,
    key_size: usize,
) -> LogAddress {
    record_addr
        + RECORD_HEADER_SIZE as u64
        + ordinal as u64 * slot_size(key_size) as u64
}
