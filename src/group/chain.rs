use log::trace;
use roaring::RoaringTreemap;

use crate::key::accessor::{record_address, slot_matches};
use crate::key::key_pointer::{KeyPointer, RecordHeader, RECORD_HEADER_SIZE};
use crate::log::AppendLog;
use crate::types::errors::FatalResult;
use crate::types::query_options::TerminationFn;
use crate::types::record_id::{LogAddress, INVALID_ADDRESS};
use crate::types::RecordId;

//------------ ChainWalk -----------------------------------------------------

// A lazy walk over one bucket chain, filtered on one (ordinal, key) pair.
// The walk visits entries newest-first and keeps one live front at a
// time; the query merge advances it on demand.
//
// Entries that hashed into the same bucket for a different ordinal or key
// are skipped. A tombstone entry withdraws its record identifier from the
// rest of this walk: the tombstone is always the newer append, so the
// withdrawn set only needs the identifiers seen so far.
pub(crate) struct ChainWalk<'g> {
    log: &'g AppendLog,
    // Snapshot of the group's retired-identifier bitmap, valid for the
    // lifetime of the epoch guard this walk runs under.
    retired: Option<&'g RoaringTreemap>,
    slot_size: usize,
    ordinal: u8,
    key: Box<[u8]>,
    next_addr: LogAddress,
    terminate: Option<TerminationFn>,
    // Record ids withdrawn by tombstones, in the order encountered
    // (descending). Kept sorted for binary search.
    withdrawn: Vec<u64>,
    front: Option<RecordId>,
}

impl<'g> ChainWalk<'g> {
    pub(crate) fn new(
        log: &'g AppendLog,
        retired: Option<&'g RoaringTreemap>,
        slot_size: usize,
        ordinal: u8,
        key: &[u8],
        head: LogAddress,
        terminate: Option<TerminationFn>,
    ) -> FatalResult<Self> {
        let mut walk = Self {
            log,
            retired,
            slot_size,
            ordinal,
            key: key.into(),
            next_addr: head,
            terminate,
            withdrawn: Vec::new(),
            front: None,
        };
        walk.advance()?;
        Ok(walk)
    }

    /// The newest not-yet-consumed live record id of this chain.
    pub(crate) fn front(&self) -> Option<RecordId> {
        self.front
    }

    /// Moves the front to the next live entry, or exhausts the walk.
    pub(crate) fn advance(&mut self) -> FatalResult<()> {
        loop {
            if self.next_addr == INVALID_ADDRESS {
                self.front = None;
                return Ok(());
            }
            let addr = self.next_addr;
            let slot = KeyPointer::from_bytes(
                self.log.bytes(addr, self.slot_size)?,
            )?;
            self.next_addr = slot.previous();

            if !slot_matches(slot, self.ordinal, &self.key) {
                continue;
            }

            let record_addr = record_address(addr, slot);
            let header = RecordHeader::from_bytes(
                self.log.bytes(record_addr, RECORD_HEADER_SIZE)?,
            )?;
            let id = header.record_id();

            if let Some(terminate) = &self.terminate {
                if terminate(id) {
                    trace!("walk: terminated at {}", id);
                    self.next_addr = INVALID_ADDRESS;
                    self.front = None;
                    return Ok(());
                }
            }

            if slot.is_tombstone() {
                trace!("walk: tombstone for {}", id);
                self.withdraw(id);
                continue;
            }
            if self.is_withdrawn(id) {
                continue;
            }
            if let Some(retired) = self.retired {
                if retired.contains(id.as_u64()) {
                    continue;
                }
            }

            self.front = Some(id);
            return Ok(());
        }
    }

    fn withdraw(&mut self, id: RecordId) {
        let raw = id.as_u64();
        if let Err(pos) = self.withdrawn.binary_search(&raw) {
            self.withdrawn.insert(pos, raw);
        }
    }

    fn is_withdrawn(&self, id: RecordId) -> bool {
        self.withdrawn.binary_search(&id.as_u64()).is_ok()
    }
}

impl std::fmt::Debug for ChainWalk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainWalk")
            .field("ordinal", &self.ordinal)
            .field("next_addr", &self.next_addr)
            .field("front", &self.front)
            .finish()
    }
}
