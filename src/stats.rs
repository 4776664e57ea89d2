use std::sync::atomic::{AtomicUsize, Ordering};

//------------ Counters ------------------------------------------------------

/// Running totals for one group's secondary store.
///
/// All counters are updated with relaxed ordering; they are diagnostics,
/// not synchronization points.
#[derive(Debug, Default)]
pub struct Counters {
    // number of composite records appended to the secondary log
    records: AtomicUsize,
    // number of tombstone slots linked into chains
    tombstones: AtomicUsize,
    // number of live slots linked into chains
    slots: AtomicUsize,
    // number of lost bucket-head CAS attempts
    cas_retries: AtomicUsize,
    // number of chain walks opened
    walks: AtomicUsize,
}

impl Counters {
    pub fn records_count(&self) -> usize {
        self.records.load(Ordering::Relaxed)
    }

    pub fn inc_records_count(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tombstones_count(&self) -> usize {
        self.tombstones.load(Ordering::Relaxed)
    }

    pub fn inc_tombstones_count(&self) {
        self.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slots_count(&self) -> usize {
        self.slots.load(Ordering::Relaxed)
    }

    pub fn inc_slots_count(&self) {
        self.slots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cas_retries_count(&self) -> usize {
        self.cas_retries.load(Ordering::Relaxed)
    }

    pub fn add_cas_retries(&self, count: usize) {
        if count > 0 {
            self.cas_retries.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn walks_count(&self) -> usize {
        self.walks.load(Ordering::Relaxed)
    }

    pub fn inc_walks_count(&self) {
        self.walks.fetch_add(1, Ordering::Relaxed);
    }
}

//------------ MutationReport ------------------------------------------------

/// What a single index mutation did to one or more groups.
///
/// Reports for the groups touched by one provider mutation are summed
/// before being returned to the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MutationReport {
    /// The number of lost compare-and-swap attempts while installing
    /// bucket heads. High numbers indicate contention.
    pub cas_count: usize,
    /// The number of composite records appended to secondary logs.
    pub records_appended: usize,
    /// The number of live slots linked into chains.
    pub slots_linked: usize,
    /// The number of tombstone slots linked into chains.
    pub tombstones_linked: usize,
}

impl std::ops::AddAssign for MutationReport {
    fn add_assign(&mut self, rhs: Self) {
        self.cas_count += rhs.cas_count;
        self.records_appended += rhs.records_appended;
        self.slots_linked += rhs.slots_linked;
        self.tombstones_linked += rhs.tombstones_linked;
    }
}

impl std::fmt::Display for MutationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "records: {} slots: {} tombstones: {} cas-retries: {}",
            self.records_appended,
            self.slots_linked,
            self.tombstones_linked,
            self.cas_count
        )
    }
}

//------------ GroupStats ----------------------------------------------------

/// A point-in-time snapshot of one group's storage state.
#[derive(Debug, Clone, Copy)]
pub struct GroupStats {
    pub group_id: u32,
    /// Bytes appended to the secondary log so far, page padding included.
    pub log_tail: u64,
    /// The number of buckets in the hash table.
    pub buckets: usize,
    /// The number of composite records appended.
    pub records: usize,
    /// The number of tombstone slots linked.
    pub tombstones: usize,
}
