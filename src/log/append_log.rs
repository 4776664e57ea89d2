use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use parking_lot_core::SpinWait;

use crate::log::OnceBoxSlice;
use crate::types::errors::{FatalError, FatalResult, IndexError};
use crate::types::record_id::LogAddress;

//------------ Page ----------------------------------------------------------

// One page of secondary-log memory. Appenders write into regions they
// have claimed through the tail; readers only ever look at regions that
// have been published through a bucket-head store with release ordering.
// Those two sets of bytes are disjoint at any point in time, which is
// what makes the raw-pointer access below workable.

pub(crate) struct Page {
    buf: Box<[UnsafeCell<u8>]>,
}

unsafe impl Sync for Page {}
unsafe impl Send for Page {}

impl Page {
    fn new(size: usize) -> Self {
        let mut vec = Vec::with_capacity(size);
        vec.resize_with(size, || UnsafeCell::new(0));
        Self {
            buf: vec.into_boxed_slice(),
        }
    }

    fn write(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.buf.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.buf[offset].get(),
                src.len(),
            );
        }
    }

    fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.buf.len());
        unsafe {
            std::slice::from_raw_parts(
                self.buf[offset].get() as *const u8,
                len,
            )
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page({} bytes)", self.buf.len())
    }
}

//------------ AppendLog -----------------------------------------------------

// The append-only, memory-resident log of one group's secondary store.
// Addresses are plain byte offsets from the start of the log; the page
// and segment directories underneath are allocated on first touch. A
// record never straddles a page boundary: a claim that would do so skips
// to the next page and leaves the gap zeroed. Nothing ever points into
// such a gap.

#[derive(Debug)]
pub(crate) struct AppendLog {
    page_size: usize,
    pages_per_segment: usize,
    capacity: u64,
    segments: OnceBoxSlice<OnceBoxSlice<Page>>,
    tail: AtomicU64,
}

impl AppendLog {
    // Geometry is validated at group registration; this only sizes the
    // directories.
    pub(crate) fn new(
        page_size: usize,
        segment_size: usize,
        memory_size: usize,
    ) -> Self {
        debug_assert!(page_size.is_power_of_two());
        debug_assert!(segment_size % page_size == 0);
        let pages_per_segment = segment_size / page_size;
        let num_segments = memory_size.div_ceil(segment_size);
        Self {
            page_size,
            pages_per_segment,
            capacity: (num_segments * segment_size) as u64,
            segments: OnceBoxSlice::new(num_segments),
            tail: AtomicU64::new(0),
        }
    }

    pub(crate) fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// Claims space for `image`, copies it in and returns its address.
    ///
    /// The record is not reachable yet when this returns; it becomes
    /// visible per slot, through the bucket-head installs that follow.
    pub(crate) fn append(
        &self,
        image: &[u8],
    ) -> Result<LogAddress, IndexError> {
        debug_assert!(image.len() <= self.page_size);

        let mut spinwait = SpinWait::new();
        let base = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let offset = tail as usize & (self.page_size - 1);
            // Skip to the next page if the record would straddle this one.
            let base = if offset + image.len() > self.page_size {
                (tail | (self.page_size as u64 - 1)) + 1
            } else {
                tail
            };
            if base + image.len() as u64 > self.capacity {
                return Err(IndexError::LogFull);
            }
            if self
                .tail
                .compare_exchange_weak(
                    tail,
                    base + image.len() as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break base;
            }
            spinwait.spin();
        };

        trace!("log: append {} bytes at {}", image.len(), base);
        self.page_for(base).write(
            base as usize & (self.page_size - 1),
            image,
        );
        Ok(base)
    }

    // Patches an 8-byte field of a record that has been appended but
    // whose slot is not published yet. Used to relink `previous` while
    // the bucket-head CAS is being retried.
    pub(crate) fn write_u64(&self, addr: LogAddress, value: u64) {
        self.page_for(addr).write(
            addr as usize & (self.page_size - 1),
            &value.to_ne_bytes(),
        );
    }

    // Same, for the one-byte flag field of an unpublished slot.
    pub(crate) fn write_u8(&self, addr: LogAddress, value: u8) {
        self.page_for(addr)
            .write(addr as usize & (self.page_size - 1), &[value]);
    }

    /// Reads `len` published bytes at `addr`.
    ///
    /// An address outside the appended range, or a read that would cross
    /// a page boundary, means a corrupted chain: fatal.
    pub(crate) fn bytes(
        &self,
        addr: LogAddress,
        len: usize,
    ) -> FatalResult<&[u8]> {
        let offset = addr as usize & (self.page_size - 1);
        if addr + len as u64 > self.tail() || offset + len > self.page_size
        {
            return Err(FatalError);
        }
        match self.page(addr) {
            Some(page) => Ok(page.bytes(offset, len)),
            None => Err(FatalError),
        }
    }

    fn page_index(&self, addr: LogAddress) -> (usize, usize) {
        let page = addr as usize / self.page_size;
        (page / self.pages_per_segment, page % self.pages_per_segment)
    }

    fn page(&self, addr: LogAddress) -> Option<&Page> {
        let (seg, page) = self.page_index(addr);
        self.segments.get(seg).and_then(|s| s.get(page))
    }

    fn page_for(&self, addr: LogAddress) -> &Page {
        let (seg, page) = self.page_index(addr);
        let pages_per_segment = self.pages_per_segment;
        let page_size = self.page_size;
        self.segments
            .get_or_init(seg, || OnceBoxSlice::new(pages_per_segment))
            .get_or_init(page, || Page::new(page_size))
    }

    //--- checkpoint support

    // Visits every allocated page image up to the tail, in address
    // order. Pages the tail has entered but that were never allocated
    // (all-padding pages) are visited as zeroes.
    pub(crate) fn for_each_page(
        &self,
        mut f: impl FnMut(usize, &[u8]) -> std::io::Result<()>,
    ) -> std::io::Result<u64> {
        let tail = self.tail();
        let pages = (tail as usize).div_ceil(self.page_size);
        let zeroes = vec![0u8; self.page_size];
        for idx in 0..pages {
            let addr = (idx * self.page_size) as u64;
            match self.page(addr) {
                Some(page) => f(idx, page.bytes(0, self.page_size))?,
                None => f(idx, &zeroes)?,
            }
        }
        Ok(tail)
    }

    // Loads one page image during recovery. Recovery runs before the
    // group is shared, so plain writes are fine here.
    pub(crate) fn restore_page(
        &self,
        idx: usize,
        bytes: &[u8],
    ) -> FatalResult<()> {
        if bytes.len() != self.page_size
            || (idx + 1) * self.page_size > self.capacity as usize
        {
            return Err(FatalError);
        }
        self.page_for((idx * self.page_size) as u64).write(0, bytes);
        Ok(())
    }

    pub(crate) fn restore_tail(&self, tail: u64) -> FatalResult<()> {
        if tail > self.capacity {
            return Err(FatalError);
        }
        self.tail.store(tail, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_log() -> AppendLog {
        AppendLog::new(128, 256, 1024)
    }

    #[test]
    fn appends_are_readable_and_ordered() {
        let log = small_log();
        let a = log.append(&[1u8; 24]).unwrap();
        let b = log.append(&[2u8; 24]).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 24);
        assert_eq!(log.bytes(a, 24).unwrap(), &[1u8; 24]);
        assert_eq!(log.bytes(b, 24).unwrap(), &[2u8; 24]);
    }

    #[test]
    fn records_do_not_straddle_pages() {
        let log = small_log();
        log.append(&[1u8; 100]).unwrap();
        // 28 bytes left on the page; a 40-byte record must skip ahead.
        let b = log.append(&[2u8; 40]).unwrap();
        assert_eq!(b, 128);
        assert_eq!(log.tail(), 168);
    }

    #[test]
    fn log_full_is_reported() {
        let log = small_log();
        for _ in 0..8 {
            log.append(&[0u8; 128]).unwrap();
        }
        assert_eq!(log.append(&[0u8; 1]), Err(IndexError::LogFull));
    }

    #[test]
    fn reads_beyond_tail_are_fatal() {
        let log = small_log();
        log.append(&[1u8; 8]).unwrap();
        assert!(log.bytes(4, 8).is_err());
        assert!(log.bytes(0, 8).is_ok());
    }
}
