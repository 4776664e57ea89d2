use std::ptr::null_mut;
use std::slice;
use std::sync::atomic::{AtomicPtr, Ordering};

//------------ OnceBox -------------------------------------------------------
//
// Create an atomic pointer once, never to be modified. Used for the lazy
// allocation of log segments and pages in `append_log`: many appenders
// may race to create the same page, exactly one allocation wins and the
// losers drop theirs. Loads are acquire loads: a page observed through
// here must be observed fully zero-initialised.

#[derive(Debug, Default)]
pub(crate) struct OnceBox<T> {
    ptr: AtomicPtr<T>,
}

impl<T> OnceBox<T> {
    pub(crate) fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(null_mut()),
        }
    }

    pub(crate) fn get(&self) -> Option<&T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    pub(crate) fn get_or_init(&self, create: impl FnOnce() -> T) -> &T {
        if let Some(res) = self.get() {
            return res;
        }
        let ptr = Box::leak(Box::new(create()));
        let res = match self.ptr.compare_exchange(
            null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(current) => {
                // We set the new value, return it.
                assert!(current.is_null());
                ptr as *const _
            }
            Err(current) => {
                // `current` is the real value, we need to drop our value.
                assert!(!current.is_null());
                let _ = unsafe { Box::from_raw(ptr) };
                current as *const _
            }
        };
        unsafe { &*res }
    }
}

impl<T> Drop for OnceBox<T> {
    fn drop(&mut self) {
        let ptr = self.ptr.swap(null_mut(), Ordering::Relaxed);
        if !ptr.is_null() {
            let _ = unsafe { Box::from_raw(ptr) };
        }
    }
}

//------------ OnceBoxSlice --------------------------------------------------
//
// A fixed-capacity slice of OnceBoxes, itself allocated on first use, so
// an empty log does not pay for its whole segment directory up front.

#[derive(Debug)]
pub(crate) struct OnceBoxSlice<T> {
    ptr: AtomicPtr<OnceBox<T>>,
    size: usize,
}

impl<T> OnceBoxSlice<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            ptr: AtomicPtr::new(null_mut()),
            size,
        }
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            let slice = unsafe { slice::from_raw_parts(ptr, self.size) };
            slice.get(idx).and_then(|inner| inner.get())
        }
    }

    // The caller must make sure that `idx` is within the capacity the
    // slice was created with; this is not checked here.
    #[allow(clippy::indexing_slicing)]
    pub(crate) fn get_or_init(
        &self,
        idx: usize,
        create: impl FnOnce() -> T,
    ) -> &T {
        let slice = self.get_or_make_slice();
        slice[idx].get_or_init(create)
    }

    fn get_or_make_slice(&self) -> &[OnceBox<T>] {
        let ptr = self.ptr.load(Ordering::Acquire);
        if !ptr.is_null() {
            return unsafe { slice::from_raw_parts(ptr, self.size) };
        }

        // Create a slice, set it, get again.
        let mut vec = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            vec.push(OnceBox::new())
        }
        let ptr = Box::leak(vec.into_boxed_slice()).as_mut_ptr();
        let res = match self.ptr.compare_exchange(
            null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(current) => {
                // We set the new value, return it.
                assert!(current.is_null());
                ptr
            }
            Err(current) => {
                // There was a value already: current. Drop our new thing
                // and return current.
                assert!(!current.is_null());
                let _ = unsafe {
                    Box::from_raw(slice::from_raw_parts_mut(ptr, self.size))
                };
                current
            }
        };

        unsafe { slice::from_raw_parts(res, self.size) }
    }
}

impl<T> Drop for OnceBoxSlice<T> {
    fn drop(&mut self) {
        let ptr = self.ptr.swap(null_mut(), Ordering::Relaxed);
        if !ptr.is_null() {
            let _ = unsafe {
                Box::from_raw(slice::from_raw_parts_mut(ptr, self.size))
            };
        }
    }
}
