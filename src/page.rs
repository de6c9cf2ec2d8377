//! Slots and pages: the storage layer of the queue.
//!
//! A page is one allocation holding a header followed by a fixed array of
//! slots. Each slot stores one value and a one-shot publication flag:
//!
//! - the producer that owns the slot writes the value, then sets the flag
//!   with release ordering
//! - the consumer that owns the slot waits for the flag with acquire
//!   ordering, then moves the value out
//!
//! Flags are never reset. A slot carries exactly one value in its lifetime;
//! reuse happens at page granularity, when a fully drained page is returned
//! to the allocator and a fresh one takes its place.

use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::alloc::PageAlloc;

/// One storage cell plus its publication flag.
pub(crate) struct Slot<T> {
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Whether the value has been published and may be read.
    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Write the value and publish it.
    ///
    /// The release store on the flag is what makes the value visible to
    /// the consumer that observes `is_ready()`. This is the caller's last
    /// access to the containing page: once the flag is set, the page may
    /// be drained and retired at any moment.
    ///
    /// # Safety
    ///
    /// The caller must be the sole producer for this slot, and must call
    /// this at most once per slot.
    #[inline]
    pub(crate) unsafe fn fill(&self, value: T) {
        // SAFETY: exclusive write access — the global index claim assigns
        // each slot to exactly one producer, and the flag is still false
        // so no consumer reads the cell yet.
        unsafe { (*self.value.get()).write(value) };
        self.ready.store(true, Ordering::Release);
    }

    /// Move the value out.
    ///
    /// # Safety
    ///
    /// The caller must have observed `is_ready()`, must be the sole
    /// consumer for this slot, and must call this at most once per slot.
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        // SAFETY: the acquire load of the flag ordered the producer's
        // write before this read, and the slot is never read again.
        unsafe { (*self.value.get()).assume_init_read() }
    }
}

// SAFETY: the cell is protected by the publication protocol above — the
// flag hands each slot from exactly one producer to exactly one consumer.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

/// Page header. The slot array lives in the same allocation, directly
/// after the header (padded to the slot alignment).
#[repr(C)]
pub(crate) struct Page<T> {
    next: AtomicPtr<Page<T>>,
}

impl<T> Page<T> {
    /// Byte offset of the slot array within the page allocation.
    const fn slots_offset() -> usize {
        let align = align_of::<Slot<T>>();
        (size_of::<Self>() + align - 1) & !(align - 1)
    }

    /// Allocation layout for a page of `capacity` slots, or `None` if the
    /// size computation overflows.
    fn layout(capacity: usize) -> Option<Layout> {
        let slots = size_of::<Slot<T>>().checked_mul(capacity)?;
        let size = Self::slots_offset().checked_add(slots)?;
        let align = if align_of::<Self>() > align_of::<Slot<T>>() {
            align_of::<Self>()
        } else {
            align_of::<Slot<T>>()
        };
        Layout::from_size_align(size, align).ok()
    }

    /// Allocate and initialize an empty, unlinked page.
    pub(crate) fn allocate<A: PageAlloc>(alloc: &A, capacity: usize) -> Option<NonNull<Self>> {
        debug_assert!(capacity > 0);
        let layout = Self::layout(capacity)?;
        let block = alloc.allocate(layout)?;
        let page = block.cast::<Self>();
        // SAFETY: `block` is a fresh allocation of `layout`: the header
        // fits at its start and `capacity` slots fit at `slots_offset()`.
        unsafe {
            page.as_ptr().write(Self {
                next: AtomicPtr::new(ptr::null_mut()),
            });
            let slots = block.as_ptr().add(Self::slots_offset()).cast::<Slot<T>>();
            for i in 0..capacity {
                slots.add(i).write(Slot::new());
            }
        }
        Some(page)
    }

    /// Return a page's block to the allocator.
    ///
    /// Slot values are not dropped here: by the retirement protocol every
    /// published slot has already been consumed when a page is freed, and
    /// unpublished slots were never written.
    ///
    /// # Safety
    ///
    /// `page` must come from [`allocate`](Self::allocate) on the same
    /// allocator with the same `capacity`, must not be freed twice, and no
    /// other thread may still access it.
    pub(crate) unsafe fn free<A: PageAlloc>(page: NonNull<Self>, capacity: usize, alloc: &A) {
        let Some(layout) = Self::layout(capacity) else {
            // The same computation succeeded when the page was allocated.
            unreachable!()
        };
        // SAFETY: per the caller contract, this block came from `alloc`
        // with this layout.
        unsafe { alloc.deallocate(page.cast::<u8>(), layout) };
    }

    /// Reference to slot `index`.
    ///
    /// # Safety
    ///
    /// `page` must be live and allocated with a capacity greater than
    /// `index`, and must stay live for `'a`.
    #[inline]
    pub(crate) unsafe fn slot<'a>(page: *mut Self, index: usize) -> &'a Slot<T> {
        // SAFETY: the slot array starts at `slots_offset()` within the
        // page allocation and `index` is in bounds per the contract.
        unsafe {
            &*page
                .cast::<u8>()
                .add(Self::slots_offset())
                .cast::<Slot<T>>()
                .add(index)
        }
    }

    /// Load the link to the next page.
    #[inline]
    pub(crate) fn next(&self) -> *mut Self {
        self.next.load(Ordering::Acquire)
    }

    /// Link the successor page.
    ///
    /// Called exactly once per page, by the producer that owns the first
    /// slot of the *following* page run; the completion-counter gates
    /// order that call before any reader of the link.
    #[inline]
    pub(crate) fn set_next(&self, next: NonNull<Self>) {
        self.next.store(next.as_ptr(), Ordering::Release);
    }
}
