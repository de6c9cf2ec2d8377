use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of page storage for a queue.
///
/// Every page a queue creates or retires goes through one allocator, chosen
/// at construction. Concurrent producers, and producers racing consumers
/// that are retiring pages, call into it at the same time, so implementors
/// must be thread-safe — hence the `Send + Sync` requirement.
///
/// The default implementation is [`Heap`]; [`CountingAlloc`] wraps any
/// allocator with allocation/free counters.
pub trait PageAlloc: Send + Sync {
    /// Allocate a block for one page.
    ///
    /// Returns `None` when the allocator cannot satisfy the request. The
    /// layout always has nonzero size.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Free a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same allocator
    /// with this same `layout`, and must not be freed more than once.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default allocator: page storage from the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

impl PageAlloc for Heap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: the layout has nonzero size (a page header at minimum).
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded from our `allocate` with the same layout, per
        // the trait contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Wraps an allocator with allocation and free counters.
///
/// Useful for verifying page lifecycle behavior — a drained queue must
/// eventually free every page it allocated — and for watching steady-state
/// allocation rates in production diagnostics. The counters are shared:
/// clones of a `CountingAlloc` report the same totals, so a clone kept
/// outside the queue keeps observing after the queue is gone.
///
/// # Examples
///
/// ```rust
/// use paquet::{alloc::CountingAlloc, queue::queue};
///
/// # fn main() -> Result<(), paquet::QueueError> {
/// let alloc = CountingAlloc::default();
/// let probe = alloc.clone();
///
/// let q = queue::<u64>().allocator(alloc).build()?;
/// // One initial page per shard.
/// assert_eq!(probe.allocated(), q.shard_count());
/// assert_eq!(probe.freed(), 0);
///
/// drop(q);
/// assert_eq!(probe.freed(), probe.allocated());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CountingAlloc<A = Heap> {
    inner: A,
    allocated: Arc<AtomicUsize>,
    freed: Arc<AtomicUsize>,
}

impl Default for CountingAlloc {
    fn default() -> Self {
        Self::new(Heap)
    }
}

impl<A> CountingAlloc<A> {
    /// Wrap `inner`, starting both counters at zero.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            allocated: Arc::new(AtomicUsize::new(0)),
            freed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Total successful page allocations so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total page frees so far.
    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::Relaxed)
    }

    /// Pages currently live (allocated and not yet freed).
    pub fn live(&self) -> usize {
        self.allocated().saturating_sub(self.freed())
    }
}

impl<A: PageAlloc> PageAlloc for CountingAlloc<A> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let block = self.inner.allocate(layout)?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded unchanged; the caller upholds the contract.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_round_trip() {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let block = Heap.allocate(layout).unwrap();
        unsafe { Heap.deallocate(block, layout) };
    }

    #[test]
    fn counting_tracks_both_sides() {
        let alloc = CountingAlloc::new(Heap);
        let layout = Layout::from_size_align(128, 16).unwrap();

        let a = alloc.allocate(layout).unwrap();
        let b = alloc.allocate(layout).unwrap();
        assert_eq!(alloc.allocated(), 2);
        assert_eq!(alloc.freed(), 0);
        assert_eq!(alloc.live(), 2);

        unsafe {
            alloc.deallocate(a, layout);
            alloc.deallocate(b, layout);
        }
        assert_eq!(alloc.freed(), 2);
        assert_eq!(alloc.live(), 0);
    }
}
