use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::alloc::{Heap, PageAlloc};
use crate::page::Page;
use crate::shard::Shard;
use crate::traits::{QueueConsumer, QueueFactory, QueueProducer};
use crate::{QueueError, default_page_capacity};

/// Default number of shards.
///
/// Eight sub-queues is enough to spread producer and consumer traffic
/// across cache lines on common core counts; raise it for very wide
/// machines, lower it to trade throughput for memory.
pub const DEFAULT_SHARD_COUNT: usize = 8;

/// Unbounded, lock-free MPMC queue over sharded page chains.
///
/// Every operation claims a unique index from a global counter; the index
/// selects one of the shards and a slot position inside that shard's page
/// chain. Producers and consumers of the same shard coordinate only
/// through per-page gates and per-slot publication flags — there is no
/// lock anywhere.
///
/// # Type Parameters
///
/// * `T` - The element type (must be `Send`; values are moved in and out)
/// * `A` - The page allocator (default: [`Heap`])
///
/// # Construction
///
/// Use the [`queue`] function and its builder rather than constructing
/// directly:
///
/// ```rust
/// use paquet::{
///     queue::queue,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), paquet::QueueError> {
/// let (producer, consumer) = queue::<u32>().shards(4).page_capacity(16).channels()?;
///
/// producer.push(7);
/// assert_eq!(consumer.try_pop()?, 7);
/// # Ok(())
/// # }
/// ```
///
/// # Destruction
///
/// Dropping the queue pops every remaining item through the normal
/// consumer path, so each value is dropped exactly once, then returns
/// every page still on any shard's chain to the allocator.
pub struct ShardedQueue<T, A = Heap>
where
    T: Send,
    A: PageAlloc,
{
    shards: Box<[Shard<T>]>,
    page_capacity: usize,
    alloc: A,
    push_index: CachePadded<AtomicUsize>,
    pop_index: CachePadded<AtomicUsize>,
    _marker: PhantomData<T>,
}

impl<T, A> ShardedQueue<T, A>
where
    T: Send,
    A: PageAlloc,
{
    pub(crate) fn with_alloc(
        shard_count: usize,
        page_capacity: usize,
        alloc: A,
    ) -> Result<Self, QueueError> {
        if shard_count == 0 || page_capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }

        // Every shard starts with one empty page, head == tail.
        let mut first_pages: Vec<NonNull<Page<T>>> = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            match Page::allocate(&alloc, page_capacity) {
                Some(page) => first_pages.push(page),
                None => {
                    for page in first_pages.drain(..) {
                        // SAFETY: allocated just above with this capacity
                        // and never shared.
                        unsafe { Page::free(page, page_capacity, &alloc) };
                    }
                    return Err(QueueError::AllocationFailed);
                },
            }
        }

        Ok(Self {
            shards: first_pages.into_iter().map(Shard::new).collect(),
            page_capacity,
            alloc,
            push_index: CachePadded::new(AtomicUsize::new(0)),
            pop_index: CachePadded::new(AtomicUsize::new(0)),
            _marker: PhantomData,
        })
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Slots per page.
    pub const fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// The allocator backing this queue's pages.
    pub const fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Approximate number of items currently in the queue.
    ///
    /// This is a snapshot of `pushes claimed - pops claimed` and is only
    /// exact while the queue is quiescent. Use it for diagnostics and
    /// metrics, never as a correctness precondition.
    pub fn count(&self) -> usize {
        // Pop side first: pops never outnumber pushes, and the acquire
        // keeps the second load from being hoisted above the first, so
        // the subtraction cannot underflow.
        let popped = self.pop_index.load(Ordering::Acquire);
        let pushed = self.push_index.load(Ordering::Relaxed);
        pushed.wrapping_sub(popped)
    }

    /// Whether the queue appears empty. Same caveats as [`count`](Self::count).
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Enqueue a value.
    ///
    /// Claims the next global index and runs the producer protocol for the
    /// slot it designates. The claim itself is wait-free; the operation
    /// may briefly spin at a page boundary for producers of the previous
    /// page to finish.
    ///
    /// # Panics
    ///
    /// Panics if a new page cannot be allocated. The failure is fatal to
    /// the queue, not just the call: the claimed slot will never be
    /// published, so a consumer assigned to it would wait indefinitely.
    pub fn push(&self, value: T) {
        self.push_with_seq(value);
    }

    /// Enqueue a value and return the claimed sequence number.
    ///
    /// # Panics
    ///
    /// Same as [`push`](Self::push).
    pub fn push_with_seq(&self, value: T) -> usize {
        let index = self.push_index.fetch_add(1, Ordering::Relaxed);
        let shard = index % self.shards.len();
        let rank = index / self.shards.len();

        // The first producer on a page allocates the next one ahead of
        // time, before entering any gate, so allocation never sits on the
        // page-transition critical path.
        let spare = if rank % self.page_capacity == 0 {
            match Page::allocate(&self.alloc, self.page_capacity) {
                Some(page) => Some(page),
                None => panic!(
                    "page allocation failed ({} slots of {} bytes)",
                    self.page_capacity,
                    size_of::<T>()
                ),
            }
        } else {
            None
        };

        // SAFETY: the fetch_add claim is unique, the shard and rank are
        // derived from it, and the spare matches the page capacity.
        unsafe { self.shards[shard].push(rank, self.page_capacity, spare, value) };
        index
    }

    /// Dequeue one item, returning immediately if none is available.
    ///
    /// Empty is the only user-visible failure: if the pop index has caught
    /// up with the push index there is nothing to claim and no state
    /// changes. Otherwise the claim always yields an item, spinning only
    /// as long as the item's producer is still publishing.
    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.try_pop_with_seq().map(|(value, _)| value)
    }

    /// Dequeue one item together with its claimed sequence number.
    pub fn try_pop_with_seq(&self) -> Result<(T, usize), QueueError> {
        let mut index = self.pop_index.load(Ordering::Acquire);
        loop {
            if index == self.push_index.load(Ordering::Acquire) {
                return Err(QueueError::Empty);
            }
            match self.pop_index.compare_exchange_weak(
                index,
                index + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => index = observed,
            }
        }

        let shard = index % self.shards.len();
        let rank = index / self.shards.len();
        // SAFETY: the claim is unique and below the push index, so exactly
        // one push owns the same slot; shard and rank are derived from it.
        let value = unsafe { self.shards[shard].pop(rank, self.page_capacity, &self.alloc) };
        Ok((value, index))
    }

    /// Pop items until the queue reports empty or `stop` returns true.
    ///
    /// Returns the number of items consumed. This is the building block
    /// for batch-while-busy consumers: drain everything available, then
    /// use the empty return as the moment to flush downstream.
    pub fn drain<F>(&self, mut stop: F) -> usize
    where
        F: FnMut(T) -> bool,
    {
        let mut drained = 0;
        while let Ok(value) = self.try_pop() {
            drained += 1;
            if stop(value) {
                break;
            }
        }
        drained
    }
}

impl<T, A> fmt::Debug for ShardedQueue<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedQueue")
            .field("shards", &self.shard_count())
            .field("page_capacity", &self.page_capacity)
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T, A> Drop for ShardedQueue<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn drop(&mut self) {
        // Remaining items leave through the consumer protocol so every
        // value is dropped exactly once.
        while self.try_pop().is_ok() {}

        // What's left on each chain is raw storage: the current page,
        // anything after it, and the look-ahead page. No slot still holds
        // a value.
        for shard in &mut self.shards {
            let mut page = shard.take_chain();
            while let Some(live) = NonNull::new(page) {
                // SAFETY: `&mut self` means no other thread touches the
                // chain; every linked page was allocated with this
                // capacity on this allocator.
                unsafe {
                    page = live.as_ref().next();
                    Page::free(live, self.page_capacity, &self.alloc);
                }
            }
        }
    }
}

// SAFETY: values cross threads only by move through slots guarded by the
// publication protocol, and all shared queue state is atomic. `T: Send` is
// exactly what moving values between threads requires; the allocator is
// thread-safe by the `PageAlloc` contract.
unsafe impl<T, A> Send for ShardedQueue<T, A>
where
    T: Send,
    A: PageAlloc,
{
}

unsafe impl<T, A> Sync for ShardedQueue<T, A>
where
    T: Send,
    A: PageAlloc,
{
}

/// Builder for configuring and creating sharded queues.
///
/// Obtained from [`queue`]. All parameters have sensible defaults:
/// [`DEFAULT_SHARD_COUNT`] shards, a page capacity derived from the
/// element size (see [`default_page_capacity`]), and heap-backed pages.
///
/// # Examples
///
/// ```rust
/// use paquet::{alloc::CountingAlloc, queue::queue};
///
/// # fn main() -> Result<(), paquet::QueueError> {
/// let q = queue::<u64>()
///     .shards(4)
///     .page_capacity(128)
///     .allocator(CountingAlloc::default())
///     .build()?;
///
/// assert_eq!(q.shard_count(), 4);
/// assert_eq!(q.page_capacity(), 128);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueueBuilder<T, A = Heap>
where
    T: Send,
    A: PageAlloc,
{
    shard_count: usize,
    page_capacity: Option<usize>,
    alloc: A,
    _marker: PhantomData<T>,
}

impl<T: Send> QueueBuilder<T, Heap> {
    /// Create a builder with default configuration.
    pub const fn new() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            page_capacity: None,
            alloc: Heap,
            _marker: PhantomData,
        }
    }
}

impl<T: Send> Default for QueueBuilder<T, Heap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A> QueueBuilder<T, A>
where
    T: Send,
    A: PageAlloc,
{
    /// Set the number of shards (must be nonzero).
    #[must_use]
    pub const fn shards(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Set the number of slots per page (must be nonzero), overriding the
    /// size-derived default.
    #[must_use]
    pub const fn page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = Some(capacity);
        self
    }

    /// Use a custom page allocator.
    #[must_use]
    pub fn allocator<B: PageAlloc>(self, alloc: B) -> QueueBuilder<T, B> {
        QueueBuilder {
            shard_count: self.shard_count,
            page_capacity: self.page_capacity,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Build the queue.
    pub fn build(self) -> Result<Arc<ShardedQueue<T, A>>, QueueError> {
        let page_capacity = self.page_capacity.unwrap_or(default_page_capacity::<T>());
        Ok(Arc::new(ShardedQueue::with_alloc(
            self.shard_count,
            page_capacity,
            self.alloc,
        )?))
    }

    /// Build the queue and return a producer/consumer handle pair.
    pub fn channels(self) -> Result<(Producer<T, A>, Consumer<T, A>), QueueError> {
        let queue = self.build()?;
        Ok((queue.producer(), queue.consumer()))
    }
}

/// Create a queue builder for element type `T`.
///
/// This is the primary entry point of the crate.
///
/// # Examples
///
/// ```rust
/// use paquet::{
///     queue::queue,
///     traits::{QueueConsumer, QueueProducer},
/// };
///
/// # fn main() -> Result<(), paquet::QueueError> {
/// let (producer, consumer) = queue::<u64>().channels()?;
///
/// producer.push(42);
/// assert_eq!(consumer.try_pop()?, 42);
/// # Ok(())
/// # }
/// ```
pub const fn queue<T: Send>() -> QueueBuilder<T, Heap> {
    QueueBuilder::new()
}

// Type aliases for common configurations

/// Convenient type alias for [`QueueProducerHandle`].
pub type Producer<T, A = Heap> = QueueProducerHandle<T, A>;

/// Convenient type alias for [`QueueConsumerHandle`].
pub type Consumer<T, A = Heap> = QueueConsumerHandle<T, A>;

/// Producer handle for a sharded queue.
///
/// A lightweight, cloneable handle for pushing items. Any number of
/// producer handles can coexist; each clone shares the same queue through
/// an `Arc`.
pub struct QueueProducerHandle<T, A = Heap>
where
    T: Send,
    A: PageAlloc,
{
    queue: Arc<ShardedQueue<T, A>>,
}

impl<T, A> Clone for QueueProducerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T, A> fmt::Debug for QueueProducerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducerHandle")
            .field("queue", &self.queue)
            .finish()
    }
}

impl<T, A> QueueProducer<T> for QueueProducerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn push(&self, value: T) {
        self.queue.push(value);
    }

    fn push_with_seq(&self, value: T) -> usize {
        self.queue.push_with_seq(value)
    }
}

/// Consumer handle for a sharded queue.
///
/// A lightweight, cloneable handle for popping items. Any number of
/// consumer handles can coexist; each clone shares the same queue through
/// an `Arc`.
pub struct QueueConsumerHandle<T, A = Heap>
where
    T: Send,
    A: PageAlloc,
{
    queue: Arc<ShardedQueue<T, A>>,
}

impl<T, A> Clone for QueueConsumerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T, A> fmt::Debug for QueueConsumerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumerHandle")
            .field("queue", &self.queue)
            .finish()
    }
}

impl<T, A> QueueConsumer<T> for QueueConsumerHandle<T, A>
where
    T: Send,
    A: PageAlloc,
{
    fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.try_pop()
    }

    fn try_pop_with_seq(&self) -> Result<(T, usize), QueueError> {
        self.queue.try_pop_with_seq()
    }

    fn drain<F>(&self, stop: F) -> usize
    where
        F: FnMut(T) -> bool,
    {
        self.queue.drain(stop)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn count(&self) -> usize {
        self.queue.count()
    }
}

impl<T, A> QueueFactory<T> for Arc<ShardedQueue<T, A>>
where
    T: Send,
    A: PageAlloc,
{
    type Producer = QueueProducerHandle<T, A>;
    type Consumer = QueueConsumerHandle<T, A>;

    fn producer(&self) -> Self::Producer {
        QueueProducerHandle {
            queue: self.clone(),
        }
    }

    fn consumer(&self) -> Self::Consumer {
        QueueConsumerHandle {
            queue: self.clone(),
        }
    }
}
