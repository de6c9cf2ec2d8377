//! Shards: independent page chains with page-transition gates.
//!
//! A shard owns one singly-linked chain of pages bounded by `head` (oldest
//! page with unconsumed slots, owned by consumers) and `tail` (newest page
//! accepting writes, owned by producers). Operations routed to a shard are
//! ranked 0, 1, 2, ... in claim order; rank `r` lands in page `r / P` at
//! offset `r % P`, where `P` is the page capacity.
//!
//! Two completion counters gate page transitions. `push_seq` counts
//! producer operations that have passed their handoff point, `pop_seq` the
//! consumer equivalent. The gates derive from them:
//!
//! - an operation on page `p` may proceed once its counter reaches
//!   `p * P` — every operation on earlier pages has completed, so the
//!   chain pointer now designates page `p`
//! - the operation at offset `P - 1` is the sole one that moves the chain
//!   pointer, and may only do so once the counter reaches its own rank —
//!   every sibling on the page has completed
//!
//! Both conditions are monotonic: the counter cannot pass the gated value
//! while the gating operation is still in flight, because every later
//! operation sits behind a gate that requires this one to finish first.
//!
//! The counters order page handoffs, not data. Data readiness is carried
//! per slot by its publication flag, which each producer sets as its final
//! page access — after the optional tail advance and its own counter
//! increment. That ordering is what makes retirement safe: a consumer can
//! only reach a slot after its producer is completely done with the page,
//! so when the last consumer of a page returns it to the allocator, no
//! producer can still be touching it.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::alloc::PageAlloc;
use crate::page::Page;
use crate::spin_until;

/// Producer half: written by pushers only.
struct ProducerSide<T> {
    tail: AtomicPtr<Page<T>>,
    push_seq: AtomicUsize,
}

/// Consumer half: written by poppers only.
struct ConsumerSide<T> {
    head: AtomicPtr<Page<T>>,
    pop_seq: AtomicUsize,
}

/// One independent sub-queue.
///
/// The two halves are cache-padded so that producer traffic on
/// `tail`/`push_seq` does not bounce the line carrying `head`/`pop_seq`.
pub(crate) struct Shard<T> {
    producer: CachePadded<ProducerSide<T>>,
    consumer: CachePadded<ConsumerSide<T>>,
}

impl<T> Shard<T> {
    /// A new shard whose chain is the single empty page `first`.
    pub(crate) fn new(first: NonNull<Page<T>>) -> Self {
        Self {
            producer: CachePadded::new(ProducerSide {
                tail: AtomicPtr::new(first.as_ptr()),
                push_seq: AtomicUsize::new(0),
            }),
            consumer: CachePadded::new(ConsumerSide {
                head: AtomicPtr::new(first.as_ptr()),
                pop_seq: AtomicUsize::new(0),
            }),
        }
    }

    /// Producer protocol for one claimed slot.
    ///
    /// `rank` is the operation's claim rank within this shard and `spare`
    /// is the pre-allocated look-ahead page, present exactly when this
    /// operation owns the first slot of a page.
    ///
    /// # Safety
    ///
    /// `rank` must come from a unique global index claim routed to this
    /// shard, `capacity` must be the queue's page capacity, and `spare`
    /// must be an unlinked page allocated with that capacity.
    pub(crate) unsafe fn push(
        &self,
        rank: usize,
        capacity: usize,
        spare: Option<NonNull<Page<T>>>,
        value: T,
    ) {
        let page_rank = rank / capacity;
        let offset = rank % capacity;
        let seq = &self.producer.push_seq;

        debug_assert_eq!(spare.is_some(), offset == 0);

        // Wait until every producer on earlier pages is done; only then
        // does `tail` designate this operation's page.
        spin_until(|| seq.load(Ordering::Acquire) >= page_rank * capacity);

        let tail = self.producer.tail.load(Ordering::Relaxed);
        if let Some(spare) = spare {
            // Hang the look-ahead page off the chain. The tail pointer
            // itself only moves once this page is confirmed full.
            // SAFETY: `tail` is live — the page gate above ordered us
            // after the producer that installed it, and it cannot be
            // retired before its slots (including ours) are consumed.
            unsafe { (*tail).set_next(spare) };
        }

        if offset + 1 == capacity {
            // Sole owner of the tail advance. Wait out the sibling
            // producers so the next page's gate cannot open before the
            // pointer moves.
            spin_until(|| seq.load(Ordering::Acquire) >= rank);
            // SAFETY: `tail` is live (as above); the successor was linked
            // by this page's first producer, whose completion the gate
            // just observed.
            let next = unsafe { (*tail).next() };
            debug_assert!(!next.is_null());
            self.producer.tail.store(next, Ordering::Relaxed);
        }

        // Handoff point: the release pairs with the acquire gates above,
        // publishing the link and tail stores along with the count.
        seq.fetch_add(1, Ordering::Release);

        // Write and publish last. Once the flag is set this thread never
        // touches the page again, which is what permits the consumer side
        // to retire it (see module docs).
        // SAFETY: the claim owns this slot exclusively and fills it once.
        unsafe { Page::slot(tail, offset).fill(value) };
    }

    /// Consumer protocol for one claimed slot. Returns the value.
    ///
    /// The slot's producer may still be in flight; this waits for the
    /// publication flag. If the slot is the last of its page, the page is
    /// retired and returned to `alloc`.
    ///
    /// # Safety
    ///
    /// `rank` must come from a unique pop claim routed to this shard (so
    /// a matching push claim exists), `capacity` must be the queue's page
    /// capacity, and `alloc` must be the allocator that produced this
    /// shard's pages.
    pub(crate) unsafe fn pop<A: PageAlloc>(&self, rank: usize, capacity: usize, alloc: &A) -> T {
        let page_rank = rank / capacity;
        let offset = rank % capacity;
        let seq = &self.consumer.pop_seq;

        // Wait until every consumer on earlier pages is done; only then
        // does `head` designate this operation's page.
        spin_until(|| seq.load(Ordering::Acquire) >= page_rank * capacity);

        let head = self.consumer.head.load(Ordering::Relaxed);
        // SAFETY: `head` is live until its last slot is consumed, and
        // `offset` is in bounds for the page capacity.
        let slot = unsafe { Page::slot(head, offset) };
        spin_until(|| slot.is_ready());
        // SAFETY: published, and this claim owns the slot exclusively.
        let value = unsafe { slot.take() };

        if offset + 1 == capacity {
            // Sole owner of the head advance and the page free. Wait out
            // the sibling consumers first: their reads must all precede
            // the free, and the next page's gate must not open before the
            // pointer moves.
            spin_until(|| seq.load(Ordering::Acquire) >= rank);
            // SAFETY: the successor link was installed by the producer
            // side before our slot's flag was published.
            let next = unsafe { (*head).next() };
            debug_assert!(!next.is_null());
            self.consumer.head.store(next, Ordering::Relaxed);
            seq.fetch_add(1, Ordering::Release);
            // SAFETY: every slot of `head` has been consumed and every
            // producer and sibling consumer is done with it; nothing can
            // reach the page again.
            unsafe { Page::free(NonNull::new_unchecked(head), capacity, alloc) };
        } else {
            seq.fetch_add(1, Ordering::Release);
        }

        value
    }

    /// Detach the chain for teardown, returning its first page.
    ///
    /// Exclusive access makes the raw chain walk in the queue's `Drop`
    /// safe; no protocol runs after this.
    pub(crate) fn take_chain(&mut self) -> *mut Page<T> {
        let head = *self.consumer.head.get_mut();
        *self.consumer.head.get_mut() = std::ptr::null_mut();
        *self.producer.tail.get_mut() = std::ptr::null_mut();
        head
    }
}
