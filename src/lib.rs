//! # Paquet: A Sharded, Paged, Lock-Free MPMC Queue
//!
//! Paquet is an unbounded, lock-free Multi-Producer Multi-Consumer (MPMC)
//! queue that trades a single contended ring for an array of independent
//! *shards*, each holding a chain of fixed-capacity *pages* of slots.
//!
//! ## Features
//!
//! - **Lock-free operations**: `push` is wait-free at the index level,
//!   `try_pop` is lock-free; no mutex anywhere on the hot path
//! - **MPMC support**: any number of producers and consumers can operate
//!   concurrently
//! - **Sharded index space**: a global counter claims a unique slot per
//!   operation, and the claimed index routes it to one of N sub-queues,
//!   spreading contention across cache lines
//! - **Paged storage**: values live in page-sized blocks that are allocated
//!   one step ahead of the producers and recycled whole once drained, so
//!   steady-state operation amortizes allocation across a full page of
//!   items
//! - **Move semantics**: values are moved in and out; element types need
//!   only be `Send` — no `Copy`, `Clone`, or `Default` bounds
//! - **Pluggable allocation**: page storage goes through the [`PageAlloc`]
//!   trait, so pages can come from the heap, an arena, or an instrumented
//!   wrapper
//!
//! ## Quick start
//!
//! ```rust
//! use paquet::{
//!     queue::queue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//!
//! # fn main() -> Result<(), paquet::QueueError> {
//! let (producer, consumer) = queue::<u64>().channels()?;
//!
//! producer.push(42);
//! assert_eq!(consumer.try_pop()?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread safety
//!
//! All handles are `Send + Sync` and cheap to clone; clones share the same
//! queue through an `Arc`:
//!
//! ```rust
//! use paquet::{
//!     queue::queue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), paquet::QueueError> {
//! let (producer, consumer) = queue::<usize>().channels()?;
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let producer = producer.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 producer.push(id * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! let mut total = 0;
//! while consumer.try_pop().is_ok() {
//!     total += 1;
//! }
//! assert_eq!(total, 400);
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch while busy, flush when idle
//!
//! `try_pop` returns immediately on an empty queue, which makes the queue a
//! natural buffer in front of a single writer thread: the writer drains
//! records while they keep coming and uses the `Empty` outcome as its cue
//! to flush previously buffered output.
//!
//! ```rust
//! use paquet::{
//!     QueueError,
//!     queue::queue,
//!     traits::{QueueConsumer, QueueProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), paquet::QueueError> {
//! let (producer, consumer) = queue::<String>().channels()?;
//!
//! for i in 0..3 {
//!     producer.push(format!("record {i}"));
//! }
//!
//! let writer = thread::spawn(move || {
//!     let mut buffered = Vec::new();
//!     let mut flushed = Vec::new();
//!     loop {
//!         match consumer.try_pop() {
//!             // Batch while records keep coming.
//!             Ok(record) => buffered.push(record),
//!             // Queue went idle: flush what we have.
//!             Err(QueueError::Empty) => {
//!                 flushed.append(&mut buffered);
//!                 break;
//!             },
//!             Err(e) => panic!("unexpected queue error: {e:?}"),
//!         }
//!     }
//!     flushed
//! });
//!
//! assert_eq!(writer.join().unwrap().len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Ordering guarantees
//!
//! Each operation claims a unique, monotonically increasing global index.
//! Items that map to the *same shard* are produced and consumed in index
//! order at page granularity, and a single producer observed by a single
//! consumer sees strict FIFO order. Across shards there is no global FIFO
//! guarantee: concurrent pushes from different threads may be popped in an
//! order that differs from wall-clock push order.
//!
//! `try_pop` never blocks waiting for new items: it reports
//! [`QueueError::Empty`] immediately when every claimed index has already
//! been consumed. It may, however, briefly spin for a claimed item whose
//! producer has not yet published — that wait is bounded by the producer's
//! own lock-free progress.
//!
//! ## Memory layout
//!
//! - One page is a single allocation: a header plus a slot array sized at
//!   construction from the element type (smaller values get more slots per
//!   page; see [`default_page_capacity`])
//! - Each slot is a value cell plus a one-shot publication flag; slots are
//!   used exactly once and the page is recycled as a whole
//! - The producer and consumer halves of every shard live on separate
//!   cache lines to keep push and pop traffic from false sharing
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! Paquet requires Rust 1.88 or later.
#![deny(
    missing_docs,
    unused_imports,
    unused_variables,
    dead_code,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::inline_always
)]

/// Pluggable page allocation.
///
/// This module defines the [`PageAlloc`] trait used for all page storage,
/// the default [`Heap`] allocator, and the [`CountingAlloc`] wrapper that
/// tracks allocation and free counts for diagnostics and tests.
///
/// [`PageAlloc`]: alloc::PageAlloc
/// [`Heap`]: alloc::Heap
/// [`CountingAlloc`]: alloc::CountingAlloc
pub mod alloc;

/// Core sharded queue implementation.
///
/// This module provides [`ShardedQueue`], the [`QueueBuilder`] used to
/// configure it, and the producer/consumer handles that share a queue
/// through an `Arc`.
///
/// [`ShardedQueue`]: queue::ShardedQueue
/// [`QueueBuilder`]: queue::QueueBuilder
pub mod queue;

/// Common traits for queue producers, consumers, and factories.
///
/// This module defines the abstractions implemented by the handle types:
/// [`QueueProducer`], [`QueueConsumer`], and [`QueueFactory`].
///
/// [`QueueProducer`]: traits::QueueProducer
/// [`QueueConsumer`]: traits::QueueConsumer
/// [`QueueFactory`]: traits::QueueFactory
pub mod traits;

mod page;
mod shard;

use crossbeam_utils::Backoff;
use thiserror::Error;

#[doc(inline)]
pub use self::alloc::PageAlloc;

/// Errors that can occur during queue construction and use.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue contains no elements to consume.
    ///
    /// This is the normal outcome of `try_pop` on a drained queue, not an
    /// exceptional condition; it carries no allocation and callers are
    /// expected to handle it on their fast path.
    #[error("queue is empty")]
    Empty,

    /// The allocator could not provide the initial page for every shard.
    ///
    /// Returned only at construction time. A failed page allocation during
    /// `push` is fatal to the pushing thread instead — see
    /// [`ShardedQueue::push`](queue::ShardedQueue::push).
    #[error("page allocation failed")]
    AllocationFailed,

    /// The requested configuration is invalid.
    ///
    /// Shard count and page capacity must both be nonzero.
    #[error("invalid configuration: shard count and page capacity must be nonzero")]
    InvalidCapacity,
}

/// Default number of slots per page for an element type, keyed on its size.
///
/// Larger values get fewer slots per page so that one page stays within a
/// bounded footprint, while smaller values get more slots to keep page
/// transitions rare:
///
/// | `size_of::<T>()` | slots per page |
/// |------------------|----------------|
/// | 0–4              | 64             |
/// | 5–8              | 32             |
/// | 9–16             | 16             |
/// | 17–32            | 8              |
/// | 33–64            | 4              |
/// | 65–128           | 2              |
/// | larger           | 1              |
///
/// This is the capacity a [`QueueBuilder`](queue::QueueBuilder) uses unless
/// overridden with [`page_capacity`](queue::QueueBuilder::page_capacity).
pub const fn default_page_capacity<T>() -> usize {
    match size_of::<T>() {
        0..=4 => 64,
        5..=8 => 32,
        9..=16 => 16,
        17..=32 => 8,
        33..=64 => 4,
        65..=128 => 2,
        _ => 1,
    }
}

/// Spin until `ready` returns true, yielding the thread after a few busy
/// iterations.
///
/// This is the single wait primitive behind every gate in the queue: the
/// page-transition gates on both the producer and consumer side, and the
/// per-slot publication wait. The backoff policy is a performance knob,
/// not a correctness one.
#[inline]
pub(crate) fn spin_until(mut ready: impl FnMut() -> bool) {
    let backoff = Backoff::new();
    while !ready() {
        backoff.snooze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_capacity_buckets() {
        assert_eq!(default_page_capacity::<()>(), 64);
        assert_eq!(default_page_capacity::<u32>(), 64);
        assert_eq!(default_page_capacity::<u64>(), 32);
        assert_eq!(default_page_capacity::<u128>(), 16);
        assert_eq!(default_page_capacity::<[u8; 32]>(), 8);
        assert_eq!(default_page_capacity::<[u8; 64]>(), 4);
        assert_eq!(default_page_capacity::<[u8; 128]>(), 2);
        assert_eq!(default_page_capacity::<[u8; 129]>(), 1);
        assert_eq!(default_page_capacity::<[u8; 4096]>(), 1);
    }

    #[test]
    fn spin_until_observes_progress() {
        let mut calls = 0;
        spin_until(|| {
            calls += 1;
            calls >= 3
        });
        assert_eq!(calls, 3);
    }
}
