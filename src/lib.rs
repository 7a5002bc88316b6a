//! Durable, single-process FIFO message queue engine backed by an ordered
//! embedded store.
//!
//! Producers enqueue items; consumers check an item out, then either
//! confirm its removal or return it to the front of the queue for
//! redelivery. Large items stream as an ordered sequence of chunks so
//! memory stays bounded regardless of item size, and consumers may wait
//! with a deadline until an item becomes available.
//!
//! The engine owns one [`journal::Journal`], an ordered key-value store
//! holding queue entries and chunk payloads in a single keyspace, and
//! assumes nothing of it beyond ordered iteration, point get/put/delete,
//! and crash-durable writes. The production journal is backed by `redb`;
//! a deterministic in-memory journal backs tests and simulations.
//!
//! Non-goals: multi-process access to one journal, replication, priority
//! ordering (delivery is strict FIFO by enqueue order), and transactions
//! spanning items. Protocol parsing, sockets, and configuration live in
//! the layers above.
//!
//! # Example
//!
//! ```
//! use hopper::Queue;
//!
//! let dir = tempfile::tempdir()?;
//! let queue = Queue::open(dir.path().join("jobs.redb"))?;
//!
//! let id = queue.push(b"hello")?;
//! assert_eq!(queue.count(), 1);
//!
//! let (popped, _body) = queue.pop_open()?;
//! assert_eq!(popped, id);
//! queue.pop_close(true, popped, None)?;
//! assert_eq!(queue.count(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod header;
pub mod journal;
pub mod key;
pub mod queue;

pub use header::Header;
pub use journal::{Journal, MemoryJournal, RedbJournal};
pub use key::{Key, Kind};
pub use queue::stats::Stats;
pub use queue::streams::{ItemReader, ItemWriter};
pub use queue::{Error, ItemBody, Queue, MAX_INLINE_LEN};
