//! Durable FIFO queue engine.
//!
//! [`Queue`] composes the journal, the cursors that partition it, and the
//! wait coordinator. Producers `push` items (or stream them chunk by chunk
//! through an [`ItemWriter`](streams::ItemWriter)); consumers check items
//! out with `pop_open`, then either confirm removal or return them to the
//! front of the queue with `pop_close`. Consumers may `wait` with a
//! deadline until an item becomes available.
//!
//! # Journal layout
//!
//! The queue keyspace is partitioned by three cursors:
//!
//! ```text
//! --- < returned / opened > --- | TAIL | --- < enqueued > --- | HEAD |
//! ```
//!
//! Enqueued items are pushed at `head` and popped at `tail`. Items below
//! `tail` are either checked out by a consumer (tracked only in memory) or
//! sitting in the `returned` set awaiting redelivery in original id order.
//! Chunk ids are allocated from their own `chunks_head` cursor.
//!
//! # Delivery semantics
//!
//! Delivery is strict FIFO by item id, returned items first. Removal on
//! `pop_close(remove = true)` is exactly-once; a crash between `pop_open`
//! and `pop_close` loses only the in-memory open set, so those items are
//! redelivered on restart (at-least-once across crashes).

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use snafu::{ensure, OptionExt, Snafu};
use tracing::{debug, info};

use crate::header::{frame_header, frame_inline, Header, TAG_HEADER, TAG_INLINE};
use crate::journal::{self, Journal, RedbJournal};
use crate::key::{Key, Kind};

pub mod stats;
pub mod streams;
mod waiters;

use stats::Stats;
use waiters::Waiters;

/// Largest payload stored inline in a queue record.
///
/// Single-chunk items up to this size skip the chunk keyspace entirely and
/// live as one journal record.
pub const MAX_INLINE_LEN: usize = 32 * 1024;

/// Errors from queue operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The backing journal failed.
    #[snafu(context(false))]
    #[snafu(display("journal error: {source}"))]
    Journal {
        /// Underlying journal error.
        source: journal::Error,
    },

    /// `pop_open` on an empty queue.
    #[snafu(display("queue is empty"))]
    Empty,

    /// A `wait` deadline elapsed before an item became available.
    #[snafu(display("timed out waiting for an item"))]
    Timeout,

    /// The queue was dropped while a waiter was pending.
    #[snafu(display("queue closed while waiting"))]
    Closed,

    /// A chunk referenced by a live header is missing.
    ///
    /// Indicates a corrupt journal or a logic bug in the caller.
    #[snafu(display("chunk {id} missing from journal"))]
    ChunkMissing {
        /// The missing chunk id.
        id: u64,
    },

    /// A queue entry the cursors account for is missing.
    #[snafu(display("queue record {id} missing from journal"))]
    EntryMissing {
        /// The missing item id.
        id: u64,
    },

    /// A queue entry could not be decoded.
    #[snafu(display("queue record {id} is corrupt: {reason}"))]
    CorruptEntry {
        /// The item id.
        id: u64,
        /// What failed to decode.
        reason: &'static str,
    },

    /// A writer stream wrote more chunks than it reserved.
    #[snafu(display("wrote more chunks than reserved ({reserved})"))]
    ChunkOverflow {
        /// Number of chunks the stream reserved.
        reserved: u64,
    },

    /// A writer stream finished before writing every reserved chunk.
    #[snafu(display("item incomplete: wrote {written} of {reserved} chunks"))]
    ShortItem {
        /// Chunks written so far.
        written: u64,
        /// Chunks the stream reserved.
        reserved: u64,
    },
}

/// What `pop_open` found in the queue record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemBody {
    /// The whole payload, stored inline.
    Inline(Vec<u8>),
    /// A header naming the chunk range holding the payload.
    Chunked(Header),
}

/// Cursor state, auxiliary sets, and the waiter list.
///
/// Guarded by one mutex held for the duration of a single operation and
/// never across an await. `head` and `tail` are monotonic for the process
/// lifetime; `tail <= head`; every id in `[tail, head)` and every id in
/// `returned` has a live journal record, except gaps below the pre-restart
/// tail left by out-of-order removals (`pop_open` skips those).
#[derive(Debug, Default)]
struct State {
    /// Next item id to assign.
    head: u64,
    /// Smallest id that has never been popped.
    tail: u64,
    /// Next chunk id to assign.
    chunks_head: u64,
    /// Items below `tail` released for redelivery.
    returned: BTreeSet<u64>,
    /// Items below `tail` currently checked out by a consumer.
    open_count: u64,
    /// Live chunk records, for statistics.
    chunk_count: u64,
    /// Consumers parked until an item becomes available.
    waiters: Waiters,
}

impl State {
    /// Items visible to consumers. Excludes checked-out items.
    fn count(&self) -> u64 {
        (self.head - self.tail) + self.returned.len() as u64
    }
}

/// A durable FIFO queue over an ordered journal.
///
/// All methods take `&self`: the facade serializes itself internally, and
/// the checkout model needs several short-lived streams borrowing the queue
/// at once. Every operation is synchronous (journal I/O blocks in place);
/// only the future returned by [`Queue::wait`] suspends.
#[derive(Debug)]
pub struct Queue<J: Journal = RedbJournal> {
    journal: J,
    state: Mutex<State>,
}

impl Queue<RedbJournal> {
    /// Open or create the queue journaled at `path`.
    ///
    /// Fails if the store cannot be opened or was written under a different
    /// key ordering ([`journal::Error::ComparatorMismatch`]).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let journal = RedbJournal::open(path)?;
        Self::with_journal(journal)
    }
}

impl<J: Journal> Queue<J> {
    /// Build a queue over an already-open journal, restoring cursors from
    /// its contents.
    ///
    /// `tail` becomes the smallest queue id present, `head` one past the
    /// largest, `chunks_head` one past the largest chunk id; all default to
    /// zero for an empty journal. The open set and returned set start
    /// empty, so items that were checked out when the process died are
    /// delivered again.
    pub fn with_journal(journal: J) -> Result<Self, Error> {
        let mut state = State::default();
        let mut first_item: Option<u64> = None;
        let mut last_item: Option<u64> = None;
        let mut last_chunk: Option<u64> = None;
        let mut chunk_count: u64 = 0;

        journal.scan(&mut |key| match key.kind {
            Kind::Queue => {
                if first_item.is_none() {
                    first_item = Some(key.id);
                }
                last_item = Some(key.id);
            }
            Kind::Chunk => {
                last_chunk = Some(key.id);
                chunk_count += 1;
            }
        })?;

        state.tail = first_item.unwrap_or(0);
        state.head = last_item.map_or(0, |id| id + 1);
        state.chunks_head = last_chunk.map_or(0, |id| id + 1);
        state.chunk_count = chunk_count;

        info!(
            head = state.head,
            tail = state.tail,
            chunks_head = state.chunks_head,
            chunks = state.chunk_count,
            path = %journal.path().display(),
            "queue opened"
        );

        Ok(Self {
            journal,
            state: Mutex::new(state),
        })
    }

    // Operations never panic while holding the lock, so it cannot poison.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("queue state lock poisoned")
    }

    /// Number of items available to consumers.
    ///
    /// Counts enqueued and returned items; items currently checked out are
    /// excluded until they are returned.
    pub fn count(&self) -> u64 {
        self.state().count()
    }

    /// Wait up to `timeout` for an item to become available.
    ///
    /// Waiters are served in arrival order; each receives at most one
    /// availability signal. The signal means opportunity, not reservation:
    /// the caller should then attempt `pop_open` and may still find the
    /// queue drained by another consumer. Resolves [`Error::Timeout`] if
    /// the deadline passes first and [`Error::Closed`] if the queue is
    /// dropped while waiting.
    pub fn wait(&self, timeout: Duration) -> impl Future<Output = Result<(), Error>> + Send {
        let receiver = {
            let mut state = self.state();
            state.waiters.sweep();
            let alone = state.waiters.is_empty();
            let receiver = state.waiters.register();
            // An item already sitting in the queue satisfies a lone waiter
            // at once; behind earlier waiters, this one waits its turn.
            if alone && state.count() > 0 {
                state.waiters.wake(1);
            }
            receiver
        };
        async move {
            match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => ClosedSnafu.fail(),
                Err(_) => TimeoutSnafu.fail(),
            }
        }
    }

    /// Enqueue a small item stored inline, returning its id.
    ///
    /// The record is durable before this returns. On journal failure the
    /// head cursor does not advance.
    pub fn push(&self, value: &[u8]) -> Result<u64, Error> {
        self.push_framed(&frame_inline(value))
    }

    /// Enqueue the header of a streamed item, returning its id.
    ///
    /// Call after writing every chunk in `[header.beg, header.end)`; the
    /// facade does not verify their presence (the writer stream does).
    pub fn push_header(&self, header: &Header) -> Result<u64, Error> {
        self.push_framed(&frame_header(header))
    }

    fn push_framed(&self, framed: &[u8]) -> Result<u64, Error> {
        let mut state = self.state();
        let id = state.head;
        self.journal.put(Key::queue(id), framed)?;
        state.head += 1;
        debug!(id, "pushed item");
        // Exactly one item became available.
        state.waiters.wake(1);
        Ok(id)
    }

    /// Check out the next item, removing it from the visible queue.
    ///
    /// Returned items are delivered before never-opened items, each in
    /// original enqueue order. The item stays in the journal until
    /// [`Queue::pop_close`] confirms or returns it. Fails [`Error::Empty`]
    /// when nothing is available.
    pub fn pop_open(&self) -> Result<(u64, ItemBody), Error> {
        let mut state = self.state();

        loop {
            // Select without committing: a journal failure below must leave
            // the cursors untouched.
            let (id, redelivery) = if let Some(id) = state.returned.iter().next().copied() {
                (id, true)
            } else if state.tail < state.head {
                (state.tail, false)
            } else {
                return EmptySnafu.fail();
            };

            let Some(raw) = self.journal.get(Key::queue(id))? else {
                // Items confirmed out of order before a restart leave gaps
                // between the recomputed tail and head. Returned ids always
                // have live records.
                ensure!(!redelivery, EntryMissingSnafu { id });
                state.tail += 1;
                debug!(id, "skipped gap left by a pre-restart removal");
                continue;
            };
            let body = decode_value(id, &raw)?;

            if redelivery {
                state.returned.remove(&id);
            } else {
                state.tail += 1;
            }
            state.open_count += 1;
            debug!(id, redelivery, "opened item");
            return Ok((id, body));
        }
    }

    /// Finish a checkout started by [`Queue::pop_open`].
    ///
    /// With `remove = true` the queue record is deleted, along with every
    /// chunk of `header` if one is supplied; the item is gone exactly once.
    /// With `remove = false` the item returns to the queue and is
    /// redelivered before any item with a larger id.
    ///
    /// The header and chunk deletions are separate journal writes; a crash
    /// between them leaves orphan chunks, which are unreachable and
    /// harmless.
    pub fn pop_close(&self, remove: bool, id: u64, header: Option<&Header>) -> Result<(), Error> {
        let mut state = self.state();
        debug_assert!(state.open_count > 0, "pop_close without matching pop_open");

        if remove {
            self.journal.delete(Key::queue(id))?;
            if let Some(header) = header {
                self.erase_chunks_locked(&mut state, header)?;
            }
            state.open_count = state.open_count.saturating_sub(1);
            debug!(id, "removed item");
        } else {
            state.returned.insert(id);
            state.open_count = state.open_count.saturating_sub(1);
            debug!(id, "returned item");
            // Exactly one item became available again.
            state.waiters.wake(1);
        }
        Ok(())
    }

    /// Reserve a range of `chunks` fresh chunk ids.
    ///
    /// Purely an in-memory allocation; no journal write happens. The
    /// returned header's `size` is zero, to be filled in as chunks are
    /// appended.
    pub fn reserve_chunks(&self, chunks: u64) -> Header {
        let mut state = self.state();
        let beg = state.chunks_head;
        state.chunks_head += chunks;
        Header {
            beg,
            end: beg + chunks,
            size: 0,
        }
    }

    /// Durably write one chunk at a reserved id.
    pub fn write_chunk(&self, value: &[u8], chunk_id: u64) -> Result<(), Error> {
        let mut state = self.state();
        self.journal.put(Key::chunk(chunk_id), value)?;
        state.chunk_count += 1;
        Ok(())
    }

    /// Read the chunk at `chunk_id`.
    ///
    /// Fails [`Error::ChunkMissing`] if no such record exists.
    pub fn read_chunk(&self, chunk_id: u64) -> Result<Vec<u8>, Error> {
        self.journal
            .get(Key::chunk(chunk_id))?
            .context(ChunkMissingSnafu { id: chunk_id })
    }

    /// Delete every chunk in `[header.beg, header.end)`.
    ///
    /// Missing chunks are skipped, so rolling back a partially written
    /// range is safe.
    pub fn erase_chunks(&self, header: &Header) -> Result<(), Error> {
        let mut state = self.state();
        self.erase_chunks_locked(&mut state, header)
    }

    fn erase_chunks_locked(&self, state: &mut State, header: &Header) -> Result<(), Error> {
        for chunk_id in header.beg..header.end {
            if self.journal.delete(Key::chunk(chunk_id))? {
                state.chunk_count = state.chunk_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Snapshot the queue's counters for the statistics reporter.
    pub fn stats(&self) -> Stats {
        let state = self.state();
        Stats {
            items: state.count(),
            open: state.open_count,
            returned: state.returned.len() as u64,
            chunks: state.chunk_count,
            journal_path: self.journal.path().to_path_buf(),
        }
    }

    /// Write statistics for this queue into `out`, one `STAT` line per
    /// counter.
    pub fn write_stats(&self, name: &str, out: &mut impl fmt::Write) -> fmt::Result {
        self.stats().render(name, out)
    }
}

/// Decode a tagged queue value into an item body.
fn decode_value(id: u64, raw: &[u8]) -> Result<ItemBody, Error> {
    match raw.split_first() {
        Some((&TAG_INLINE, payload)) => Ok(ItemBody::Inline(payload.to_vec())),
        Some((&TAG_HEADER, encoded)) => {
            let header = Header::decode(encoded).context(CorruptEntrySnafu {
                id,
                reason: "truncated header",
            })?;
            ensure!(
                header.beg <= header.end,
                CorruptEntrySnafu {
                    id,
                    reason: "inverted chunk range",
                }
            );
            Ok(ItemBody::Chunked(header))
        }
        Some(_) => CorruptEntrySnafu {
            id,
            reason: "unknown value tag",
        }
        .fail(),
        None => CorruptEntrySnafu {
            id,
            reason: "empty record",
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;

    fn queue() -> Queue<MemoryJournal> {
        Queue::with_journal(MemoryJournal::default()).expect("open queue")
    }

    #[test]
    fn push_assigns_sequential_ids() {
        let queue = queue();
        assert_eq!(queue.push(b"a").unwrap(), 0);
        assert_eq!(queue.push(b"b").unwrap(), 1);
        assert_eq!(queue.push(b"c").unwrap(), 2);
        assert_eq!(queue.count(), 3);
    }

    #[test]
    fn pop_open_is_fifo() {
        let queue = queue();
        queue.push(b"first").unwrap();
        queue.push(b"second").unwrap();

        let (id, body) = queue.pop_open().unwrap();
        assert_eq!(id, 0);
        assert_eq!(body, ItemBody::Inline(b"first".to_vec()));

        let (id, body) = queue.pop_open().unwrap();
        assert_eq!(id, 1);
        assert_eq!(body, ItemBody::Inline(b"second".to_vec()));
    }

    #[test]
    fn pop_open_empty_fails() {
        let queue = queue();
        assert!(matches!(queue.pop_open().unwrap_err(), Error::Empty));
    }

    #[test]
    fn open_items_are_invisible_to_count() {
        let queue = queue();
        queue.push(b"x").unwrap();
        assert_eq!(queue.count(), 1);

        let (id, _) = queue.pop_open().unwrap();
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.stats().open, 1);

        queue.pop_close(false, id, None).unwrap();
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.stats().open, 0);
        assert_eq!(queue.stats().returned, 1);
    }

    #[test]
    fn returned_items_precede_enqueued_items() {
        let queue = queue();
        queue.push(b"a").unwrap();
        queue.push(b"b").unwrap();

        let (id, _) = queue.pop_open().unwrap();
        assert_eq!(id, 0);
        queue.pop_close(false, id, None).unwrap();

        // Id 0 again, before id 1.
        let (id, body) = queue.pop_open().unwrap();
        assert_eq!(id, 0);
        assert_eq!(body, ItemBody::Inline(b"a".to_vec()));

        let (id, _) = queue.pop_open().unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn remove_deletes_the_record() {
        let queue = queue();
        queue.push(b"gone").unwrap();
        let (id, _) = queue.pop_open().unwrap();
        queue.pop_close(true, id, None).unwrap();

        assert_eq!(queue.count(), 0);
        assert!(matches!(queue.pop_open().unwrap_err(), Error::Empty));
    }

    #[test]
    fn chunk_roundtrip_and_erase() {
        let queue = queue();
        let mut header = queue.reserve_chunks(3);
        assert_eq!((header.beg, header.end), (0, 3));

        queue.write_chunk(b"aa", 0).unwrap();
        queue.write_chunk(b"bb", 1).unwrap();
        queue.write_chunk(b"cc", 2).unwrap();
        header.size = 6;
        assert_eq!(queue.stats().chunks, 3);

        let id = queue.push_header(&header).unwrap();
        let (popped, body) = queue.pop_open().unwrap();
        assert_eq!(popped, id);
        assert_eq!(body, ItemBody::Chunked(header));

        assert_eq!(queue.read_chunk(0).unwrap(), b"aa");
        assert_eq!(queue.read_chunk(1).unwrap(), b"bb");
        assert_eq!(queue.read_chunk(2).unwrap(), b"cc");

        queue.pop_close(true, id, Some(&header)).unwrap();
        assert_eq!(queue.stats().chunks, 0);
        assert!(matches!(
            queue.read_chunk(0).unwrap_err(),
            Error::ChunkMissing { id: 0 }
        ));
    }

    #[test]
    fn chunk_reservations_never_overlap() {
        let queue = queue();
        let first = queue.reserve_chunks(2);
        let second = queue.reserve_chunks(3);
        assert_eq!((first.beg, first.end), (0, 2));
        assert_eq!((second.beg, second.end), (2, 5));
    }

    #[test]
    fn read_missing_chunk_fails() {
        let queue = queue();
        assert!(matches!(
            queue.read_chunk(9).unwrap_err(),
            Error::ChunkMissing { id: 9 }
        ));
    }

    #[test]
    fn corrupt_entries_are_reported() {
        let journal = MemoryJournal::default();
        journal.put(Key::queue(0), &[9, 9, 9]).unwrap();
        let queue = Queue::with_journal(journal).unwrap();
        assert!(matches!(
            queue.pop_open().unwrap_err(),
            Error::CorruptEntry {
                id: 0,
                reason: "unknown value tag"
            }
        ));
    }

    #[test]
    fn count_matches_cursor_arithmetic_throughout() {
        let queue = queue();
        for i in 0..10u8 {
            queue.push(&[i]).unwrap();
            assert_eq!(queue.count(), u64::from(i) + 1);
        }
        let mut open = Vec::new();
        for i in 0..4u64 {
            let (id, _) = queue.pop_open().unwrap();
            open.push(id);
            assert_eq!(queue.count(), 10 - i - 1);
        }
        for (returned, id) in open.into_iter().enumerate() {
            queue.pop_close(false, id, None).unwrap();
            assert_eq!(queue.count(), 6 + returned as u64 + 1);
        }
    }
}
