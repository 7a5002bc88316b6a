//! Item streams: one checkout or one enqueue, chunk at a time.
//!
//! Streams are short-lived objects borrowing the queue for a single item
//! transfer, so memory stays bounded regardless of item size. Several
//! streams may be live at once; the facade serializes the underlying
//! operations.

use std::num::NonZeroU64;

use snafu::ensure;
use tracing::{debug, warn};

use super::{
    ChunkOverflowSnafu, Error, Header, ItemBody, Queue, ShortItemSnafu, MAX_INLINE_LEN,
};
use crate::journal::Journal;

impl<J: Journal> Queue<J> {
    /// Check out the next item as a readable stream.
    ///
    /// Fails [`Error::Empty`] when nothing is available. Dropping the
    /// reader without closing it returns the item for redelivery.
    pub fn reader(&self) -> Result<ItemReader<'_, J>, Error> {
        let (id, body) = self.pop_open()?;
        let source = match body {
            ItemBody::Inline(value) => Source::Inline {
                size: value.len() as u64,
                value: Some(value),
            },
            ItemBody::Chunked(header) => Source::Chunked {
                header,
                next: header.beg,
            },
        };
        Ok(ItemReader {
            queue: self,
            id,
            source,
            delivered: 0,
            closed: false,
        })
    }

    /// Start enqueueing an item of `chunks` chunks.
    ///
    /// A single-chunk writer buffers its payload and enqueues it as one
    /// inline record when it fits [`MAX_INLINE_LEN`]; multi-chunk writers
    /// reserve their chunk range up front. The item stays invisible to
    /// consumers until [`ItemWriter::finish`] runs.
    pub fn writer(&self, chunks: NonZeroU64) -> ItemWriter<'_, J> {
        let chunks = chunks.get();
        let mode = if chunks == 1 {
            Mode::Inline { value: None }
        } else {
            Mode::Chunked {
                header: self.reserve_chunks(chunks),
            }
        };
        ItemWriter {
            queue: self,
            reserved: chunks,
            written: 0,
            mode,
            done: false,
        }
    }
}

/// Where a checked-out item's payload comes from.
#[derive(Debug)]
enum Source {
    Inline { value: Option<Vec<u8>>, size: u64 },
    Chunked { header: Header, next: u64 },
}

/// Consumer side of one checkout: `Idle -> Opened -> Closed`.
#[derive(Debug)]
pub struct ItemReader<'q, J: Journal> {
    queue: &'q Queue<J>,
    id: u64,
    source: Source,
    delivered: u64,
    closed: bool,
}

impl<J: Journal> ItemReader<'_, J> {
    /// Id of the checked-out item.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> u64 {
        match &self.source {
            Source::Inline { size, .. } => *size,
            Source::Chunked { header, .. } => header.size,
        }
    }

    /// Bytes delivered so far.
    pub fn tell(&self) -> u64 {
        self.delivered
    }

    /// Read the next piece of the payload: the whole value for an inline
    /// item, the next chunk for a streamed one. `None` at end of item.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>, Error> {
        match &mut self.source {
            Source::Inline { value, .. } => {
                let Some(payload) = value.take() else {
                    return Ok(None);
                };
                self.delivered += payload.len() as u64;
                Ok(Some(payload))
            }
            Source::Chunked { header, next } => {
                if *next >= header.end {
                    return Ok(None);
                }
                let chunk = self.queue.read_chunk(*next)?;
                *next += 1;
                self.delivered += chunk.len() as u64;
                Ok(Some(chunk))
            }
        }
    }

    /// Finish the checkout: confirm removal (`remove = true`) or return the
    /// item to the front of the queue for redelivery (`remove = false`).
    pub fn close(mut self, remove: bool) -> Result<(), Error> {
        self.closed = true;
        let header = match &self.source {
            Source::Chunked { header, .. } => Some(*header),
            Source::Inline { .. } => None,
        };
        self.queue.pop_close(remove, self.id, header.as_ref())
    }
}

impl<J: Journal> Drop for ItemReader<'_, J> {
    // An abandoned checkout behaves as close(remove = false).
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.queue.pop_close(false, self.id, None) {
            warn!(id = self.id, %err, "failed to return item on drop");
        }
    }
}

/// How a writer stages its payload.
#[derive(Debug)]
enum Mode {
    Inline { value: Option<Vec<u8>> },
    Chunked { header: Header },
}

/// Producer side of one enqueue: `Idle -> Writing -> Pushed | Aborted`.
#[derive(Debug)]
pub struct ItemWriter<'q, J: Journal> {
    queue: &'q Queue<J>,
    reserved: u64,
    written: u64,
    mode: Mode,
    done: bool,
}

impl<J: Journal> ItemWriter<'_, J> {
    /// Bytes written so far.
    pub fn tell(&self) -> u64 {
        match &self.mode {
            Mode::Inline { value } => value.as_ref().map_or(0, |v| v.len() as u64),
            Mode::Chunked { header } => header.size,
        }
    }

    /// Append the next chunk.
    ///
    /// Fails [`Error::ChunkOverflow`] once every reserved chunk has been
    /// written.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), Error> {
        ensure!(
            self.written < self.reserved,
            ChunkOverflowSnafu {
                reserved: self.reserved,
            }
        );
        match &mut self.mode {
            Mode::Inline { value } => {
                *value = Some(chunk.to_vec());
            }
            Mode::Chunked { header } => {
                self.queue.write_chunk(chunk, header.beg + self.written)?;
                header.size += chunk.len() as u64;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// Enqueue the item and return its id.
    ///
    /// Fails [`Error::ShortItem`] if not every reserved chunk was written;
    /// the writer is consumed either way, and on failure its chunks are
    /// rolled back on drop.
    pub fn finish(mut self) -> Result<u64, Error> {
        ensure!(
            self.written == self.reserved,
            ShortItemSnafu {
                written: self.written,
                reserved: self.reserved,
            }
        );
        let header = match &mut self.mode {
            Mode::Inline { value } => {
                let payload = value.take().unwrap_or_default();
                if payload.len() <= MAX_INLINE_LEN {
                    let id = self.queue.push(&payload)?;
                    self.done = true;
                    debug!(id, size = payload.len(), "finished inline item");
                    return Ok(id);
                }
                // Oversized single chunk: fall back to a one-chunk header.
                let mut header = self.queue.reserve_chunks(1);
                self.queue.write_chunk(&payload, header.beg)?;
                header.size = payload.len() as u64;
                header
            }
            Mode::Chunked { header } => *header,
        };
        // From here rollback-on-drop must cover the written chunk range.
        self.mode = Mode::Chunked { header };
        let id = self.queue.push_header(&header)?;
        self.done = true;
        debug!(
            id,
            size = header.size,
            chunks = header.chunks(),
            "finished streamed item"
        );
        Ok(id)
    }

    /// Abandon the item, erasing any chunks written so far. No queue record
    /// is created.
    pub fn abort(mut self) -> Result<(), Error> {
        self.done = true;
        self.rollback()
    }

    fn rollback(&self) -> Result<(), Error> {
        match &self.mode {
            Mode::Inline { .. } => Ok(()),
            Mode::Chunked { header } => self.queue.erase_chunks(header),
        }
    }
}

impl<J: Journal> Drop for ItemWriter<'_, J> {
    // An abandoned writer behaves as abort(); orphan chunks from a failed
    // erase are unreachable and harmless.
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.rollback() {
            warn!(%err, "failed to roll back item writer on drop");
        }
    }
}
