//! Journal store abstraction.
//!
//! The queue engine assumes very little of its backing store: ordered
//! iteration under the key comparator, point get/put/delete, and
//! crash-durable writes. The contract is kept tiny so the redb engine and
//! the deterministic in-memory engine can be swapped without touching the
//! queue facade.

use std::path::{Path, PathBuf};

use snafu::Snafu;

use crate::key::Key;

mod disk;
mod memory;

pub use disk::RedbJournal;
pub use memory::MemoryJournal;

/// Errors from journal operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Failed to create the journal's parent directory.
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to open the journal database file.
    #[snafu(display("failed to open journal at {}: {source}", path.display()))]
    OpenDatabase {
        /// Path to the journal file.
        path: PathBuf,
        /// Underlying redb error.
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    /// The journal was written under a different key ordering.
    ///
    /// The comparator name is persisted with the table; a mismatch means the
    /// on-disk format is incompatible. Fatal: the journal must not be used.
    #[snafu(display(
        "journal at {} was written with a different key ordering: {source}",
        path.display()
    ))]
    ComparatorMismatch {
        /// Path to the journal file.
        path: PathBuf,
        /// Underlying redb table error.
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    /// Failed to begin a write transaction.
    #[snafu(display("failed to begin write transaction: {source}"))]
    BeginWrite {
        /// Underlying redb transaction error.
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    /// Failed to begin a read transaction.
    #[snafu(display("failed to begin read transaction: {source}"))]
    BeginRead {
        /// Underlying redb transaction error.
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    /// Failed to open the journal table.
    #[snafu(display("failed to open journal table: {source}"))]
    OpenTable {
        /// Underlying redb table error.
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    /// Failed to commit a transaction.
    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        /// Underlying redb commit error.
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },

    /// Failed to write a record.
    #[snafu(display("failed to write record: {source}"))]
    Insert {
        /// Underlying redb storage error.
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    /// Failed to read a record.
    #[snafu(display("failed to read record: {source}"))]
    Get {
        /// Underlying redb storage error.
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    /// Failed to delete a record.
    #[snafu(display("failed to delete record: {source}"))]
    Remove {
        /// Underlying redb storage error.
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    /// Failed to iterate the journal.
    #[snafu(display("failed to iterate journal: {source}"))]
    Range {
        /// Underlying redb storage error.
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },
}

/// Trait satisfied by journal backends.
///
/// Implementations must order [`scan`](Journal::scan) by the numeric
/// `(id, kind)` key comparator and make [`put`](Journal::put) and
/// [`delete`](Journal::delete) durable before returning.
pub trait Journal: Send + Sync + 'static {
    /// Durably write `value` at `key`, replacing any existing record.
    fn put(&self, key: Key, value: &[u8]) -> Result<(), Error>;

    /// Read the record at `key`.
    fn get(&self, key: Key) -> Result<Option<Vec<u8>>, Error>;

    /// Durably delete the record at `key`. Returns whether a record existed.
    fn delete(&self, key: Key) -> Result<bool, Error>;

    /// Visit every key in ascending comparator order.
    fn scan(&self, visit: &mut dyn FnMut(Key)) -> Result<(), Error>;

    /// Location of the journal, for statistics.
    fn path(&self) -> &Path;
}
