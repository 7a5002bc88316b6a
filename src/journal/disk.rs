//! Production journal backed by redb.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition, TableError};
use snafu::ResultExt;
use tracing::debug;

use super::{
    BeginReadSnafu, BeginWriteSnafu, CommitSnafu, ComparatorMismatchSnafu, CreateDirectorySnafu,
    Error, GetSnafu, InsertSnafu, Journal, OpenDatabaseSnafu, OpenTableSnafu, RangeSnafu,
    RemoveSnafu,
};
use crate::key::Key;

/// Queue entries and chunk payloads share one keyspace, interleaved by the
/// `(id, kind)` comparator carried by [`Key`].
const JOURNAL_TABLE: TableDefinition<Key, &[u8]> = TableDefinition::new("journal");

/// Journal backed by a redb database file.
///
/// Every mutation runs in its own committed write transaction; redb fsyncs
/// on commit, so a record that was reported written survives a crash. The
/// key comparator travels with the table as a persisted type name, and
/// [`RedbJournal::open`] fails with [`Error::ComparatorMismatch`] if the
/// file was created under a different ordering.
#[derive(Debug)]
pub struct RedbJournal {
    db: Database,
    path: PathBuf,
}

impl RedbJournal {
    /// Open or create the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        // Open existing database without truncating, create if missing.
        let db = if path.exists() {
            Database::open(&path).context(OpenDatabaseSnafu { path: &path })?
        } else {
            Database::create(&path).context(OpenDatabaseSnafu { path: &path })?
        };

        // Create the table on first open and force the key-type check on
        // reopen. A mismatch is a breaking format difference.
        let write_txn = db.begin_write().context(BeginWriteSnafu)?;
        match write_txn.open_table(JOURNAL_TABLE) {
            Ok(_) => {}
            Err(err @ TableError::TableTypeMismatch { .. }) => {
                return Err(err).context(ComparatorMismatchSnafu { path: &path });
            }
            Err(err) => return Err(err).context(OpenTableSnafu),
        }
        write_txn.commit().context(CommitSnafu)?;

        debug!(path = %path.display(), "journal opened");
        Ok(Self { db, path })
    }
}

impl Journal for RedbJournal {
    fn put(&self, key: Key, value: &[u8]) -> Result<(), Error> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(JOURNAL_TABLE).context(OpenTableSnafu)?;
            table.insert(key, value).context(InsertSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    fn get(&self, key: Key) -> Result<Option<Vec<u8>>, Error> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(JOURNAL_TABLE).context(OpenTableSnafu)?;
        let value = table.get(key).context(GetSnafu)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn delete(&self, key: Key) -> Result<bool, Error> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        let removed = {
            let mut table = write_txn.open_table(JOURNAL_TABLE).context(OpenTableSnafu)?;
            let removed = table.remove(key).context(RemoveSnafu)?.is_some();
            removed
        };
        write_txn.commit().context(CommitSnafu)?;
        Ok(removed)
    }

    fn scan(&self, visit: &mut dyn FnMut(Key)) -> Result<(), Error> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(JOURNAL_TABLE).context(OpenTableSnafu)?;
        for item in table.iter().context(RangeSnafu)? {
            let (key, _value) = item.context(GetSnafu)?;
            visit(key.value());
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal(dir: &TempDir) -> RedbJournal {
        RedbJournal::open(dir.path().join("journal.redb")).expect("open journal")
    }

    #[test]
    fn put_get_delete() {
        let dir = TempDir::new().expect("tempdir");
        let journal = journal(&dir);

        journal.put(Key::queue(1), b"one").unwrap();
        assert_eq!(journal.get(Key::queue(1)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(journal.get(Key::queue(2)).unwrap(), None);

        assert!(journal.delete(Key::queue(1)).unwrap());
        assert!(!journal.delete(Key::queue(1)).unwrap());
        assert_eq!(journal.get(Key::queue(1)).unwrap(), None);
    }

    #[test]
    fn scan_orders_numerically() {
        let dir = TempDir::new().expect("tempdir");
        let journal = journal(&dir);

        // Inserted out of order; lexical byte order of the little-endian id
        // would also differ from numeric order here.
        journal.put(Key::queue(256), b"").unwrap();
        journal.put(Key::chunk(3), b"").unwrap();
        journal.put(Key::queue(3), b"").unwrap();
        journal.put(Key::queue(1), b"").unwrap();

        let mut keys = Vec::new();
        journal.scan(&mut |key| keys.push(key)).unwrap();
        assert_eq!(
            keys,
            vec![
                Key::queue(1),
                Key::queue(3),
                Key::chunk(3),
                Key::queue(256)
            ]
        );
    }

    #[test]
    fn reopen_preserves_records() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("journal.redb");

        {
            let journal = RedbJournal::open(&path).unwrap();
            journal.put(Key::queue(7), b"seven").unwrap();
        }

        let journal = RedbJournal::open(&path).unwrap();
        assert_eq!(journal.get(Key::queue(7)).unwrap(), Some(b"seven".to_vec()));
    }

    #[test]
    fn rejects_foreign_comparator() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("journal.redb");

        // A journal written under a plain u64 key ordering must not open.
        {
            let foreign: TableDefinition<u64, &[u8]> = TableDefinition::new("journal");
            let db = Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            txn.open_table(foreign).unwrap();
            txn.commit().unwrap();
        }

        let err = RedbJournal::open(&path).unwrap_err();
        assert!(matches!(err, Error::ComparatorMismatch { .. }));
    }
}
