//! In-memory journal for tests and deterministic simulations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Error, Journal};
use crate::key::Key;

/// Non-durable journal holding records in an ordered map.
///
/// [`Key`]'s `Ord` is the same `(id, kind)` comparator the redb engine
/// persists, so scans agree between backends. Data is lost on drop.
#[derive(Debug)]
pub struct MemoryJournal {
    entries: Mutex<BTreeMap<Key, Vec<u8>>>,
    path: PathBuf,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            path: PathBuf::from(":memory:"),
        }
    }
}

impl Journal for MemoryJournal {
    fn put(&self, key: Key, value: &[u8]) -> Result<(), Error> {
        self.entries.lock().unwrap().insert(key, value.to_vec());
        Ok(())
    }

    fn get(&self, key: Key) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    fn delete(&self, key: Key) -> Result<bool, Error> {
        Ok(self.entries.lock().unwrap().remove(&key).is_some())
    }

    fn scan(&self, visit: &mut dyn FnMut(Key)) -> Result<(), Error> {
        for key in self.entries.lock().unwrap().keys() {
            visit(*key);
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

    #[test]
    fn behaves_like_a_journal() {
        let journal = MemoryJournal::default();
        journal.put(Key::chunk(2), b"b").unwrap();
        journal.put(Key::queue(2), b"a").unwrap();

        let mut keys = Vec::new();
        journal.scan(&mut |key| keys.push(key)).unwrap();
        assert_eq!(keys, vec![Key::queue(2), Key::chunk(2)]);

        assert_eq!(journal.get(Key::queue(2)).unwrap(), Some(b"a".to_vec()));
        assert!(journal.delete(Key::queue(2)).unwrap());
        assert_eq!(journal.get(Key::queue(2)).unwrap(), None);
    }
}
