//! Journal key codec.
//!
//! Every journal record is addressed by a `(kind, id)` pair packed into a
//! fixed 9-byte encoding: the 64-bit id in little-endian followed by a one
//! byte kind tag. The journal is ordered by `(id, kind)` interpreted as
//! native unsigned integers, not by lexical byte order, so an ascending scan
//! yields queue entries in FIFO order on any architecture.
//!
//! The encoding doubles as the store's comparator: [`Key`] implements
//! [`redb::Key`], and redb persists the type name with the table. Reopening
//! a journal whose table was created under a different key type fails, which
//! is the comparator-mismatch guard.

use std::cmp::Ordering;

use redb::{Key as StoreKey, TypeName, Value as StoreValue};

/// Encoded width of a [`Key`]: 8-byte id plus 1-byte kind tag.
pub const ENCODED_LEN: usize = 9;

/// Comparator name persisted with the journal table.
///
/// Changing this (or the ordering it names) is a breaking on-disk format
/// change: existing journals will refuse to open.
pub const COMPARATOR_NAME: &str = "hopper.key.v1";

/// Namespace tag for a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// A queue entry: an inline item or an encoded chunk header.
    Queue = 1,
    /// A payload fragment of a multi-chunk item.
    Chunk = 2,
}

/// A journal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    /// Record namespace.
    pub kind: Kind,
    /// Record id within the namespace.
    pub id: u64,
}

impl Key {
    /// Key of the queue entry with the given item id.
    pub const fn queue(id: u64) -> Self {
        Self {
            kind: Kind::Queue,
            id,
        }
    }

    /// Key of the chunk record with the given chunk id.
    pub const fn chunk(id: u64) -> Self {
        Self {
            kind: Kind::Chunk,
            id,
        }
    }

    /// Pack into the fixed 9-byte journal encoding.
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        buf[..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8] = self.kind as u8;
        buf
    }

    /// Unpack from the fixed 9-byte journal encoding.
    ///
    /// Only encodings produced by [`Key::encode`] ever reach the store, and
    /// redb checksums its pages, so malformed input is fail-fast.
    pub fn decode(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), ENCODED_LEN, "journal key has wrong length");
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[..8]);
        let kind = match buf[8] {
            1 => Kind::Queue,
            2 => Kind::Chunk,
            other => panic!("invalid journal key kind byte: {other}"),
        };
        Self {
            kind,
            id: u64::from_le_bytes(id),
        }
    }
}

impl Ord for Key {
    // Numeric (id, kind) order: queue and chunk records interleave by id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| (self.kind as u8).cmp(&(other.kind as u8)))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl StoreValue for Key {
    type SelfType<'a>
        = Key
    where
        Self: 'a;
    type AsBytes<'a>
        = [u8; ENCODED_LEN]
    where
        Self: 'a;

    fn fixed_width() -> Option<usize> {
        Some(ENCODED_LEN)
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        Key::decode(data)
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'a,
        Self: 'b,
    {
        value.encode()
    }

    fn type_name() -> TypeName {
        TypeName::new(COMPARATOR_NAME)
    }
}

impl StoreKey for Key {
    fn compare(data1: &[u8], data2: &[u8]) -> Ordering {
        Key::decode(data1).cmp(&Key::decode(data2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip() {
        for key in [
            Key::queue(0),
            Key::chunk(0),
            Key::queue(42),
            Key::chunk(u64::MAX),
        ] {
            assert_eq!(Key::decode(&key.encode()), key);
        }
    }

    #[test]
    fn orders_by_id_then_kind() {
        // A lexical comparison of the little-endian encoding would put
        // queue(256) before queue(1); the comparator must not.
        assert!(Key::queue(1) < Key::queue(256));
        assert!(Key::queue(5) < Key::chunk(5));
        assert!(Key::chunk(5) < Key::queue(6));
    }

    #[test]
    #[should_panic(expected = "invalid journal key kind byte")]
    fn rejects_unknown_kind() {
        let mut buf = Key::queue(1).encode();
        buf[8] = 9;
        Key::decode(&buf);
    }

    fn arb_key() -> impl Strategy<Value = Key> {
        (any::<u64>(), prop_oneof![Just(Kind::Queue), Just(Kind::Chunk)])
            .prop_map(|(id, kind)| Key { kind, id })
    }

    proptest! {
        #[test]
        fn proptest_encoded_compare_matches_decoded_order(a in arb_key(), b in arb_key()) {
            let encoded = <Key as StoreKey>::compare(&a.encode(), &b.encode());
            let decoded = (a.id, a.kind as u8).cmp(&(b.id, b.kind as u8));
            prop_assert_eq!(encoded, decoded);
        }
    }
}
