//! Chunk header codec and queue-value framing.
//!
//! A multi-chunk item's queue entry stores a [`Header`]: the half-open chunk
//! id range it owns and the total payload size. The header is a fixed 24-byte
//! little-endian layout so journals move across architectures.
//!
//! Every queue value is prefixed with a one-byte discriminator so a 24-byte
//! inline payload can never be mistaken for a header.

/// Encoded width of a [`Header`]: three 64-bit little-endian fields.
pub const ENCODED_LEN: usize = 24;

/// Queue-value tag: the remaining bytes are the item payload itself.
pub(crate) const TAG_INLINE: u8 = 0;

/// Queue-value tag: the remaining bytes are an encoded [`Header`].
pub(crate) const TAG_HEADER: u8 = 1;

/// Metadata record pointing at a multi-chunk item's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// First chunk id owned by the item.
    pub beg: u64,
    /// One past the last chunk id owned by the item. `beg <= end`.
    pub end: u64,
    /// Total payload size in bytes across all chunks.
    pub size: u64,
}

impl Header {
    /// Number of chunks in the item.
    pub const fn chunks(&self) -> u64 {
        self.end - self.beg
    }

    /// Pack into the fixed 24-byte layout.
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        buf[..8].copy_from_slice(&self.beg.to_le_bytes());
        buf[8..16].copy_from_slice(&self.end.to_le_bytes());
        buf[16..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Unpack from the fixed 24-byte layout. `None` if `buf` has the wrong
    /// length.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != ENCODED_LEN {
            return None;
        }
        let field = |range: std::ops::Range<usize>| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[range]);
            u64::from_le_bytes(bytes)
        };
        Some(Self {
            beg: field(0..8),
            end: field(8..16),
            size: field(16..24),
        })
    }
}

/// Frame an inline payload as a tagged queue value.
pub(crate) fn frame_inline(value: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(1 + value.len());
    framed.push(TAG_INLINE);
    framed.extend_from_slice(value);
    framed
}

/// Frame a header as a tagged queue value.
pub(crate) fn frame_header(header: &Header) -> [u8; 1 + ENCODED_LEN] {
    let mut framed = [0u8; 1 + ENCODED_LEN];
    framed[0] = TAG_HEADER;
    framed[1..].copy_from_slice(&header.encode());
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = Header {
            beg: 7,
            end: 10,
            size: 4096,
        };
        assert_eq!(Header::decode(&header.encode()), Some(header));
        assert_eq!(header.chunks(), 3);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(Header::decode(&[0u8; 23]), None);
        assert_eq!(Header::decode(&[0u8; 25]), None);
    }

    #[test]
    fn framing_is_unambiguous() {
        // An inline payload that happens to be exactly header-sized must not
        // decode as a header.
        let payload = [0xabu8; ENCODED_LEN];
        let framed = frame_inline(&payload);
        assert_eq!(framed[0], TAG_INLINE);
        assert_eq!(&framed[1..], &payload);

        let header = Header {
            beg: 0,
            end: 1,
            size: 1,
        };
        let framed = frame_header(&header);
        assert_eq!(framed[0], TAG_HEADER);
        assert_eq!(Header::decode(&framed[1..]), Some(header));
    }
}
