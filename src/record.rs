//! The fixed record layout shared by the exporter and its consumers.
//!
//! A [`RawRecord`] is the image of one registry entry at the moment it was
//! copied. On the wire, each record is exactly [`RECORD_SIZE`] bytes:
//!
//! | offset | size | field               |
//! |--------|------|---------------------|
//! | 0      | 32   | `name` (NUL-padded) |
//! | 32     | 8    | `acquire_count`     |
//! | 40     | 8    | `contention_count`  |
//! | 48     | 8    | `total_hold_time`   |
//! | 56     | 8    | `total_wait_time`   |
//! | 64     | 8    | `max_hold_time`     |
//! | 72     | 8    | `max_wait_time`     |
//! | 80     | 8    | `last_acquire_time` |
//! | 88     | 4    | `enabled`           |
//! | 92     | 4    | padding (zero)      |
//!
//! All integers are little-endian. Field order and widths are a
//! compatibility contract between the kernel-side exporter and the
//! user-side analysis tool; change both sides together or not at all.
use core::{fmt, str};

/// The size of the name field, including its terminating NUL.
pub const MAX_LOCK_NAME: usize = 32;

/// The size of one encoded [`RawRecord`], in bytes.
pub const RECORD_SIZE: usize = 96;

const COUNTERS_OFFSET: usize = MAX_LOCK_NAME;
const ENABLED_OFFSET: usize = COUNTERS_OFFSET + 7 * 8;

/// A bounded, NUL-padded lock name.
///
/// At most `MAX_LOCK_NAME - 1` bytes of the original name are kept; longer
/// names are truncated at the last `char` boundary that fits. Two locks
/// whose names agree on those bytes share a registry entry.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct LockName([u8; MAX_LOCK_NAME]);

/// A flattened copy of one registry entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawRecord {
    pub name: LockName,
    pub acquire_count: u64,
    pub contention_count: u64,
    pub total_hold_time: u64,
    pub total_wait_time: u64,
    pub max_hold_time: u64,
    pub max_wait_time: u64,
    pub last_acquire_time: u64,
    pub enabled: bool,
}

/// Errors returned when decoding records from their wire format.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The input ended partway through a record.
    #[error("truncated record: expected {expected} bytes, found {len}", expected = RECORD_SIZE)]
    Truncated {
        /// The number of bytes that were available.
        len: usize,
    },
    /// The name field is not valid UTF-8.
    #[error("lock name is not valid UTF-8")]
    InvalidName,
}

// === impl LockName ===

impl LockName {
    /// The empty name.
    pub const EMPTY: Self = Self([0; MAX_LOCK_NAME]);

    /// Returns a new `LockName`, truncating `name` if it doesn't fit.
    ///
    /// A NUL byte ends the name, as it would on the wire.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let name = name.find('\0').map_or(name, |nul| &name[..nul]);
        let mut len = name.len().min(MAX_LOCK_NAME - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; MAX_LOCK_NAME];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self(bytes)
    }

    /// Reads a name from its raw wire bytes.
    pub fn from_bytes(bytes: [u8; MAX_LOCK_NAME]) -> Result<Self, DecodeError> {
        let name = Self(bytes);
        str::from_utf8(name.trimmed()).map_err(|_| DecodeError::InvalidName)?;
        Ok(name)
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Every constructor checks that the trimmed bytes are UTF-8.
        str::from_utf8(self.trimmed()).unwrap_or("<invalid>")
    }

    /// Returns the raw, NUL-padded bytes of this name.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MAX_LOCK_NAME] {
        &self.0
    }

    fn trimmed(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_LOCK_NAME);
        &self.0[..len]
    }
}

impl Default for LockName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// === impl RawRecord ===

impl RawRecord {
    /// Encodes this record into its fixed wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0; RECORD_SIZE];
        buf[..MAX_LOCK_NAME].copy_from_slice(self.name.as_bytes());
        for (i, counter) in self.counters().into_iter().enumerate() {
            let at = COUNTERS_OFFSET + i * 8;
            buf[at..at + 8].copy_from_slice(&counter.to_le_bytes());
        }
        let enabled = u32::from(self.enabled).to_le_bytes();
        buf[ENABLED_OFFSET..ENABLED_OFFSET + 4].copy_from_slice(&enabled);
        buf
    }

    /// Decodes one record from the start of `bytes`.
    ///
    /// Any bytes past the first [`RECORD_SIZE`] are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let buf: &[u8; RECORD_SIZE] = bytes
            .get(..RECORD_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(DecodeError::Truncated { len: bytes.len() })?;

        let mut name = [0; MAX_LOCK_NAME];
        name.copy_from_slice(&buf[..MAX_LOCK_NAME]);
        let counter = |i: usize| {
            let at = COUNTERS_OFFSET + i * 8;
            let mut word = [0; 8];
            word.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(word)
        };
        let mut enabled = [0; 4];
        enabled.copy_from_slice(&buf[ENABLED_OFFSET..ENABLED_OFFSET + 4]);

        Ok(Self {
            name: LockName::from_bytes(name)?,
            acquire_count: counter(0),
            contention_count: counter(1),
            total_hold_time: counter(2),
            total_wait_time: counter(3),
            max_hold_time: counter(4),
            max_wait_time: counter(5),
            last_acquire_time: counter(6),
            enabled: u32::from_le_bytes(enabled) != 0,
        })
    }

    /// Decodes every record in `bytes`, in order.
    ///
    /// A trailing partial record yields a [`DecodeError::Truncated`].
    pub fn decode_all(bytes: &[u8]) -> impl Iterator<Item = Result<Self, DecodeError>> + '_ {
        bytes.chunks(RECORD_SIZE).map(Self::decode)
    }

    fn counters(&self) -> [u64; 7] {
        [
            self.acquire_count,
            self.contention_count,
            self.total_hold_time,
            self.total_wait_time,
            self.max_hold_time,
            self.max_wait_time,
            self.last_acquire_time,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RawRecord {
        RawRecord {
            name: LockName::new("bcache"),
            acquire_count: 8,
            contention_count: 3,
            total_hold_time: 400,
            total_wait_time: 90,
            max_hold_time: 120,
            max_wait_time: 40,
            last_acquire_time: 0xdead_beef,
            enabled: true,
        }
    }

    #[test]
    fn layout_offsets() {
        let bytes = record().encode();
        assert_eq!(&bytes[..6], b"bcache");
        assert!(bytes[6..MAX_LOCK_NAME].iter().all(|&b| b == 0));
        assert_eq!(bytes[32..40], 8u64.to_le_bytes());
        assert_eq!(bytes[40..48], 3u64.to_le_bytes());
        assert_eq!(bytes[48..56], 400u64.to_le_bytes());
        assert_eq!(bytes[80..88], 0xdead_beefu64.to_le_bytes());
        assert_eq!(bytes[88..92], 1u32.to_le_bytes());
        assert_eq!(bytes[92..96], [0; 4]);
    }

    #[test]
    fn decode_matches_encode() {
        let rec = record();
        assert_eq!(RawRecord::decode(&rec.encode()), Ok(rec));
    }

    #[test]
    fn truncated() {
        let bytes = record().encode();
        assert_eq!(
            RawRecord::decode(&bytes[..40]),
            Err(DecodeError::Truncated { len: 40 })
        );

        let mut two = bytes.to_vec();
        two.extend_from_slice(&bytes[..10]);
        let decoded: Vec<_> = RawRecord::decode_all(&two).collect();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert_eq!(decoded[1], Err(DecodeError::Truncated { len: 10 }));
    }

    #[test]
    fn invalid_name() {
        let mut bytes = record().encode();
        bytes[0] = 0xff;
        assert_eq!(RawRecord::decode(&bytes), Err(DecodeError::InvalidName));
    }

    #[test]
    fn long_names_are_truncated() {
        let name = LockName::new("a_really_long_lock_name_that_does_not_fit");
        assert_eq!(name.as_str().len(), MAX_LOCK_NAME - 1);
        assert_eq!(name.as_str(), "a_really_long_lock_name_that_do");
        assert_eq!(name.as_bytes()[MAX_LOCK_NAME - 1], 0);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 30 ASCII bytes followed by a 2-byte char straddling the limit
        let name = format!("{}é", "x".repeat(30));
        assert_eq!(LockName::new(&name).as_str(), "x".repeat(30));
    }

    #[test]
    fn nul_ends_the_name() {
        let a = LockName::new("a\0b");
        assert_eq!(a, LockName::new("a\0c"));
        assert_eq!(a, LockName::new("a"));
        assert_eq!(a.as_str(), "a");
        assert_eq!(LockName::new("\0proc"), LockName::EMPTY);
    }

    proptest::proptest! {
        #[test]
        fn names_are_bounded_prefixes(name in "\\PC{0,48}") {
            let stored = LockName::new(&name);
            proptest::prop_assert!(stored.as_str().len() < MAX_LOCK_NAME);
            proptest::prop_assert!(name.starts_with(stored.as_str()));
            if name.len() < MAX_LOCK_NAME && !name.contains('\0') {
                proptest::prop_assert_eq!(stored.as_str(), name.as_str());
            }
        }
    }
}
