//! Copying registry snapshots out to a consumer's buffer.
//!
//! The consumer of an export is usually on the far side of a privilege
//! boundary, so writes to it can fault. Destinations implement [`CopyOut`],
//! and a fault on any record aborts the export at that record.
use crate::{
    record::{RawRecord, RECORD_SIZE},
    Platform, Registry,
};
use core::fmt;

/// A destination that encoded records can be copied into.
pub trait CopyOut {
    /// Copies `bytes` into the destination, starting `offset` bytes in.
    ///
    /// Either all of `bytes` are written, or the copy fails and the
    /// destination's contents past `offset` are unspecified.
    fn copy_out(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CopyFault>;
}

/// A write to an export destination failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("copy of {len} bytes at offset {offset} faulted")]
pub struct CopyFault {
    pub offset: usize,
    pub len: usize,
}

/// Errors returned by [`Registry::export`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ExportError {
    /// Copying a record to the destination faulted.
    #[error("export faulted on record {index} after copying {copied} records")]
    Fault {
        /// The index of the record that could not be copied.
        index: usize,
        /// The number of records copied before the fault.
        copied: usize,
        #[source]
        source: CopyFault,
    },
}

impl CopyOut for [u8] {
    fn copy_out(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CopyFault> {
        let fault = CopyFault {
            offset,
            len: bytes.len(),
        };
        let end = offset.checked_add(bytes.len()).ok_or(fault)?;
        self.get_mut(offset..end)
            .ok_or(fault)?
            .copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(not(target_os = "none"))]
impl CopyOut for std::vec::Vec<u8> {
    /// Grows the vector as needed; never faults.
    fn copy_out(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CopyFault> {
        let end = offset + bytes.len();
        if self.len() < end {
            self.resize(end, 0);
        }
        self[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl<T: CopyOut + ?Sized> CopyOut for &mut T {
    #[inline]
    fn copy_out(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CopyFault> {
        T::copy_out(self, offset, bytes)
    }
}

// === impl Registry ===

impl<P: Platform> Registry<'_, P> {
    /// Copies up to `max_entries` records into `dst`, in registry order.
    ///
    /// Returns the number of records copied, which is the smaller of
    /// `max_entries` and the number of entries in use. If copying any record
    /// faults, the export stops there and the error reports how many
    /// records made it out.
    ///
    /// The export is a best-effort snapshot: it takes no lock, so counters
    /// may change while it runs, and an entry registered mid-export may or
    /// may not be included.
    pub fn export(
        &self,
        mut dst: impl CopyOut,
        max_entries: usize,
    ) -> Result<usize, ExportError> {
        let len = self.len();
        let count = len.min(max_entries);
        let span = tracing::debug_span!("export", len, max_entries);
        let _enter = span.enter();

        for (index, record) in self.snapshot().take(count).enumerate() {
            dst.copy_out(index * RECORD_SIZE, &record.encode())
                .map_err(|source| {
                    tracing::debug!(index, %source, "export faulted");
                    ExportError::Fault {
                        index,
                        copied: index,
                        source,
                    }
                })?;
        }

        tracing::trace!(count, "exported");
        Ok(count)
    }
}

/// Exports lock statistics the way a system call would: into a raw buffer,
/// returning the record count, or `-1` on failure.
///
/// `max_entries` is a record count, not a byte count.
pub fn get_lock_stats<P: Platform>(
    registry: &Registry<'_, P>,
    dst: &mut [u8],
    max_entries: usize,
) -> i64 {
    match registry.export(dst, max_entries) {
        Ok(count) => count as i64,
        Err(_) => -1,
    }
}

/// Returns the number of bytes needed to export `entries` records.
#[must_use]
pub const fn buffer_len(entries: usize) -> usize {
    entries * RECORD_SIZE
}

/// Formats exported records the way the registry's own dump does.
#[derive(Debug)]
pub struct Dump<'a>(pub &'a [RawRecord]);

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dump(f, self.0.iter().copied())
    }
}

/// Writes the human-readable statistics dump for `records`, skipping
/// disabled entries.
pub(crate) fn write_dump(
    f: &mut fmt::Formatter<'_>,
    records: impl Iterator<Item = RawRecord>,
) -> fmt::Result {
    writeln!(f, "=== Lock Profiling Statistics ===")?;
    for record in records.filter(|record| record.enabled) {
        writeln!(f)?;
        writeln!(f, "Lock: {}", record.name)?;
        writeln!(f, "  Acquires:    {}", record.acquire_count)?;
        writeln!(f, "  Contentions: {}", record.contention_count)?;
        writeln!(f, "  Hold Time:   {} cycles", record.total_hold_time)?;
        writeln!(f, "  Wait Time:   {} cycles", record.total_wait_time)?;
    }
    Ok(())
}
