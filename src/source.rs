//! The seam between the collector and a concrete change-journal mechanism.
//!
//! NTFS is the only implementation shipped here, but the collector only ever
//! talks to [`JournalIo`], so another platform's native change-notification
//! mechanism can satisfy the same contract.

use crate::Usn;
use crate::errors::CollectorError;

/// Snapshot of a volume's journal metadata, taken at open time and refreshed
/// during rotation recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalMetadata {
    pub journal_id: u64,
    pub first_usn: Usn,
    pub next_usn: Usn,
    pub lowest_valid_usn: Usn,
    pub max_usn: Usn,
    pub maximum_size: u64,
    pub allocation_delta: u64,
}

/// Outcome of a successful low-level journal read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRead {
    /// The buffer now holds `bytes_returned` valid bytes: a next-USN header
    /// followed by zero or more records.
    Data { bytes_returned: usize },
    /// Nothing new past the requested position. Not an error.
    NoMoreEntries,
}

/// Low-level journal access for one volume.
///
/// Implementations classify their OS error codes into [`CollectorError`]:
/// a rotated-away read position surfaces as [`CollectorError::JournalRotated`]
/// so the reader can recover, and a dead handle surfaces as
/// [`CollectorError::HandleStale`] only after one reopen attempt has already
/// failed inside the implementation.
pub trait JournalIo {
    /// Queries the current journal metadata for the volume.
    fn query_journal(&mut self) -> Result<JournalMetadata, CollectorError>;

    /// Issues one non-blocking journal read starting at `start_usn`, filling
    /// `buffer` from the front.
    fn read_raw(&mut self, start_usn: Usn, buffer: &mut [u8])
    -> Result<RawRead, CollectorError>;
}
