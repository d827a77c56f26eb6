use crate::Usn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Access denied: Administrator privileges required. Please run the application as Administrator to access the USN journal.")]
    PermissionDenied,

    #[error("Volume unavailable: {0}")]
    VolumeUnavailable(String),

    #[error("Read buffer of {buffer_size} bytes is too small for the next journal record on {volume}")]
    BufferTooSmall { volume: String, buffer_size: usize },

    #[error("Journal entries between the cursor and the current window were discarded")]
    JournalRotated,

    #[error("Volume handle went stale and could not be re-established after one reopen")]
    HandleStale,

    #[error("State file error: {0}")]
    State(String),

    #[error(
        "Journal read failed on {volume} (journal_id={journal_id:#018x}, first_usn={first_usn}, \
         next_usn={next_usn}, lowest_valid_usn={lowest_valid_usn}, requested_usn={requested_usn}): {message}"
    )]
    Fatal {
        volume: String,
        journal_id: u64,
        first_usn: Usn,
        next_usn: Usn,
        lowest_valid_usn: Usn,
        requested_usn: Usn,
        message: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(windows)]
    #[error("Windows error: {0}")]
    WinApiError(#[from] windows::core::Error),
}

impl CollectorError {
    /// True for conditions the collector recovers from on its own; they adjust
    /// the cursor but never surface to the caller as a failed cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CollectorError::JournalRotated)
    }
}
