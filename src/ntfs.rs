//! NTFS-backed implementation of the journal I/O seam.
//!
//! Issues `FSCTL_QUERY_USN_JOURNAL` and `FSCTL_READ_USN_JOURNAL` against an
//! open volume handle and classifies the OS error codes into the collector's
//! error taxonomy. Reads are non-blocking polls: a zero wait timeout returns
//! immediately with whatever the journal holds past the requested position.

use std::ffi::c_void;
use std::mem::size_of;

use log::{debug, warn};
use windows::{
    Win32::{
        Foundation::{
            ERROR_HANDLE_EOF, ERROR_INSUFFICIENT_BUFFER, ERROR_JOURNAL_ENTRY_DELETED,
            ERROR_JOURNAL_NOT_ACTIVE,
        },
        System::{
            IO::DeviceIoControl,
            Ioctl::{
                FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL, READ_USN_JOURNAL_DATA_V0,
                USN_JOURNAL_DATA_V0,
            },
        },
    },
    core::HRESULT,
};

use crate::errors::CollectorError;
use crate::source::{JournalIo, JournalMetadata, RawRead};
use crate::volume::Volume;
use crate::{USN_REASON_MASK_ALL, Usn};

/// Live USN journal access for one NTFS volume.
pub struct NtfsJournal {
    volume: Volume,
    journal_id: u64,
    metadata: JournalMetadata,
}

impl NtfsJournal {
    /// Opens the volume device and takes the initial journal metadata
    /// snapshot.
    pub fn open(volume: &str) -> Result<Self, CollectorError> {
        let volume = Volume::open(volume)?;
        let mut journal = NtfsJournal {
            volume,
            journal_id: 0,
            metadata: JournalMetadata::default(),
        };
        journal.query_journal()?;
        Ok(journal)
    }

    pub fn volume_name(&self) -> &str {
        self.volume.name()
    }

    fn query_device(&self) -> windows::core::Result<JournalMetadata> {
        let journal_data = USN_JOURNAL_DATA_V0::default();
        let bytes_return = 0u32;

        unsafe {
            // https://learn.microsoft.com/en-us/windows/win32/fileio/using-the-change-journal-identifier
            // To obtain the identifier of the current change journal on a
            // specified volume, use the FSCTL_QUERY_USN_JOURNAL control code.
            DeviceIoControl(
                self.volume.handle,
                FSCTL_QUERY_USN_JOURNAL,
                None,
                0,
                Some(&journal_data as *const _ as *mut _),
                size_of::<USN_JOURNAL_DATA_V0>() as u32,
                Some(&bytes_return as *const _ as *mut _),
                None,
            )
        }?;

        Ok(JournalMetadata {
            journal_id: journal_data.UsnJournalID,
            first_usn: journal_data.FirstUsn,
            next_usn: journal_data.NextUsn,
            lowest_valid_usn: journal_data.LowestValidUsn,
            max_usn: journal_data.MaxUsn,
            maximum_size: journal_data.MaximumSize,
            allocation_delta: journal_data.AllocationDelta,
        })
    }

    fn read_device(
        &mut self,
        start_usn: Usn,
        buffer: &mut [u8],
    ) -> windows::core::Result<usize> {
        let read_data = READ_USN_JOURNAL_DATA_V0 {
            StartUsn: start_usn,
            ReasonMask: USN_REASON_MASK_ALL,
            ReturnOnlyOnClose: 0,
            Timeout: 0,
            BytesToWaitFor: 0,
            UsnJournalID: self.journal_id,
        };

        let mut bytes_returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.volume.handle,
                FSCTL_READ_USN_JOURNAL,
                Some(&read_data as *const _ as *mut _),
                size_of::<READ_USN_JOURNAL_DATA_V0>() as u32,
                Some(buffer.as_mut_ptr() as *mut c_void),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        }?;

        Ok(bytes_returned as usize)
    }

    fn fatal(&self, requested_usn: Usn, err: &windows::core::Error) -> CollectorError {
        CollectorError::Fatal {
            volume: self.volume.name().to_string(),
            journal_id: self.metadata.journal_id,
            first_usn: self.metadata.first_usn,
            next_usn: self.metadata.next_usn,
            lowest_valid_usn: self.metadata.lowest_valid_usn,
            requested_usn,
            message: err.to_string(),
        }
    }
}

impl JournalIo for NtfsJournal {
    fn query_journal(&mut self) -> Result<JournalMetadata, CollectorError> {
        match self.query_device() {
            Ok(metadata) => {
                self.journal_id = metadata.journal_id;
                self.metadata = metadata;
                debug!("{}: journal metadata: {:?}", self.volume.name(), metadata);
                Ok(metadata)
            }
            Err(err) if err.code() == ERROR_JOURNAL_NOT_ACTIVE.into() => {
                Err(CollectorError::VolumeUnavailable(format!(
                    "{}: change journal is not active",
                    self.volume.name()
                )))
            }
            Err(err) => {
                warn!("{}: error querying USN journal: {}", self.volume.name(), err);
                Err(err.into())
            }
        }
    }

    fn read_raw(
        &mut self,
        start_usn: Usn,
        buffer: &mut [u8],
    ) -> Result<RawRead, CollectorError> {
        let err = match self.read_device(start_usn, buffer) {
            Ok(bytes_returned) => return Ok(RawRead::Data { bytes_returned }),
            Err(err) => err,
        };

        if err.code() == ERROR_HANDLE_EOF.into() {
            // Nothing past start_usn yet. Success, zero records.
            Ok(RawRead::NoMoreEntries)
        } else if err.code() == ERROR_JOURNAL_ENTRY_DELETED.into() {
            // The journal wrapped past the requested position.
            Err(CollectorError::JournalRotated)
        } else if err.code() == ERROR_INSUFFICIENT_BUFFER.into() {
            warn!(
                "{}: {} byte read buffer cannot hold the next record",
                self.volume.name(),
                buffer.len()
            );
            Err(CollectorError::BufferTooSmall {
                volume: self.volume.name().to_string(),
                buffer_size: buffer.len(),
            })
        } else if err.code() == HRESULT(0) {
            // A failure with no error code shows up when the handle has gone
            // stale underneath us. One close+reopen, one retry.
            warn!(
                "{}: journal read failed without an error code, reopening the volume handle",
                self.volume.name()
            );
            if let Err(reopen_err) = self.volume.reopen() {
                warn!(
                    "{}: failed to reopen the volume handle: {}",
                    self.volume.name(),
                    reopen_err
                );
                return Err(CollectorError::HandleStale);
            }
            match self.read_device(start_usn, buffer) {
                Ok(bytes_returned) => Ok(RawRead::Data { bytes_returned }),
                Err(retry) if retry.code() == ERROR_HANDLE_EOF.into() => {
                    Ok(RawRead::NoMoreEntries)
                }
                Err(retry) => {
                    warn!(
                        "{}: journal read still failing after reopen: {}",
                        self.volume.name(),
                        retry
                    );
                    Err(CollectorError::HandleStale)
                }
            }
        } else {
            Err(self.fatal(start_usn, &err))
        }
    }
}
