//! Cursor-driven journal reading with rotation recovery.
//!
//! The journal is a bounded circular log: once it wraps, positions older than
//! `LowestValidUsn` are gone for good. [`JournalReader`] detects an
//! invalidated read position, either proactively (the cursor fell below
//! `FirstUsn`) or from the read call itself, and resets to the oldest retained
//! position. Entries between the old cursor and the new one are
//! unrecoverable; that is a property of the journal, not a bug.

use log::{debug, warn};

use crate::errors::CollectorError;
use crate::record::{self, JournalRecord};
use crate::source::{JournalIo, JournalMetadata, RawRead};
use crate::{READ_BUFFER_SIZE, Usn};

/// Where the reader stands with respect to rotation recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Normal,
    Recovering,
}

/// One cycle's worth of records for a volume, plus the cursor to resume from.
#[derive(Debug)]
pub struct JournalBatch {
    pub records: Vec<JournalRecord>,
    pub next_usn: Usn,
    /// Set when this batch is the empty result of a rotation recovery; the
    /// cursor jumped to the oldest retained position.
    pub recovered: bool,
}

impl JournalBatch {
    fn empty(next_usn: Usn, recovered: bool) -> Self {
        JournalBatch {
            records: Vec::new(),
            next_usn,
            recovered,
        }
    }
}

enum RecoveryTarget {
    /// The read call reported the cursor position was discarded.
    OldestRetained,
    /// The cursor was found stale before issuing the read.
    JournalStart,
}

/// Reads batches of journal records through a [`JournalIo`] implementation.
///
/// The caller owns the cursor and passes it to every read; the reader owns
/// the read buffer, the journal metadata snapshot, and the recovery state.
pub struct JournalReader<I: JournalIo> {
    io: I,
    buffer: Vec<u8>,
    metadata: JournalMetadata,
    state: RotationState,
}

impl<I: JournalIo> JournalReader<I> {
    /// Opens the reader, taking an initial metadata snapshot.
    pub fn new(mut io: I) -> Result<Self, CollectorError> {
        let metadata = io.query_journal()?;
        debug!(
            "journal opened: id={:#018x} first_usn={} next_usn={} lowest_valid_usn={}",
            metadata.journal_id, metadata.first_usn, metadata.next_usn, metadata.lowest_valid_usn
        );
        Ok(JournalReader {
            io,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            metadata,
            state: RotationState::Normal,
        })
    }

    pub fn metadata(&self) -> &JournalMetadata {
        &self.metadata
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    /// Reads the next batch of records starting at `start_usn`.
    ///
    /// Issues at most one journal read and at most one recovery per call. A
    /// recovered batch is empty and carries the reset cursor; the caller
    /// resumes from `next_usn` either way. On error the caller's cursor is
    /// untouched, which is safe to retry because journal reads are
    /// non-destructive.
    pub fn read_next_batch(
        &mut self,
        start_usn: Usn,
        max_records: usize,
    ) -> Result<JournalBatch, CollectorError> {
        if start_usn < self.metadata.first_usn {
            // The journal no longer retains this position; skip the doomed
            // read call entirely.
            debug!(
                "cursor {} is below first_usn {}, recovering without a read",
                start_usn, self.metadata.first_usn
            );
            let next_usn = self.recover(RecoveryTarget::JournalStart)?;
            return Ok(JournalBatch::empty(next_usn, true));
        }

        match self.io.read_raw(start_usn, &mut self.buffer) {
            Ok(RawRead::NoMoreEntries) => Ok(JournalBatch::empty(start_usn, false)),
            Ok(RawRead::Data { bytes_returned }) => {
                Ok(self.decode_batch(start_usn, bytes_returned, max_records))
            }
            Err(CollectorError::JournalRotated) => {
                warn!(
                    "journal rotated past cursor {}, resuming from the oldest retained record",
                    start_usn
                );
                let next_usn = self.recover(RecoveryTarget::OldestRetained)?;
                Ok(JournalBatch::empty(next_usn, true))
            }
            Err(err) => Err(err),
        }
    }

    fn decode_batch(&self, start_usn: Usn, bytes_returned: usize, max_records: usize) -> JournalBatch {
        if bytes_returned <= record::NEXT_USN_HEADER_LEN {
            // Header-only response: nothing new, but the journal still tells
            // us where to poll next.
            let next_usn = record::read_next_usn(&self.buffer).unwrap_or(start_usn);
            return JournalBatch::empty(next_usn, false);
        }

        let records = record::parse_records(&self.buffer, bytes_returned, max_records);
        let next_usn = if records.len() == max_records {
            // The cap cut the batch short. Resume right after the last record
            // actually consumed, not at the end of the buffer, so the rest is
            // served next cycle. A record's USN is its byte offset in the
            // journal stream, so the successor sits at usn + record_length.
            records
                .last()
                .map(|r| r.usn + Usn::from(r.record_length))
                .unwrap_or(start_usn)
        } else {
            record::read_next_usn(&self.buffer).unwrap_or(start_usn)
        };

        JournalBatch {
            records,
            next_usn,
            recovered: false,
        }
    }

    /// Re-queries the journal and returns the position to resume from. The
    /// reader stays in `Recovering` if the re-query fails, and the failed
    /// cycle leaves the caller's cursor unchanged.
    fn recover(&mut self, target: RecoveryTarget) -> Result<Usn, CollectorError> {
        self.state = RotationState::Recovering;
        let metadata = self.io.query_journal()?;
        self.metadata = metadata;
        self.state = RotationState::Normal;
        Ok(match target {
            RecoveryTarget::OldestRetained => metadata.lowest_valid_usn,
            RecoveryTarget::JournalStart => metadata.first_usn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockJournal, RecordSpec, encode_read_buffer, encode_record, metadata};

    fn record_at(usn: Usn) -> Vec<u8> {
        encode_record(&RecordSpec {
            usn,
            file_name: "file.txt",
            ..RecordSpec::default()
        })
    }

    #[test]
    fn successful_read_returns_records_and_advances() {
        let buffer = encode_read_buffer(900, &[record_at(100), record_at(172)]);
        let mock = MockJournal::new(metadata(100, 900, 100)).with_reads(vec![Ok(buffer)]);
        let log = mock.log();

        let mut reader = JournalReader::new(mock).unwrap();
        let batch = reader.read_next_batch(100, 100).unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.next_usn, 900);
        assert!(!batch.recovered);
        assert_eq!(log.read_calls(), vec![100]);
        assert_eq!(reader.state(), RotationState::Normal);
    }

    #[test]
    fn no_more_entries_keeps_the_cursor() {
        let mock = MockJournal::new(metadata(100, 900, 100));
        let mut reader = JournalReader::new(mock).unwrap();

        let batch = reader.read_next_batch(500, 100).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.next_usn, 500);
        assert!(!batch.recovered);
    }

    #[test]
    fn header_only_read_follows_the_journal_position() {
        let buffer = encode_read_buffer(764, &[]);
        let mock = MockJournal::new(metadata(100, 900, 100)).with_reads(vec![Ok(buffer)]);

        let mut reader = JournalReader::new(mock).unwrap();
        let batch = reader.read_next_batch(700, 100).unwrap();

        assert!(batch.records.is_empty());
        assert_eq!(batch.next_usn, 764);
    }

    #[test]
    fn rotated_read_recovers_to_lowest_valid_usn() {
        let mock = MockJournal::new(metadata(100, 900, 100))
            .with_queries(vec![metadata(100, 900, 100), metadata(4096, 9000, 4096)])
            .with_reads(vec![Err(CollectorError::JournalRotated)]);
        let log = mock.log();

        let mut reader = JournalReader::new(mock).unwrap();
        let batch = reader.read_next_batch(200, 100).unwrap();

        assert!(batch.records.is_empty());
        assert!(batch.recovered);
        assert_eq!(batch.next_usn, 4096);
        assert_eq!(log.read_calls(), vec![200]);
        assert_eq!(reader.state(), RotationState::Normal);
        assert_eq!(reader.metadata().lowest_valid_usn, 4096);
    }

    #[test]
    fn stale_cursor_short_circuits_without_a_read() {
        let mock = MockJournal::new(metadata(1000, 9000, 800));
        let log = mock.log();

        let mut reader = JournalReader::new(mock).unwrap();
        let batch = reader.read_next_batch(500, 100).unwrap();

        assert!(batch.records.is_empty());
        assert!(batch.recovered);
        assert_eq!(batch.next_usn, 1000); // first_usn from the re-query
        assert!(log.read_calls().is_empty());
    }

    #[test]
    fn failed_recovery_surfaces_and_leaves_reader_recovering() {
        let mock = MockJournal::new(metadata(100, 900, 100))
            .with_queries(vec![metadata(100, 900, 100)])
            .with_reads(vec![Err(CollectorError::JournalRotated)])
            .with_query_error(CollectorError::HandleStale);

        let mut reader = JournalReader::new(mock).unwrap();
        let err = reader.read_next_batch(200, 100).unwrap_err();

        assert!(matches!(err, CollectorError::HandleStale));
        assert_eq!(reader.state(), RotationState::Recovering);
    }

    #[test]
    fn max_records_cap_resumes_after_the_last_consumed_record() {
        let first = record_at(100);
        let second_usn = 100 + first.len() as Usn;
        let second = record_at(second_usn);
        let third = record_at(second_usn + second.len() as Usn);
        let second_len = second.len() as Usn;
        let buffer = encode_read_buffer(9999, &[first, second, third]);

        let mock = MockJournal::new(metadata(100, 9999, 100)).with_reads(vec![Ok(buffer)]);
        let mut reader = JournalReader::new(mock).unwrap();

        let batch = reader.read_next_batch(100, 2).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.next_usn, second_usn + second_len);
    }

    #[test]
    fn unclassified_error_propagates_unchanged() {
        let mock = MockJournal::new(metadata(100, 900, 100)).with_reads(vec![Err(
            CollectorError::Fatal {
                volume: "C:".to_string(),
                journal_id: 7,
                first_usn: 100,
                next_usn: 900,
                lowest_valid_usn: 100,
                requested_usn: 200,
                message: "device failure".to_string(),
            },
        )]);

        let mut reader = JournalReader::new(mock).unwrap();
        let err = reader.read_next_batch(200, 100).unwrap_err();
        assert!(matches!(err, CollectorError::Fatal { .. }));
    }
}
