//! Binary decoding of raw USN journal read buffers.
//!
//! A journal read returns a buffer whose first 8 bytes are the next USN to
//! read from, followed by zero or more variable-length `USN_RECORD_V2`
//! structures. Records are decoded at fixed byte offsets rather than by
//! casting, so the parser works on any host and tolerates short buffers.
//!
//! <https://learn.microsoft.com/en-us/windows/win32/fileio/walking-a-buffer-of-change-journal-records>

use crate::{Usn, flags};

/// Length of the leading next-USN header in a journal read buffer.
pub const NEXT_USN_HEADER_LEN: usize = 8;

// USN_RECORD_V2 field offsets, relative to the start of a record.
// https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ns-winioctl-usn_record_v2
const OFFSET_RECORD_LENGTH: usize = 0;
const OFFSET_MAJOR_VERSION: usize = 4;
const OFFSET_MINOR_VERSION: usize = 6;
const OFFSET_FILE_REFERENCE_NUMBER: usize = 8;
const OFFSET_PARENT_FILE_REFERENCE_NUMBER: usize = 16;
const OFFSET_USN: usize = 24;
const OFFSET_TIMESTAMP: usize = 32;
const OFFSET_REASON: usize = 40;
const OFFSET_SOURCE_INFO: usize = 44;
const OFFSET_SECURITY_ID: usize = 48;
const OFFSET_FILE_ATTRIBUTES: usize = 52;
const OFFSET_FILE_NAME_LENGTH: usize = 56;
const OFFSET_FILE_NAME_OFFSET: usize = 58;

/// Size of the fixed part of a `USN_RECORD_V2`; the file name tail follows.
const MIN_RECORD_LENGTH: u32 = 60;

/// A decoded USN journal record.
///
/// `file_reference_number` and `parent_file_reference_number` are opaque,
/// volume-scoped identifiers that stay stable across renames. `timestamp` is
/// kept as the raw FILETIME value; conversion happens during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub usn: Usn,
    pub timestamp: i64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

impl JournalRecord {
    /// Returns true if this record refers to a directory.
    pub fn is_dir(&self) -> bool {
        self.file_attributes & flags::FILE_ATTRIBUTE_DIRECTORY != 0
    }

    /// Returns true if this record refers to a hidden file or directory.
    pub fn is_hidden(&self) -> bool {
        self.file_attributes & flags::FILE_ATTRIBUTE_HIDDEN != 0
    }

    /// Symbolic names for the set reason bits.
    pub fn reason_names(&self) -> Vec<&'static str> {
        flags::reason_names(self.reason)
    }
}

/// Reads the next-USN header from the front of a journal read buffer.
pub fn read_next_usn(buffer: &[u8]) -> Option<Usn> {
    let header = buffer.get(..NEXT_USN_HEADER_LEN)?;
    Some(Usn::from_le_bytes([
        header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
    ]))
}

/// Decodes the records in a journal read buffer.
///
/// Starts past the next-USN header and walks `RecordLength`-delimited records
/// until `bytes_returned` is exhausted or `max_records` entries have been
/// decoded. A zero length prefix, or a record that would extend past
/// `bytes_returned`, ends the batch without error; that is the normal end of
/// a read window, not corruption. Never reads past `bytes_returned`.
pub fn parse_records(buffer: &[u8], bytes_returned: usize, max_records: usize) -> Vec<JournalRecord> {
    let end = bytes_returned.min(buffer.len());
    let mut records = Vec::new();
    let mut offset = NEXT_USN_HEADER_LEN;

    while records.len() < max_records {
        if offset + 4 > end {
            break;
        }
        let record_length = read_u32(buffer, offset + OFFSET_RECORD_LENGTH);
        if record_length < MIN_RECORD_LENGTH || offset + record_length as usize > end {
            break;
        }

        let record = &buffer[offset..offset + record_length as usize];
        records.push(decode_record(record, record_length));
        offset += record_length as usize;
    }

    records
}

fn decode_record(record: &[u8], record_length: u32) -> JournalRecord {
    let file_name_length = read_u16(record, OFFSET_FILE_NAME_LENGTH) as usize;
    let file_name_offset = read_u16(record, OFFSET_FILE_NAME_OFFSET) as usize;

    JournalRecord {
        record_length,
        major_version: read_u16(record, OFFSET_MAJOR_VERSION),
        minor_version: read_u16(record, OFFSET_MINOR_VERSION),
        file_reference_number: read_u64(record, OFFSET_FILE_REFERENCE_NUMBER),
        parent_file_reference_number: read_u64(record, OFFSET_PARENT_FILE_REFERENCE_NUMBER),
        usn: read_u64(record, OFFSET_USN) as Usn,
        timestamp: read_u64(record, OFFSET_TIMESTAMP) as i64,
        reason: read_u32(record, OFFSET_REASON),
        source_info: read_u32(record, OFFSET_SOURCE_INFO),
        security_id: read_u32(record, OFFSET_SECURITY_ID),
        file_attributes: read_u32(record, OFFSET_FILE_ATTRIBUTES),
        file_name: decode_file_name(record, file_name_offset, file_name_length),
    }
}

/// Decodes the UTF-16LE file name tail. Ill-formed UTF-16 is replaced, never
/// propagated as an error: one unreadable name must not abort the batch.
fn decode_file_name(record: &[u8], name_offset: usize, name_length: usize) -> String {
    // Per the USN_RECORD_V2 contract, use FileNameOffset/FileNameLength at run
    // time; the name is not null-terminated. Clamp to the record bounds in
    // case the declared extent is bogus.
    let start = name_offset.min(record.len());
    let end = name_offset
        .saturating_add(name_length)
        .min(record.len());

    let units: Vec<u16> = record[start..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn read_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

fn read_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

fn read_u64(buffer: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
        buffer[offset + 4],
        buffer[offset + 5],
        buffer[offset + 6],
        buffer[offset + 7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{
        FILE_ATTRIBUTE_ARCHIVE, FILE_ATTRIBUTE_DIRECTORY, USN_REASON_CLOSE,
        USN_REASON_FILE_CREATE,
    };
    use crate::tests::{RecordSpec, encode_read_buffer, encode_record};

    #[test]
    fn read_next_usn_decodes_the_header() {
        let buffer = encode_read_buffer(5120, &[]);
        assert_eq!(read_next_usn(&buffer), Some(5120));
        assert_eq!(read_next_usn(&buffer[..4]), None);
    }

    #[test]
    fn parses_a_full_buffer_of_records() {
        let first = encode_record(&RecordSpec {
            usn: 1000,
            file_reference_number: 11,
            parent_file_reference_number: 5,
            reason: USN_REASON_FILE_CREATE | USN_REASON_CLOSE,
            file_attributes: FILE_ATTRIBUTE_ARCHIVE,
            timestamp: 132_223_104_000_000_000,
            file_name: "report.txt",
        });
        let second = encode_record(&RecordSpec {
            usn: 1000 + first.len() as i64,
            file_reference_number: 12,
            parent_file_reference_number: 5,
            reason: USN_REASON_CLOSE,
            file_attributes: FILE_ATTRIBUTE_DIRECTORY,
            timestamp: 132_223_104_000_000_000,
            file_name: "projects",
        });
        let buffer = encode_read_buffer(2048, &[first, second]);

        let records = parse_records(&buffer, buffer.len(), 100);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].usn, 1000);
        assert_eq!(records[0].file_reference_number, 11);
        assert_eq!(records[0].parent_file_reference_number, 5);
        assert_eq!(records[0].major_version, 2);
        assert_eq!(records[0].file_name, "report.txt");
        assert_eq!(
            records[0].reason,
            USN_REASON_FILE_CREATE | USN_REASON_CLOSE
        );
        assert!(!records[0].is_dir());

        assert_eq!(records[1].file_name, "projects");
        assert!(records[1].is_dir());
    }

    #[test]
    fn record_extending_past_bytes_returned_ends_the_batch() {
        let record = encode_record(&RecordSpec {
            usn: 2000,
            file_name: "truncated.log",
            ..RecordSpec::default()
        });
        let buffer = encode_read_buffer(4096, &[record]);

        // Report fewer valid bytes than the record declares.
        let records = parse_records(&buffer, buffer.len() - 4, 100);
        assert!(records.is_empty());
    }

    #[test]
    fn zero_length_prefix_ends_the_batch() {
        let record = encode_record(&RecordSpec {
            usn: 3000,
            file_name: "a.txt",
            ..RecordSpec::default()
        });
        let mut buffer = encode_read_buffer(4096, &[record]);
        buffer.extend_from_slice(&[0u8; 16]); // zero-filled tail after the last record

        let records = parse_records(&buffer, buffer.len(), 100);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn stops_at_max_records() {
        let specs: Vec<Vec<u8>> = (0..5)
            .map(|i| {
                encode_record(&RecordSpec {
                    usn: 100 * i,
                    file_name: "f.txt",
                    ..RecordSpec::default()
                })
            })
            .collect();
        let buffer = encode_read_buffer(4096, &specs);

        assert_eq!(parse_records(&buffer, buffer.len(), 3).len(), 3);
        assert_eq!(parse_records(&buffer, buffer.len(), 0).len(), 0);
    }

    #[test]
    fn header_only_buffer_yields_no_records() {
        let buffer = encode_read_buffer(4242, &[]);
        assert!(parse_records(&buffer, buffer.len(), 100).is_empty());
    }

    #[test]
    fn unpaired_surrogate_in_name_is_replaced() {
        let mut record = encode_record(&RecordSpec {
            usn: 4000,
            file_name: "xx",
            ..RecordSpec::default()
        });
        // Overwrite the two name units with a lone high surrogate + 'A'.
        let surrogate = 0xD800u16.to_le_bytes();
        record[60] = surrogate[0];
        record[61] = surrogate[1];
        record[62] = 0x41;
        record[63] = 0x00;
        let buffer = encode_read_buffer(4096, &[record]);

        let records = parse_records(&buffer, buffer.len(), 100);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "\u{FFFD}A");
    }

    #[test]
    fn bogus_name_extent_is_clamped_to_the_record() {
        let mut record = encode_record(&RecordSpec {
            usn: 5000,
            file_name: "ok.txt",
            ..RecordSpec::default()
        });
        // Declare a name length far past the end of the record.
        let bogus = 512u16.to_le_bytes();
        record[56] = bogus[0];
        record[57] = bogus[1];
        let buffer = encode_read_buffer(4096, &[record]);

        let records = parse_records(&buffer, buffer.len(), 100);
        assert_eq!(records.len(), 1);
        assert!(records[0].file_name.starts_with("ok.txt"));
    }
}
