//! Reason and attribute bitmask vocabulary for USN journal records.
//!
//! The bit values mirror the `USN_REASON_*` and `FILE_ATTRIBUTE_*` constants
//! from `winioctl.h`/`winnt.h`. They are declared here so that record decoding
//! works on any host, not just where the Windows API bindings are available.

pub const USN_REASON_DATA_OVERWRITE: u32 = 0x0000_0001;
pub const USN_REASON_DATA_EXTEND: u32 = 0x0000_0002;
pub const USN_REASON_DATA_TRUNCATION: u32 = 0x0000_0004;
pub const USN_REASON_NAMED_DATA_OVERWRITE: u32 = 0x0000_0010;
pub const USN_REASON_NAMED_DATA_EXTEND: u32 = 0x0000_0020;
pub const USN_REASON_NAMED_DATA_TRUNCATION: u32 = 0x0000_0040;
pub const USN_REASON_FILE_CREATE: u32 = 0x0000_0100;
pub const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
pub const USN_REASON_EA_CHANGE: u32 = 0x0000_0400;
pub const USN_REASON_SECURITY_CHANGE: u32 = 0x0000_0800;
pub const USN_REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
pub const USN_REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;
pub const USN_REASON_INDEXABLE_CHANGE: u32 = 0x0000_4000;
pub const USN_REASON_BASIC_INFO_CHANGE: u32 = 0x0000_8000;
pub const USN_REASON_HARD_LINK_CHANGE: u32 = 0x0001_0000;
pub const USN_REASON_COMPRESSION_CHANGE: u32 = 0x0002_0000;
pub const USN_REASON_ENCRYPTION_CHANGE: u32 = 0x0004_0000;
pub const USN_REASON_OBJECT_ID_CHANGE: u32 = 0x0008_0000;
pub const USN_REASON_REPARSE_POINT_CHANGE: u32 = 0x0010_0000;
pub const USN_REASON_STREAM_CHANGE: u32 = 0x0020_0000;
pub const USN_REASON_TRANSACTED_CHANGE: u32 = 0x0040_0000;
pub const USN_REASON_INTEGRITY_CHANGE: u32 = 0x0080_0000;
pub const USN_REASON_DESIRED_STORAGE_CLASS_CHANGE: u32 = 0x0100_0000;
pub const USN_REASON_CLOSE: u32 = 0x8000_0000;

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x0000_0004;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
pub const FILE_ATTRIBUTE_TEMPORARY: u32 = 0x0000_0100;
pub const FILE_ATTRIBUTE_SPARSE_FILE: u32 = 0x0000_0200;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;
pub const FILE_ATTRIBUTE_COMPRESSED: u32 = 0x0000_0800;
pub const FILE_ATTRIBUTE_OFFLINE: u32 = 0x0000_1000;
pub const FILE_ATTRIBUTE_NOT_CONTENT_INDEXED: u32 = 0x0000_2000;
pub const FILE_ATTRIBUTE_ENCRYPTED: u32 = 0x0000_4000;

/// Ordered (bit, name) table for the reason mask. Built once, never mutated.
pub const REASON_FLAGS: &[(u32, &str)] = &[
    (USN_REASON_DATA_OVERWRITE, "DATA_OVERWRITE"),
    (USN_REASON_DATA_EXTEND, "DATA_EXTEND"),
    (USN_REASON_DATA_TRUNCATION, "DATA_TRUNCATION"),
    (USN_REASON_NAMED_DATA_OVERWRITE, "NAMED_DATA_OVERWRITE"),
    (USN_REASON_NAMED_DATA_EXTEND, "NAMED_DATA_EXTEND"),
    (USN_REASON_NAMED_DATA_TRUNCATION, "NAMED_DATA_TRUNCATION"),
    (USN_REASON_FILE_CREATE, "FILE_CREATE"),
    (USN_REASON_FILE_DELETE, "FILE_DELETE"),
    (USN_REASON_EA_CHANGE, "EA_CHANGE"),
    (USN_REASON_SECURITY_CHANGE, "SECURITY_CHANGE"),
    (USN_REASON_RENAME_OLD_NAME, "RENAME_OLD_NAME"),
    (USN_REASON_RENAME_NEW_NAME, "RENAME_NEW_NAME"),
    (USN_REASON_INDEXABLE_CHANGE, "INDEXABLE_CHANGE"),
    (USN_REASON_BASIC_INFO_CHANGE, "BASIC_INFO_CHANGE"),
    (USN_REASON_HARD_LINK_CHANGE, "HARD_LINK_CHANGE"),
    (USN_REASON_COMPRESSION_CHANGE, "COMPRESSION_CHANGE"),
    (USN_REASON_ENCRYPTION_CHANGE, "ENCRYPTION_CHANGE"),
    (USN_REASON_OBJECT_ID_CHANGE, "OBJECT_ID_CHANGE"),
    (USN_REASON_REPARSE_POINT_CHANGE, "REPARSE_POINT_CHANGE"),
    (USN_REASON_STREAM_CHANGE, "STREAM_CHANGE"),
    (USN_REASON_TRANSACTED_CHANGE, "TRANSACTED_CHANGE"),
    (USN_REASON_INTEGRITY_CHANGE, "INTEGRITY_CHANGE"),
    (
        USN_REASON_DESIRED_STORAGE_CLASS_CHANGE,
        "DESIRED_STORAGE_CLASS_CHANGE",
    ),
    (USN_REASON_CLOSE, "CLOSE"),
];

/// Ordered (bit, name) table for the file attributes mask.
pub const ATTRIBUTE_FLAGS: &[(u32, &str)] = &[
    (FILE_ATTRIBUTE_READONLY, "READONLY"),
    (FILE_ATTRIBUTE_HIDDEN, "HIDDEN"),
    (FILE_ATTRIBUTE_SYSTEM, "SYSTEM"),
    (FILE_ATTRIBUTE_DIRECTORY, "DIRECTORY"),
    (FILE_ATTRIBUTE_ARCHIVE, "ARCHIVE"),
    (FILE_ATTRIBUTE_NORMAL, "NORMAL"),
    (FILE_ATTRIBUTE_TEMPORARY, "TEMPORARY"),
    (FILE_ATTRIBUTE_SPARSE_FILE, "SPARSE_FILE"),
    (FILE_ATTRIBUTE_REPARSE_POINT, "REPARSE_POINT"),
    (FILE_ATTRIBUTE_COMPRESSED, "COMPRESSED"),
    (FILE_ATTRIBUTE_OFFLINE, "OFFLINE"),
    (FILE_ATTRIBUTE_NOT_CONTENT_INDEXED, "NOT_CONTENT_INDEXED"),
    (FILE_ATTRIBUTE_ENCRYPTED, "ENCRYPTED"),
];

/// Decodes a reason mask into symbolic names. A record commonly sets several
/// bits at once, so the result is a list, in table order.
pub fn reason_names(reason: u32) -> Vec<&'static str> {
    REASON_FLAGS
        .iter()
        .filter(|(bit, _)| reason & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Decodes a file attributes mask into symbolic names, in table order.
pub fn attribute_names(attributes: u32) -> Vec<&'static str> {
    ATTRIBUTE_FLAGS
        .iter()
        .filter(|(bit, _)| attributes & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_names_decodes_multiple_bits_in_table_order() {
        let mask = USN_REASON_DATA_EXTEND | USN_REASON_CLOSE | USN_REASON_FILE_CREATE;
        let names = reason_names(mask);
        assert_eq!(names, vec!["DATA_EXTEND", "FILE_CREATE", "CLOSE"]);
    }

    #[test]
    fn reason_names_empty_for_zero_mask() {
        assert!(reason_names(0).is_empty());
    }

    #[test]
    fn reason_names_ignores_unknown_bits() {
        // 0x0000_0008 and 0x0000_0080 are not assigned reason bits
        assert!(reason_names(0x0000_0008 | 0x0000_0080).is_empty());
    }

    #[test]
    fn attribute_names_decodes_directory_and_hidden() {
        let names = attribute_names(FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_HIDDEN);
        assert_eq!(names, vec!["HIDDEN", "DIRECTORY"]);
    }
}
