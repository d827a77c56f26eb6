//! Normalization of raw journal records into the canonical activity taxonomy.
//!
//! A normalized activity keeps the volume-scoped file identity, a coarse
//! activity type, and an attributes map that preserves the raw reason flags
//! and USN verbatim, so downstream consumers can correlate losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::record::JournalRecord;
use crate::{flags, time};

/// Canonical activity taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Create,
    Delete,
    Modify,
    AttributeChange,
    SecurityChange,
    Close,
    Other,
}

/// A single normalized file-activity event. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedActivity {
    pub provider_id: String,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub activity_type: ActivityType,
    /// Single-level path: `volume\filename`. Full-path reconstruction is the
    /// downstream recorder's job, keyed by the file reference numbers.
    pub path: String,
    pub is_directory: bool,
    pub timestamp: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

/// Interface boundary to the downstream hot-tier recorder.
///
/// The recorder resolves file reference numbers to stable external
/// identities and returns one storage identifier per accepted activity; none
/// of that happens in this crate.
pub trait ActivityRecorder {
    type Error;

    fn record_batch(&mut self, batch: &[NormalizedActivity]) -> Result<Vec<String>, Self::Error>;
}

/// Resolves a reason mask to one activity type, by fixed precedence.
///
/// The two rename reasons always arrive as separate records for one logical
/// rename and map to `Other`; pairing them is left to consumers, which can
/// correlate by file reference number. The raw flags stay available in the
/// activity's attributes either way.
pub fn determine_activity_type(reason: u32) -> ActivityType {
    if reason & flags::USN_REASON_FILE_CREATE != 0 {
        ActivityType::Create
    } else if reason & flags::USN_REASON_FILE_DELETE != 0 {
        ActivityType::Delete
    } else if reason & (flags::USN_REASON_RENAME_OLD_NAME | flags::USN_REASON_RENAME_NEW_NAME) != 0
    {
        ActivityType::Other
    } else if reason & flags::USN_REASON_SECURITY_CHANGE != 0 {
        ActivityType::SecurityChange
    } else if reason
        & (flags::USN_REASON_EA_CHANGE
            | flags::USN_REASON_BASIC_INFO_CHANGE
            | flags::USN_REASON_COMPRESSION_CHANGE
            | flags::USN_REASON_ENCRYPTION_CHANGE)
        != 0
    {
        ActivityType::AttributeChange
    } else if reason & flags::USN_REASON_CLOSE != 0 {
        ActivityType::Close
    } else if reason
        & (flags::USN_REASON_DATA_OVERWRITE
            | flags::USN_REASON_DATA_EXTEND
            | flags::USN_REASON_DATA_TRUNCATION)
        != 0
    {
        ActivityType::Modify
    } else {
        ActivityType::Other
    }
}

/// Builds a [`NormalizedActivity`] from a decoded journal record.
pub fn convert_record(
    record: &JournalRecord,
    volume: &str,
    provider_id: &str,
) -> NormalizedActivity {
    let mut attributes = Map::new();
    attributes.insert("reason_flags".to_string(), json!(record.reason_names()));
    attributes.insert("usn".to_string(), json!(record.usn));
    if record.reason & flags::USN_REASON_RENAME_OLD_NAME != 0 {
        attributes.insert("rename_type".to_string(), json!("old_name"));
    } else if record.reason & flags::USN_REASON_RENAME_NEW_NAME != 0 {
        attributes.insert("rename_type".to_string(), json!("new_name"));
    }

    NormalizedActivity {
        provider_id: provider_id.to_string(),
        file_reference_number: record.file_reference_number,
        parent_file_reference_number: record.parent_file_reference_number,
        activity_type: determine_activity_type(record.reason),
        path: format!("{}\\{}", volume.trim_end_matches('\\'), record.file_name),
        is_directory: record.is_dir(),
        timestamp: time::filetime_to_datetime(record.timestamp),
        attributes,
    }
}
