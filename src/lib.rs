//! # usn-activity-rs
//!
//! A Rust library that tracks file create/delete/modify/rename/attribute-change
//! activity on NTFS volumes by tailing the Update Sequence Number (USN) change
//! journal, rather than re-scanning the file tree.
//!
//! Each polling cycle reads the journal from a per-volume cursor, parses the raw
//! variable-length records, and normalizes them into a canonical activity
//! taxonomy for a downstream metadata index. The cursor survives process
//! restarts when state persistence is enabled, and journal rotation (the journal
//! is a bounded circular buffer) is detected and recovered automatically.
//!
//! ## Features
//! - Incremental, resumable journal tailing with per-volume cursors
//! - Rotation detection and recovery to the oldest retained journal position
//! - Normalized activity records with lossless raw reason flags attached
//! - Optional JSON state file so a restarted process resumes where it left off
//!
//! ## Example: collect one cycle of activity
//! ```rust,ignore
//! use usn_activity_rs::collector::{Collector, CollectorConfig};
//!
//! let config = CollectorConfig {
//!     volumes: vec!["C:".to_string()],
//!     ..Default::default()
//! };
//! let mut collector = Collector::open(config)?;
//! for activity in collector.collect_activities()? {
//!     println!("{:?} {}", activity.activity_type, activity.path);
//! }
//! ```
//!
//! ## Platform
//! - Journal reads require a Windows NTFS volume and administrator privileges.
//! - The record parser, activity normalizer, cursor store, and orchestrator are
//!   portable; only the volume handle and ioctl plumbing are Windows-specific.
//!   Other change-journal mechanisms can plug in through the
//!   [`source::JournalIo`] trait.
//!
//! ## License
//! MIT License.

pub mod activity;
pub mod collector;
pub mod errors;
pub mod flags;
pub mod reader;
pub mod record;
pub mod source;
pub mod state;
pub mod time;

#[cfg(windows)]
pub mod ntfs;
#[cfg(windows)]
pub mod volume;

// Re-export commonly used types
pub use errors::CollectorError;

/// A convenient type alias for Results with CollectorError.
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;


pub type Usn = i64;

pub(crate) const READ_BUFFER_SIZE: usize = 4096; // one journal read per cycle per volume

pub const DEFAULT_MAX_RECORDS_PER_CYCLE: usize = 1024;
pub const USN_REASON_MASK_ALL: u32 = 0xFFFFFFFF;
