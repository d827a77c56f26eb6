//! The polling orchestrator: one bounded read-parse-normalize pass per volume
//! per cycle.
//!
//! Single-threaded and pull-based. An external scheduler (or [`Collector::run`])
//! calls [`Collector::collect_activities`] on an interval; each cycle issues at
//! most one non-blocking journal read per volume, so there is no need for
//! mid-cycle cancellation. Activities are delivered at-least-once: the cursor
//! only advances after a cycle completes, so a retried cycle may redeliver
//! records already seen downstream.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info};

use crate::activity::{self, NormalizedActivity};
use crate::errors::CollectorError;
use crate::reader::JournalReader;
use crate::source::JournalIo;
use crate::state::{CollectorState, StateStore};
use crate::{DEFAULT_MAX_RECORDS_PER_CYCLE, Usn};

/// Collector configuration.
///
/// `state_file` and `persist_state` together opt into cursor persistence;
/// with persistence off, a fresh process tails each volume from its journal's
/// current start instead of resuming.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub volumes: Vec<String>,
    pub provider_id: String,
    pub max_records_per_cycle: usize,
    pub state_file: Option<PathBuf>,
    pub persist_state: bool,
    pub verbose: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            volumes: Vec::new(),
            provider_id: "ntfs-usn-activity".to_string(),
            max_records_per_cycle: DEFAULT_MAX_RECORDS_PER_CYCLE,
            state_file: None,
            persist_state: false,
            verbose: false,
        }
    }
}

struct VolumeSource<I: JournalIo> {
    volume: String,
    reader: JournalReader<I>,
}

/// Drives the polling cycle across the configured volumes.
///
/// One collector instance owns each volume's handle and cursor for its
/// lifetime. Embedding hosts that poll from several threads must serialize
/// calls to [`Collector::collect_activities`].
pub struct Collector<I: JournalIo> {
    config: CollectorConfig,
    sources: Vec<VolumeSource<I>>,
    state: CollectorState,
    store: Option<StateStore>,
}

impl<I: JournalIo> Collector<I> {
    /// Builds a collector over already-opened journal sources, one per
    /// volume. Loads persisted cursors when persistence is enabled.
    pub fn with_sources(
        config: CollectorConfig,
        sources: Vec<(String, I)>,
    ) -> Result<Self, CollectorError> {
        let store = if config.persist_state {
            config
                .state_file
                .as_ref()
                .map(|path| StateStore::new(path, config.provider_id.as_str()))
        } else {
            None
        };
        let state = store.as_ref().map(StateStore::load).unwrap_or_default();

        let mut opened = Vec::with_capacity(sources.len());
        for (volume, io) in sources {
            let reader = JournalReader::new(io)?;
            opened.push(VolumeSource { volume, reader });
        }

        Ok(Collector {
            config,
            sources: opened,
            state,
            store,
        })
    }

    pub fn state(&self) -> &CollectorState {
        &self.state
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Runs one collection cycle and returns the combined, ordered batch.
    ///
    /// Per-volume failures are fatal for that volume's cycle only: the error
    /// is logged with full journal diagnostics, the cursor stays where it
    /// was, and the next cycle retries from the same position. Journal reads
    /// are non-destructive, so the retry is safe.
    pub fn collect_activities(&mut self) -> Result<Vec<NormalizedActivity>, CollectorError> {
        let max_records = self.config.max_records_per_cycle.max(1);
        let mut activities = Vec::new();

        for source in &mut self.sources {
            let cursor = match self.state.position(&source.volume) {
                Some(cursor) => cursor,
                // No saved cursor: tail from the journal's current start.
                None => source.reader.metadata().first_usn,
            };

            let batch = match source.reader.read_next_batch(cursor, max_records) {
                Ok(batch) => batch,
                Err(err) => {
                    error!(
                        "{}: cycle abandoned, cursor stays at {}: {}",
                        source.volume, cursor, err
                    );
                    continue;
                }
            };

            if batch.recovered {
                info!(
                    "{}: journal rotated, cursor moved {} -> {}",
                    source.volume, cursor, batch.next_usn
                );
            }

            for record in &batch.records {
                if self.config.verbose {
                    debug!(
                        "{}: usn={} {} {:?}",
                        source.volume,
                        record.usn,
                        record.file_name,
                        record.reason_names()
                    );
                }
                activities.push(activity::convert_record(
                    record,
                    &source.volume,
                    &self.config.provider_id,
                ));
            }

            self.state.set_position(&source.volume, batch.next_usn);
        }

        if let Some(store) = &self.store {
            store.save(&self.state)?;
        }

        Ok(activities)
    }

    /// Clears all cursors; with persistence enabled the state file is deleted
    /// and recreated empty.
    pub fn reset_state(&mut self) -> Result<(), CollectorError> {
        match &self.store {
            Some(store) => store.reset(&mut self.state),
            None => {
                self.state.clear();
                Ok(())
            }
        }
    }

    /// Polls until `stop` is set, handing each cycle's batch to `sink`.
    ///
    /// Cancellation is cooperative: a stop request takes effect after the
    /// current cycle, including state persistence, has completed.
    pub fn run(
        &mut self,
        interval: Duration,
        stop: &AtomicBool,
        mut sink: impl FnMut(Vec<NormalizedActivity>),
    ) -> Result<(), CollectorError> {
        while !stop.load(Ordering::Relaxed) {
            let batch = self.collect_activities()?;
            sink(batch);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(interval);
        }
        Ok(())
    }

    /// Last processed position for a volume, if any cycle has run.
    pub fn cursor(&self, volume: &str) -> Option<Usn> {
        self.state.position(volume)
    }
}

#[cfg(windows)]
impl Collector<crate::ntfs::NtfsJournal> {
    /// Opens every configured volume and builds the collector over live NTFS
    /// journals. Fails fast with [`CollectorError::PermissionDenied`] or
    /// [`CollectorError::VolumeUnavailable`] when a volume cannot be opened;
    /// collection cannot proceed without elevated rights and valid devices.
    pub fn open(config: CollectorConfig) -> Result<Self, CollectorError> {
        let mut sources = Vec::with_capacity(config.volumes.len());
        for volume in &config.volumes {
            let journal = crate::ntfs::NtfsJournal::open(volume)?;
            sources.push((volume.clone(), journal));
        }
        Self::with_sources(config, sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityType;
    use crate::flags::{USN_REASON_CLOSE, USN_REASON_FILE_CREATE, USN_REASON_FILE_DELETE};
    use crate::tests::{MockJournal, RecordSpec, encode_read_buffer, encode_record, metadata};

    fn config(volumes: &[&str]) -> CollectorConfig {
        CollectorConfig {
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    fn create_record(usn: Usn, name: &'static str) -> Vec<u8> {
        encode_record(&RecordSpec {
            usn,
            reason: USN_REASON_FILE_CREATE | USN_REASON_CLOSE,
            file_name: name,
            ..RecordSpec::default()
        })
    }

    #[test]
    fn collects_across_volumes_and_updates_cursors() {
        let c_buffer = encode_read_buffer(
            1000,
            &[create_record(100, "a.txt"), create_record(180, "b.txt")],
        );
        let d_buffer = encode_read_buffer(
            2000,
            &[encode_record(&RecordSpec {
                usn: 500,
                reason: USN_REASON_FILE_DELETE,
                file_name: "gone.log",
                ..RecordSpec::default()
            })],
        );

        let c_mock = MockJournal::new(metadata(100, 1000, 100)).with_reads(vec![Ok(c_buffer)]);
        let d_mock = MockJournal::new(metadata(500, 2000, 500)).with_reads(vec![Ok(d_buffer)]);

        let mut collector = Collector::with_sources(
            config(&["C:", "D:"]),
            vec![("C:".to_string(), c_mock), ("D:".to_string(), d_mock)],
        )
        .unwrap();

        let activities = collector.collect_activities().unwrap();
        assert_eq!(activities.len(), 3);
        assert_eq!(activities[0].path, "C:\\a.txt");
        assert_eq!(activities[0].activity_type, ActivityType::Create);
        assert_eq!(activities[2].path, "D:\\gone.log");
        assert_eq!(activities[2].activity_type, ActivityType::Delete);

        assert_eq!(collector.cursor("C:"), Some(1000));
        assert_eq!(collector.cursor("D:"), Some(2000));
    }

    #[test]
    fn cold_start_tails_from_first_usn() {
        let mock = MockJournal::new(metadata(777, 900, 700));
        let log = mock.log();

        let mut collector =
            Collector::with_sources(config(&["C:"]), vec![("C:".to_string(), mock)]).unwrap();
        collector.collect_activities().unwrap();

        assert_eq!(log.read_calls(), vec![777]);
    }

    #[test]
    fn failed_volume_keeps_its_cursor_and_other_volumes_proceed() {
        let good_buffer = encode_read_buffer(1500, &[create_record(100, "ok.txt")]);
        let c_mock = MockJournal::new(metadata(100, 1000, 100)).with_reads(vec![
            Ok(encode_read_buffer(1000, &[create_record(100, "first.txt")])),
            Err(CollectorError::Fatal {
                volume: "C:".to_string(),
                journal_id: 1,
                first_usn: 100,
                next_usn: 1000,
                lowest_valid_usn: 100,
                requested_usn: 1000,
                message: "device failure".to_string(),
            }),
        ]);
        let d_mock = MockJournal::new(metadata(100, 1500, 100))
            .with_reads(vec![Ok(encode_read_buffer(600, &[])), Ok(good_buffer)]);

        let mut collector = Collector::with_sources(
            config(&["C:", "D:"]),
            vec![("C:".to_string(), c_mock), ("D:".to_string(), d_mock)],
        )
        .unwrap();

        collector.collect_activities().unwrap();
        assert_eq!(collector.cursor("C:"), Some(1000));

        let second = collector.collect_activities().unwrap();
        // C: failed and kept its cursor; D: still produced records.
        assert_eq!(collector.cursor("C:"), Some(1000));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].path, "D:\\ok.txt");
        assert_eq!(collector.cursor("D:"), Some(1500));
    }

    #[test]
    fn persisted_cursor_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("usn_state.json");
        let persistent_config = CollectorConfig {
            state_file: Some(state_file.clone()),
            persist_state: true,
            ..config(&["C:"])
        };

        let first_process = MockJournal::new(metadata(100, 1000, 100))
            .with_reads(vec![Ok(encode_read_buffer(1000, &[create_record(100, "x")]))]);
        let mut collector = Collector::with_sources(
            persistent_config.clone(),
            vec![("C:".to_string(), first_process)],
        )
        .unwrap();
        collector.collect_activities().unwrap();
        drop(collector);

        let second_process = MockJournal::new(metadata(100, 1000, 100));
        let log = second_process.log();
        let mut restarted = Collector::with_sources(
            persistent_config,
            vec![("C:".to_string(), second_process)],
        )
        .unwrap();
        restarted.collect_activities().unwrap();

        // Resumed from the persisted cursor, not from first_usn.
        assert_eq!(log.read_calls(), vec![1000]);
    }

    #[test]
    fn reset_state_drops_cursors_and_empties_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let persistent_config = CollectorConfig {
            state_file: Some(dir.path().join("usn_state.json")),
            persist_state: true,
            ..config(&["C:"])
        };

        let mock = MockJournal::new(metadata(100, 1000, 100))
            .with_reads(vec![Ok(encode_read_buffer(1000, &[create_record(100, "x")]))]);
        let mut collector =
            Collector::with_sources(persistent_config, vec![("C:".to_string(), mock)]).unwrap();

        collector.collect_activities().unwrap();
        assert_eq!(collector.cursor("C:"), Some(1000));

        collector.reset_state().unwrap();
        assert!(collector.state().is_empty());
    }

    #[test]
    fn rotation_recovery_moves_the_cursor_to_the_retained_window() {
        let mock = MockJournal::new(metadata(100, 1000, 100))
            .with_queries(vec![metadata(100, 1000, 100), metadata(5000, 9000, 4800)])
            .with_reads(vec![
                Ok(encode_read_buffer(1000, &[create_record(100, "x")])),
                Err(CollectorError::JournalRotated),
            ]);

        let mut collector =
            Collector::with_sources(config(&["C:"]), vec![("C:".to_string(), mock)]).unwrap();

        collector.collect_activities().unwrap();
        assert_eq!(collector.cursor("C:"), Some(1000));

        let recovered_cycle = collector.collect_activities().unwrap();
        assert!(recovered_cycle.is_empty());
        assert_eq!(collector.cursor("C:"), Some(4800)); // lowest_valid_usn
    }

    #[test]
    fn run_stops_cooperatively_after_the_current_cycle() {
        let mock = MockJournal::new(metadata(100, 1000, 100));
        let mut collector =
            Collector::with_sources(config(&["C:"]), vec![("C:".to_string(), mock)]).unwrap();

        let stop = AtomicBool::new(false);
        let mut cycles = 0;
        collector
            .run(Duration::from_millis(1), &stop, |_| {
                cycles += 1;
                if cycles == 3 {
                    stop.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();

        assert_eq!(cycles, 3);
    }
}
