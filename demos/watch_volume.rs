//! Polls a volume's change journal on an interval with cursor persistence
//! enabled, so a restarted process resumes where the last run stopped.
//!
//! Usage: `watch_volume [volume]` (defaults to `C:`). Must run elevated.

#[cfg(windows)]
fn main() {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use usn_activity_rs::collector::{Collector, CollectorConfig};

    let volume = std::env::args().nth(1).unwrap_or_else(|| "C:".to_string());
    let config = CollectorConfig {
        volumes: vec![volume],
        state_file: Some(std::env::temp_dir().join("usn_activity_state.json")),
        persist_state: true,
        ..Default::default()
    };

    let mut collector = match Collector::open(config) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop = AtomicBool::new(false);
    let result = collector.run(Duration::from_secs(2), &stop, |activities| {
        for activity in activities {
            println!("{:?} {}", activity.activity_type, activity.path);
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(windows))]
fn main() {
    eprintln!("NTFS change journals are only available on Windows.");
}
