//! Runs one collection cycle over the given volumes and prints each
//! normalized activity.
//!
//! Usage: `tail_activities [volume ...]` (defaults to `C:`). Must run
//! elevated.

#[cfg(windows)]
fn main() {
    use usn_activity_rs::collector::{Collector, CollectorConfig};

    let volumes: Vec<String> = std::env::args().skip(1).collect();
    let config = CollectorConfig {
        volumes: if volumes.is_empty() {
            vec!["C:".to_string()]
        } else {
            volumes
        },
        ..Default::default()
    };

    let mut collector = match Collector::open(config) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match collector.collect_activities() {
        Ok(activities) => {
            for activity in &activities {
                println!(
                    "{} {:?} {} frn={:#x}",
                    activity.timestamp, activity.activity_type, activity.path,
                    activity.file_reference_number
                );
            }
            println!("{} activities this cycle", activities.len());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(not(windows))]
fn main() {
    eprintln!("NTFS change journals are only available on Windows.");
}
