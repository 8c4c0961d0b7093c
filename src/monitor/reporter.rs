//! Periodic monitor report thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::lifecycle::Shutdown;
use crate::monitor::Monitor;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Spawn a thread that logs `monitor.report()` every `interval`.
pub fn spawn_reporter(
    monitor: Arc<dyn Monitor>,
    interval: Duration,
    shutdown: Shutdown,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("monitor".into())
        .spawn(move || run(monitor, interval, shutdown))
}

fn run(monitor: Arc<dyn Monitor>, interval: Duration, shutdown: Shutdown) {
    tracing::info!(interval_secs = interval.as_secs(), "Monitor reporter starting");
    let mut next = Instant::now() + interval;

    while !shutdown.is_triggered() {
        let now = Instant::now();
        if now < next {
            thread::sleep(SHUTDOWN_POLL.min(next - now));
            continue;
        }
        next = now + interval;

        let report = monitor.report();
        match serde_json::to_string_pretty(&report) {
            Ok(json) => tracing::info!(active_pairs = report.active_pairs, "Monitor stats\n{}", json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize monitor report"),
        }
    }

    tracing::info!("Monitor reporter stopped");
}
