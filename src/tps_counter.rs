use std::time::Instant;

use tracing::info;

use crate::constants::TARGET;

/// Counts trades written since the last logging lap.
pub struct TpsCounter {
    count: u64,
    lap_started: Instant,
}

impl Default for TpsCounter {
    fn default() -> Self {
        Self {
            count: 0,
            lap_started: Instant::now(),
        }
    }
}

impl TpsCounter {
    pub fn add(&mut self, n: u64) {
        self.count += n;
    }
}

/// Log the lap's throughput and start a new lap. Idle laps stay quiet.
pub fn lap_and_log_tps(counter: &mut TpsCounter) {
    let elapsed = counter.lap_started.elapsed().as_secs_f64();
    if elapsed > 0.0 && counter.count > 0 {
        info!(
            target: TARGET,
            "{:.2} trades/s over the last {:.0}s",
            counter.count as f64 / elapsed,
            elapsed
        );
    }
    counter.count = 0;
    counter.lap_started = Instant::now();
}
