//! Rejoin statistics

use chrono::{DateTime, Duration, Local};
use tracing::info;

const RULE: &str = "────────────────────────────────────────────────────────────";

/// Counters for the lifetime of the process
#[derive(Debug, Clone)]
pub struct RunStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub started_at: DateTime<Local>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            successes: 0,
            failures: 0,
            started_at: Local::now(),
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Percentage of successful rejoins, `None` before the first attempt
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        Some(self.successes as f64 / self.attempts as f64 * 100.0)
    }

    pub fn uptime(&self) -> Duration {
        Local::now() - self.started_at
    }

    /// Log a statistics block
    pub fn report(&self) {
        info!("{}", RULE);
        info!("STATISTICS");
        info!("{}", RULE);
        info!("Uptime:          {}", format_uptime(self.uptime()));
        info!("Rejoin Attempts: {}", self.attempts);
        info!("Success:         {}", self.successes);
        info!("Failed:          {}", self.failures);
        if let Some(rate) = self.success_rate() {
            info!("Success Rate:    {:.1}%", rate);
        }
        info!("{}", RULE);
    }
}

/// `Hh Mm`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.num_seconds().max(0);
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}
