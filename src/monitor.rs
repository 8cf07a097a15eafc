//! Monitor loop
//!
//! Polls the client state on a fixed cadence and drives rejoins. All state
//! here is owned by the loop; nothing else mutates the statistics.

use crate::config::Config;
use crate::detector::{AppState, StateDetector};
use crate::error::Result;
use crate::gateway::DeviceGateway;
use crate::launcher::Launcher;
use crate::shutdown::Shutdown;
use crate::stats::RunStats;
use tracing::{debug, error, info, warn};

/// Statistics are reported every this many ticks
pub const STATS_EVERY_TICKS: u64 = 20;

const BANNER_RULE: &str = "============================================================";

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Rejoined,
    RejoinFailed,
    /// Rejoin failed and the failure threshold triggered a cooldown
    Cooldown,
}

pub struct Monitor<'a, G: DeviceGateway> {
    config: &'a Config,
    gateway: &'a G,
    detector: StateDetector<'a, G>,
    launcher: Launcher<'a, G>,
    shutdown: Shutdown,
    stats: RunStats,
    last_state: Option<AppState>,
    consecutive_failures: u32,
    ticks: u64,
    reports: u64,
    stopped: bool,
}

impl<'a, G: DeviceGateway> Monitor<'a, G> {
    pub fn new(gateway: &'a G, config: &'a Config, shutdown: Shutdown) -> Result<Self> {
        Ok(Self {
            config,
            gateway,
            detector: StateDetector::new(gateway, &config.package),
            launcher: Launcher::new(gateway, config)?.with_shutdown(shutdown.clone()),
            shutdown,
            stats: RunStats::new(),
            last_state: None,
            consecutive_failures: 0,
            ticks: 0,
            reports: 0,
            stopped: false,
        })
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_state(&self) -> Option<AppState> {
        self.last_state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of periodic statistics reports emitted so far
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Classify once and rejoin if the client is not already in game
    pub fn start(&mut self) -> AppState {
        let initial = self.detector.detect_state();
        info!("Initial state: {}", initial);

        if initial != AppState::InGame {
            info!("Starting initial game join...");
            self.launcher.rejoin();
        }
        initial
    }

    /// One poll: classify, log transitions, rejoin on bad states
    pub fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;

        let state = self.detector.detect_state();
        if self.last_state != Some(state) {
            let previous = self
                .last_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string());
            info!("State changed: {} -> {}", previous, state);
            self.last_state = Some(state);
        }

        let outcome = match state {
            AppState::NotRunning => {
                warn!("Game not running!");
                self.handle_rejoin("crashed or closed")
            }
            AppState::Disconnected => {
                warn!("Disconnected from game!");
                self.handle_rejoin("disconnected")
            }
            AppState::InGame => {
                if self.consecutive_failures > 0 {
                    info!("Back in game, resetting failure counter");
                    self.consecutive_failures = 0;
                }
                TickOutcome::Idle
            }
            AppState::Loading => {
                debug!("Game is loading...");
                TickOutcome::Idle
            }
            AppState::Unknown => {
                debug!("Unknown state, waiting");
                TickOutcome::Idle
            }
        };

        if self.ticks % STATS_EVERY_TICKS == 0 {
            self.stats.report();
            self.reports += 1;
        }

        outcome
    }

    fn handle_rejoin(&mut self, reason: &str) -> TickOutcome {
        self.stats.record_attempt();
        warn!("Attempting to rejoin (reason: {})", reason);

        if self.launcher.rejoin() {
            self.stats.record_success();
            info!("Successfully rejoined");
            self.consecutive_failures = 0;
            return TickOutcome::Rejoined;
        }

        self.stats.record_failure();
        self.consecutive_failures += 1;
        error!("Failed to rejoin ({} in a row)", self.consecutive_failures);

        if self.shutdown.is_triggered() {
            return TickOutcome::RejoinFailed;
        }

        if self.consecutive_failures >= self.config.max_retries {
            error!(
                "CRITICAL: too many consecutive failures ({})",
                self.consecutive_failures
            );
            let cooldown = self.config.timings.cooldown();
            warn!("Waiting {}s before next attempt...", cooldown.as_secs());
            self.shutdown.sleep(cooldown);
            self.consecutive_failures = 0;
            return TickOutcome::Cooldown;
        }

        TickOutcome::RejoinFailed
    }

    /// Run until shutdown is requested
    pub fn run(&mut self) -> Result<()> {
        let gateway = self.gateway;
        if let Err(e) = gateway.ensure_available() {
            // Never started, nothing to report
            self.stopped = true;
            return Err(e);
        }

        info!("{}", BANNER_RULE);
        info!("AUTO-REJOIN STARTED");
        info!("{}", BANNER_RULE);
        info!("Package: {}", self.config.package);
        info!("Launch URI: {}", self.launcher.launch_uri());
        info!("Check Interval: {}s", self.config.check_interval);
        info!("Max Retries: {}", self.config.max_retries);
        info!("Launch Retries: {}", self.launcher.max_retries());

        self.start();

        while !self.shutdown.is_triggered() {
            self.tick();
            if self.shutdown.sleep(self.config.check_interval()) {
                break;
            }
        }

        self.stop();
        Ok(())
    }

    /// Log the final banner and statistics; only the first call does anything
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("{}", BANNER_RULE);
        info!("MONITORING STOPPED");
        info!("{}", BANNER_RULE);
        self.stats.report();
    }
}

impl<'a, G: DeviceGateway> Drop for Monitor<'a, G> {
    // Also covers a panic unwinding out of a tick
    fn drop(&mut self) {
        self.stop();
    }
}
