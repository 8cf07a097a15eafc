//! Launch and rejoin sequence
//!
//! Force-stop, open the session URI pinned to the client package, tap through
//! the play prompt, then check where the client ended up. Attempts are
//! retried with a fixed back-off up to a hard ceiling.

use crate::config::{Config, SessionTarget, Timings};
use crate::detector::{AppState, StateDetector};
use crate::error::{Error, Result};
use crate::gateway::DeviceGateway;
use crate::link::{place_uri, resolve};
use crate::screenshot::ScreenshotManager;
use crate::shutdown::Shutdown;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Continuation buttons that may cover the game after launch
pub const PROMPT_BUTTONS: &[&str] = &["play", "join", "continue"];

/// Vertical position of the prompt button, percent of screen height
const PROMPT_TAP_HEIGHT_PERCENT: u32 = 60;

pub struct Launcher<'a, G: DeviceGateway> {
    gateway: &'a G,
    detector: StateDetector<'a, G>,
    package: String,
    target: SessionTarget,
    max_retries: u32,
    timings: Timings,
    screenshots: Option<ScreenshotManager>,
    shutdown: Shutdown,
}

impl<'a, G: DeviceGateway> Launcher<'a, G> {
    pub fn new(gateway: &'a G, config: &Config) -> Result<Self> {
        let screenshots = config
            .screenshot_on_failure
            .then(|| ScreenshotManager::new(&config.screenshots_dir));

        Ok(Self {
            gateway,
            detector: StateDetector::new(gateway, &config.package),
            package: config.package.clone(),
            target: config.session_target()?,
            max_retries: config.launch_retries,
            timings: config.timings.clone(),
            screenshots,
            shutdown: Shutdown::new(),
        })
    }

    /// Abandon the sequence between steps once `shutdown` is triggered
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// URI an attempt will open
    pub fn launch_uri(&self) -> String {
        match &self.target {
            SessionTarget::Link(link) => resolve(link),
            SessionTarget::PlaceId(id) => place_uri(id),
        }
    }

    /// Force-stop the client; a process that was already gone is fine
    pub fn kill(&self) -> bool {
        debug!("Killing {}...", self.package);
        let stopped = self.gateway.force_stop(&self.package);
        if stopped {
            debug!("{} killed", self.package);
        } else {
            warn!("Failed to kill {}", self.package);
        }
        stopped
    }

    /// Start the client without joining anything
    pub fn launch_app(&self) -> bool {
        info!("Launching {}...", self.package);
        let started = self.gateway.start_activity(&self.package, None);
        if started {
            info!("{} launched", self.package);
        } else {
            error!("Failed to launch {}", self.package);
        }
        started
    }

    /// Tap the play prompt if one is showing
    ///
    /// The tap lands at horizontal center, 60% down, which is where the
    /// prompt usually sits; nothing checks that the button is really there.
    pub fn dismiss_prompt(&self) -> bool {
        let texts = self.gateway.screen_texts();
        let Some(button) = texts
            .iter()
            .find(|text| PROMPT_BUTTONS.contains(&text.trim().to_lowercase().as_str()))
        else {
            return false;
        };
        debug!("Found button: {}", button);

        let Some((width, height)) = self.gateway.screen_size() else {
            warn!("Screen size unknown, cannot tap '{}'", button);
            return false;
        };

        let x = width / 2;
        let y = height * PROMPT_TAP_HEIGHT_PERCENT / 100;
        debug!("Tapping '{}' at ({}, {})", button, x, y);
        let tapped = self.gateway.tap(x, y);
        self.pause(self.timings.prompt_tap_settle());
        tapped
    }

    fn join(&self) -> Result<()> {
        let uri = self.launch_uri();
        info!("Joining via {}", uri);

        if !self.gateway.open_uri(&uri, Some(&self.package)) {
            return Err(Error::Launch(format!("failed to open {}", uri)));
        }
        info!("Deep link opened, waiting for game to load...");

        if self.pause(self.timings.load_wait()) {
            return Err(Error::Interrupted);
        }
        self.dismiss_prompt();
        Ok(())
    }

    fn attempt(&self) -> Result<AppState> {
        self.kill();
        if self.pause(self.timings.settle()) {
            return Err(Error::Interrupted);
        }

        self.join()?;

        info!("Verifying game join...");
        if self.pause(self.timings.verify()) {
            return Err(Error::Interrupted);
        }
        Ok(self.detector.detect_state())
    }

    /// Run the full sequence, at most `max_retries + 1` times
    pub fn rejoin(&self) -> bool {
        let total = self.max_retries + 1;

        for attempt in 1..=total {
            if self.shutdown.is_triggered() {
                warn!("Shutdown requested, abandoning rejoin");
                return false;
            }
            info!("Starting launch sequence (attempt {}/{})", attempt, total);

            match self.attempt() {
                Ok(state) if state.is_joined() => {
                    info!("Successfully joined game ({})", state);
                    return true;
                }
                Ok(state) => warn!("Unexpected state after join: {}", state),
                Err(Error::Interrupted) => {
                    warn!("Shutdown requested, abandoning rejoin");
                    return false;
                }
                Err(e) => error!("Launch error: {}", e),
            }

            if let Some(screenshots) = &self.screenshots {
                screenshots.on_error(self.gateway, "rejoin");
            }

            if attempt < total {
                info!("Retrying in {:?}...", self.timings.retry_backoff());
                if self.pause(self.timings.retry_backoff()) {
                    warn!("Shutdown requested, abandoning rejoin");
                    return false;
                }
            }
        }

        false
    }

    /// Sleep unless shutdown cuts it short; true if shutdown was requested
    fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.shutdown.is_triggered();
        }
        self.shutdown.sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;
    use tempfile::TempDir;

    fn config() -> Config {
        Config::for_test(&std::env::temp_dir())
    }

    #[test]
    fn test_launch_uri_place_id() {
        let gateway = FakeGateway::new();
        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert_eq!(launcher.launch_uri(), "roblox://placeId=1554960397");
    }

    #[test]
    fn test_launch_uri_link() {
        let mut config = config();
        config.game_id = None;
        config.vip_server_link = Some("https://www.roblox.com/share?code=abc&type=Server".to_string());
        let gateway = FakeGateway::new();
        let launcher = Launcher::new(&gateway, &config).unwrap();
        assert_eq!(
            launcher.launch_uri(),
            "roblox://navigation/share_links?code=abc&type=Server"
        );
    }

    #[test]
    fn test_new_requires_session() {
        let mut config = config();
        config.game_id = None;
        let gateway = FakeGateway::new();
        assert!(Launcher::new(&gateway, &config).is_err());
    }

    #[test]
    fn test_rejoin_success_first_attempt() {
        let gateway = FakeGateway::new();
        gateway.set_running(false);
        gateway.set_launch_screens(&[&["Chat", "Leaderboard"]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.rejoin());

        assert_eq!(gateway.calls("force_stop"), 1);
        assert_eq!(
            gateway.opened_uris(),
            vec![(
                "roblox://placeId=1554960397".to_string(),
                Some("com.roblox.client".to_string())
            )]
        );
    }

    #[test]
    fn test_loading_counts_as_success() {
        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&[]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.rejoin());
        assert_eq!(gateway.calls("open_uri"), 1);
    }

    #[test]
    fn test_rejoin_gives_up_after_max_retries() {
        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&["Disconnected"]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(!launcher.rejoin());
        assert_eq!(gateway.calls("open_uri"), 4);
        assert_eq!(gateway.calls("force_stop"), 4);
    }

    #[test]
    fn test_rejoin_retries_then_succeeds() {
        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&["Error 277"], &["Kicked"], &["Chat"]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.rejoin());
        assert_eq!(gateway.calls("open_uri"), 3);
    }

    #[test]
    fn test_open_failure_skips_verification() {
        let gateway = FakeGateway::new();
        gateway.set_open_uri_result(false);

        let mut config = config();
        config.launch_retries = 1;
        let launcher = Launcher::new(&gateway, &config).unwrap();

        assert!(!launcher.rejoin());
        assert_eq!(gateway.calls("open_uri"), 2);
        // No dump for the prompt and none for verification
        assert_eq!(gateway.calls("screen_texts"), 0);
    }

    #[test]
    fn test_dismiss_prompt_taps_center() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Welcome back", " Play "]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.dismiss_prompt());
        assert_eq!(gateway.taps(), vec![(540, 1440)]);
    }

    #[test]
    fn test_dismiss_prompt_needs_exact_label() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Play with friends"]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(!launcher.dismiss_prompt());
        assert!(gateway.taps().is_empty());
    }

    #[test]
    fn test_dismiss_prompt_without_screen_size() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Continue"]);
        gateway.set_screen_size(None);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(!launcher.dismiss_prompt());
        assert!(gateway.taps().is_empty());
    }

    #[test]
    fn test_rejoin_taps_prompt_after_launch() {
        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&["Join"]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.rejoin());
        assert_eq!(gateway.taps(), vec![(540, 1440)]);
    }

    #[test]
    fn test_failed_attempts_capture_screenshots() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::for_test(temp.path());
        config.screenshot_on_failure = true;
        config.launch_retries = 0;

        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&["Disconnected"]]);

        let launcher = Launcher::new(&gateway, &config).unwrap();
        assert!(!launcher.rejoin());
        assert_eq!(gateway.calls("capture_screenshot"), 1);
        assert_eq!(std::fs::read_dir(&config.screenshots_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_force_stop_still_launches() {
        let gateway = FakeGateway::new();
        gateway.set_force_stop_result(false);
        gateway.set_launch_screens(&[&["Chat"]]);

        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(!launcher.kill());
        assert!(launcher.rejoin());
        assert_eq!(gateway.calls("force_stop"), 2);
        assert_eq!(gateway.calls("open_uri"), 1);
    }

    #[test]
    fn test_rejoin_skipped_after_shutdown() {
        let gateway = FakeGateway::new();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let launcher = Launcher::new(&gateway, &config())
            .unwrap()
            .with_shutdown(shutdown);
        assert!(!launcher.rejoin());
        assert_eq!(gateway.calls("force_stop"), 0);
        assert_eq!(gateway.calls("open_uri"), 0);
    }

    #[test]
    fn test_shutdown_interrupts_load_wait() {
        let gateway = FakeGateway::new();
        gateway.set_launch_screens(&[&["Disconnected"]]);

        let mut config = config();
        config.timings.load_wait_ms = 5_000;
        config.timings.retry_backoff_ms = 5_000;

        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });

        let start = std::time::Instant::now();
        let launcher = Launcher::new(&gateway, &config)
            .unwrap()
            .with_shutdown(shutdown);
        assert!(!launcher.rejoin());
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(3));
        // The open already in flight finishes, nothing after it runs
        assert_eq!(gateway.calls("open_uri"), 1);
        assert_eq!(gateway.calls("screen_texts"), 0);
    }

    #[test]
    fn test_launch_app() {
        let gateway = FakeGateway::new();
        gateway.set_running(false);
        let launcher = Launcher::new(&gateway, &config()).unwrap();
        assert!(launcher.launch_app());
        assert_eq!(gateway.calls("start_activity"), 1);
    }
}
