//! Game state detection
//!
//! Classifies what the client is doing from the process table, the on-screen
//! text and the focused window. Keyword matching against UI dumps is
//! best-effort: a menu that happens to contain "Error" reads as a disconnect.

use crate::error::Error;
use crate::gateway::DeviceGateway;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Disconnect and error messages, matched case-insensitively as substrings
pub const DISCONNECT_KEYWORDS: &[&str] = &[
    "Disconnected",
    "Lost Connection",
    "Connection Lost",
    "Unable to Connect",
    "Error",
    "Kicked",
    "Please check your internet",
    "Reconnect",
];

/// In-game UI elements
pub const INGAME_KEYWORDS: &[&str] = &["Chat", "Leaderboard", "Settings", "Menu"];

/// Focused-window fragments that mean the user is on the launcher
pub const HOME_INDICATORS: &[&str] = &["launcher", "home", "desktop"];

/// Runtime state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppState {
    NotRunning,
    Disconnected,
    InGame,
    Loading,
    /// Never produced by the detector
    Unknown,
}

impl AppState {
    /// States that count as a successful join
    pub fn is_joined(self) -> bool {
        matches!(self, AppState::InGame | AppState::Loading)
    }

    /// States that call for a rejoin
    pub fn needs_rejoin(self) -> bool {
        matches!(self, AppState::NotRunning | AppState::Disconnected)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppState::NotRunning => "not_running",
            AppState::Disconnected => "disconnected",
            AppState::InGame => "in_game",
            AppState::Loading => "loading",
            AppState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for AppState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "not_running" => Ok(AppState::NotRunning),
            "disconnected" => Ok(AppState::Disconnected),
            "in_game" => Ok(AppState::InGame),
            "loading" => Ok(AppState::Loading),
            "unknown" => Ok(AppState::Unknown),
            other => Err(Error::Parse(format!("unknown state: {}", other))),
        }
    }
}

/// First screen text containing any of `keywords`, ignoring case
pub fn find_keyword<'t>(texts: &'t [String], keywords: &[&str]) -> Option<&'t str> {
    texts
        .iter()
        .find(|text| {
            let lower = text.to_lowercase();
            keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
        })
        .map(String::as_str)
}

/// Classify a running client from its screen text and focused window
///
/// Priority: disconnect text, in-game text, home launcher, otherwise loading.
pub fn classify_screen(texts: &[String], foreground: Option<&str>) -> AppState {
    if let Some(text) = find_keyword(texts, DISCONNECT_KEYWORDS) {
        warn!("Disconnect detected: '{}'", text);
        return AppState::Disconnected;
    }

    if find_keyword(texts, INGAME_KEYWORDS).is_some() {
        return AppState::InGame;
    }

    if let Some(surface) = foreground {
        let surface = surface.to_lowercase();
        if HOME_INDICATORS.iter().any(|i| surface.contains(i)) {
            return AppState::NotRunning;
        }
    }

    AppState::Loading
}

/// Detects client state through a gateway
pub struct StateDetector<'a, G: DeviceGateway> {
    gateway: &'a G,
    package: String,
}

impl<'a, G: DeviceGateway> StateDetector<'a, G> {
    pub fn new(gateway: &'a G, package: &str) -> Self {
        Self {
            gateway,
            package: package.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.gateway.is_process_running(&self.package)
    }

    /// Whether the client owns the focused window
    pub fn is_foreground(&self) -> bool {
        self.gateway
            .foreground_surface()
            .map(|surface| surface.contains(&self.package))
            .unwrap_or(false)
    }

    /// Classify the current state; never returns `Unknown`
    pub fn detect_state(&self) -> AppState {
        if !self.is_running() {
            debug!("{} not running", self.package);
            return AppState::NotRunning;
        }

        let texts = self.gateway.screen_texts();
        if find_keyword(&texts, DISCONNECT_KEYWORDS).is_some()
            || find_keyword(&texts, INGAME_KEYWORDS).is_some()
        {
            return classify_screen(&texts, None);
        }

        // Only ask for the focused window when the screen text was inconclusive
        let foreground = self.gateway.foreground_surface();
        classify_screen(&texts, foreground.as_deref())
    }

    /// Poll until `target` is observed or `timeout` elapses
    pub fn wait_for_state(&self, target: AppState, timeout: Duration, poll_interval: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.detect_state() == target {
                return true;
            }
            std::thread::sleep(poll_interval);
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;
    use proptest::prelude::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_not_running_when_process_absent() {
        let gateway = FakeGateway::new();
        gateway.set_running(false);
        gateway.set_screen(&["Disconnected", "Chat"]);

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::NotRunning);
        // The screen is never dumped for an absent process
        assert_eq!(gateway.calls("screen_texts"), 0);
    }

    #[test]
    fn test_disconnect_beats_ingame() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Chat", "Leaderboard", "You were kicked from this experience"]);

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::Disconnected);
    }

    #[test]
    fn test_ingame_keywords() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Backpack", "chat"]);

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::InGame);
        assert_eq!(gateway.calls("foreground_surface"), 0);
    }

    #[test]
    fn test_home_launcher_counts_as_not_running() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Phone", "Messages"]);
        gateway.set_foreground(Some("com.android.launcher3/com.android.launcher3.Launcher"));

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::NotRunning);
    }

    #[test]
    fn test_loading_fallback() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&[]);
        gateway.set_foreground(Some("com.roblox.client/com.roblox.client.ActivityNativeMain"));

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::Loading);
        assert_eq!(gateway.calls("screen_texts"), 1);
        assert_eq!(gateway.calls("foreground_surface"), 1);
    }

    #[test]
    fn test_failed_probes_read_as_loading() {
        // Empty dump and no focus info: nothing to go on
        let gateway = FakeGateway::new();
        gateway.set_foreground(None);

        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert_eq!(detector.detect_state(), AppState::Loading);
    }

    #[test]
    fn test_is_foreground() {
        let gateway = FakeGateway::new();
        gateway.set_foreground(Some("com.roblox.client/com.roblox.client.ActivityNativeMain"));
        let detector = StateDetector::new(&gateway, "com.roblox.client");
        assert!(detector.is_foreground());

        gateway.set_foreground(None);
        assert!(!detector.is_foreground());
    }

    #[test]
    fn test_wait_for_state_reached() {
        let gateway = FakeGateway::new();
        gateway.set_screen(&["Chat"]);
        let detector = StateDetector::new(&gateway, "com.roblox.client");

        assert!(detector.wait_for_state(
            AppState::InGame,
            Duration::from_secs(1),
            Duration::from_millis(10)
        ));
    }

    #[test]
    fn test_wait_for_state_times_out() {
        let gateway = FakeGateway::new();
        gateway.set_running(false);
        let detector = StateDetector::new(&gateway, "com.roblox.client");

        let start = Instant::now();
        assert!(!detector.wait_for_state(
            AppState::InGame,
            Duration::from_millis(100),
            Duration::from_millis(10)
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_classify_screen_priority() {
        assert_eq!(
            classify_screen(&texts(&["Settings", "Error code 277"]), Some("launcher")),
            AppState::Disconnected
        );
        assert_eq!(
            classify_screen(&texts(&["Settings"]), Some("com.android.launcher3/x.Launcher")),
            AppState::InGame
        );
    }

    #[test]
    fn test_state_display_and_parse() {
        for state in [
            AppState::NotRunning,
            AppState::Disconnected,
            AppState::InGame,
            AppState::Loading,
            AppState::Unknown,
        ] {
            assert_eq!(state.to_string().parse::<AppState>().unwrap(), state);
        }
        assert_eq!("in-game".parse::<AppState>().unwrap(), AppState::InGame);
        assert!("playing".parse::<AppState>().is_err());
    }

    #[test]
    fn test_joined_states() {
        assert!(AppState::InGame.is_joined());
        assert!(AppState::Loading.is_joined());
        assert!(!AppState::Disconnected.is_joined());
        assert!(AppState::NotRunning.needs_rejoin());
        assert!(!AppState::Unknown.needs_rejoin());
    }

    proptest! {
        #[test]
        fn prop_absent_process_is_not_running(screen in proptest::collection::vec(".{0,20}", 0..6)) {
            let gateway = FakeGateway::new();
            gateway.set_running(false);
            gateway.set_screen_owned(screen);
            let detector = StateDetector::new(&gateway, "com.roblox.client");
            prop_assert_eq!(detector.detect_state(), AppState::NotRunning);
        }

        #[test]
        fn prop_disconnect_keyword_wins(
            keyword in proptest::sample::select(DISCONNECT_KEYWORDS.to_vec()),
            prefix in "[a-z ]{0,8}",
            upper in any::<bool>(),
            ingame in proptest::sample::select(INGAME_KEYWORDS.to_vec()),
        ) {
            let keyword = if upper { keyword.to_uppercase() } else { keyword.to_lowercase() };
            let gateway = FakeGateway::new();
            gateway.set_screen_owned(vec![ingame.to_string(), format!("{}{}", prefix, keyword)]);
            let detector = StateDetector::new(&gateway, "com.roblox.client");
            prop_assert_eq!(detector.detect_state(), AppState::Disconnected);
        }
    }
}
