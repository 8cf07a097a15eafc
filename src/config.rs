//! Configuration, session target and timings

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Android package of the Roblox client
pub const DEFAULT_PACKAGE: &str = "com.roblox.client";

/// File name looked up in the working directory before the per-user config dir
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Where the game should be rejoined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Numeric place id, opened as `roblox://placeId=<id>`
    PlaceId(String),
    /// A shared (usually private server) link, resolved before opening
    Link(String),
}

/// How shell commands reach the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    /// Run commands directly with `sh -c` (rooted shell on the device itself)
    #[default]
    Local,
    /// Run commands through `adb shell`
    Adb {
        #[serde(default = "default_adb_path")]
        adb_path: String,
        #[serde(default)]
        serial: Option<String>,
    },
}

fn default_adb_path() -> String {
    "adb".to_string()
}

/// Fixed delays used by the rejoin sequence and the escalation cooldown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub settle_ms: u64,
    pub load_wait_ms: u64,
    pub prompt_tap_settle_ms: u64,
    pub verify_ms: u64,
    pub retry_backoff_ms: u64,
    pub cooldown_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_ms: 2_000,
            load_wait_ms: 10_000,
            prompt_tap_settle_ms: 2_000,
            verify_ms: 5_000,
            retry_backoff_ms: 5_000,
            cooldown_secs: 60,
        }
    }
}

impl Timings {
    /// No delays at all (tests and dry runs)
    pub fn instant() -> Self {
        Self {
            settle_ms: 0,
            load_wait_ms: 0,
            prompt_tap_settle_ms: 0,
            verify_ms: 0,
            retry_backoff_ms: 0,
            cooldown_secs: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn load_wait(&self) -> Duration {
        Duration::from_millis(self.load_wait_ms)
    }

    pub fn prompt_tap_settle(&self) -> Duration {
        Duration::from_millis(self.prompt_tap_settle_ms)
    }

    pub fn verify(&self) -> Duration {
        Duration::from_millis(self.verify_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Run configuration, immutable once the monitor starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "roblox_package")]
    pub package: String,
    #[serde(
        deserialize_with = "deserialize_game_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip_server_link: Option<String>,
    /// Seconds between monitor ticks
    pub check_interval: u64,
    /// Consecutive failed rejoins before the cooldown kicks in
    pub max_retries: u32,
    /// Extra attempts inside a single rejoin sequence
    pub launch_retries: u32,
    pub transport: Transport,
    pub command_timeout_secs: u64,
    pub logs_dir: PathBuf,
    pub screenshot_on_failure: bool,
    pub screenshots_dir: PathBuf,
    pub timings: Timings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package: DEFAULT_PACKAGE.to_string(),
            game_id: None,
            vip_server_link: None,
            check_interval: 30,
            max_retries: 3,
            launch_retries: 3,
            transport: Transport::Local,
            command_timeout_secs: 10,
            logs_dir: PathBuf::from("logs"),
            screenshot_on_failure: false,
            screenshots_dir: PathBuf::from("logs/screenshots"),
            timings: Timings::default(),
        }
    }
}

impl Config {
    /// Create config for testing: numeric place id, no delays, paths under `temp_dir`
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            package: DEFAULT_PACKAGE.to_string(),
            game_id: Some("1554960397".to_string()),
            vip_server_link: None,
            check_interval: 1,
            max_retries: 3,
            launch_retries: 3,
            transport: Transport::Local,
            command_timeout_secs: 5,
            logs_dir: temp_dir.join("logs"),
            screenshot_on_failure: false,
            screenshots_dir: temp_dir.join("screenshots"),
            timings: Timings::instant(),
        }
    }

    /// Default config location: `./config.json` if present, else the per-user config dir
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|dir| dir.join("autorejoin").join(CONFIG_FILE_NAME))
            .unwrap_or(local)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to disk atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let json = serde_json::to_string_pretty(self)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Resolve the configured session, enforcing that exactly one of
    /// `game_id` / `vip_server_link` is set
    pub fn session_target(&self) -> Result<SessionTarget> {
        let game_id = non_empty(self.game_id.as_deref());
        let link = non_empty(self.vip_server_link.as_deref());

        match (game_id, link) {
            (Some(id), None) => {
                if !id.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::Config(format!("game_id must be numeric, got {:?}", id)));
                }
                Ok(SessionTarget::PlaceId(id.to_string()))
            }
            (None, Some(link)) => Ok(SessionTarget::Link(link.to_string())),
            (Some(_), Some(_)) => Err(Error::Config(
                "game_id and vip_server_link are mutually exclusive".to_string(),
            )),
            (None, None) => Err(Error::Config(
                "one of game_id or vip_server_link must be set".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.package.trim().is_empty() {
            return Err(Error::Config("package must not be empty".to_string()));
        }
        if self.check_interval == 0 {
            return Err(Error::Config("check_interval must be at least 1 second".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        self.session_target()?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GameIdRepr {
    Text(String),
    Number(u64),
}

/// Older config files store `game_id` as a JSON number
fn deserialize_game_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<GameIdRepr>::deserialize(deserializer)?.map(|repr| match repr {
        GameIdRepr::Text(s) => s,
        GameIdRepr::Number(n) => n.to_string(),
    }))
}
