//! Remote command gateway
//!
//! Issues shell commands against the controlled device and turns their raw
//! text output into typed answers. Every primitive returns a sentinel
//! (`false`, `None`, empty) when the command fails or times out; callers
//! never see a transport error once the gateway is up.

use crate::config::{Config, Transport};
use crate::error::{Error, Result};
use crate::runner::run_command_with_timeout;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Where screenshots are staged on the device before `adb pull`
const DEVICE_SCREENSHOT_PATH: &str = "/sdcard/autorejoin_screen.png";

const FORCE_STOP_SETTLE: Duration = Duration::from_secs(1);
const START_SETTLE: Duration = Duration::from_secs(2);
const OPEN_URI_SETTLE: Duration = Duration::from_secs(3);
const INPUT_SETTLE: Duration = Duration::from_millis(500);

/// Primitives the detector and launcher need from a device
pub trait DeviceGateway {
    /// Fails when commands cannot reach the device at all
    fn ensure_available(&self) -> Result<()>;

    fn is_process_running(&self, package: &str) -> bool;

    /// `package/activity` of the focused window
    fn foreground_surface(&self) -> Option<String>;

    /// True if the process is gone afterwards
    fn force_stop(&self, package: &str) -> bool;

    fn start_activity(&self, package: &str, activity: Option<&str>) -> bool;

    /// Open a URI through a VIEW intent, optionally pinned to `package`
    fn open_uri(&self, uri: &str, package: Option<&str>) -> bool;

    fn tap(&self, x: u32, y: u32) -> bool;

    fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> bool;

    fn input_text(&self, text: &str) -> bool;

    fn press_key(&self, keycode: u32) -> bool;

    fn screen_size(&self) -> Option<(u32, u32)>;

    /// Every non-empty `text` attribute of the current UI hierarchy
    fn screen_texts(&self) -> Vec<String>;

    fn capture_screenshot(&self, dest: &Path) -> bool;
}

/// Gateway backed by a local shell or `adb shell`
pub struct AdbGateway {
    transport: Transport,
    timeout: Duration,
}

impl AdbGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            transport: config.transport.clone(),
            timeout: config.command_timeout(),
        }
    }

    /// Run a shell command on the device, returning trimmed stdout on success
    pub fn shell(&self, command: &str) -> Option<String> {
        let (program, args) = self.shell_invocation(command);

        match run_command_with_timeout(&program, &args, self.timeout) {
            Ok(output) if output.success() => Some(output.stdout.trim().to_string()),
            Ok(output) => {
                debug!(
                    "Command exited with {:?}: {} ({})",
                    output.exit_code,
                    command,
                    output.stderr.trim()
                );
                None
            }
            Err(Error::Timeout(timeout)) => {
                warn!("Command timeout after {:?}: {}", timeout, command);
                None
            }
            Err(e) => {
                warn!("Command error: {}", e);
                None
            }
        }
    }

    fn shell_invocation(&self, command: &str) -> (String, Vec<String>) {
        match &self.transport {
            Transport::Local => (
                "sh".to_string(),
                vec!["-c".to_string(), command.to_string()],
            ),
            Transport::Adb { adb_path, serial } => {
                let mut args = adb_target_args(serial.as_deref());
                args.push("shell".to_string());
                args.push(command.to_string());
                (adb_path.clone(), args)
            }
        }
    }

    fn input(&self, command: &str) -> bool {
        let ok = self.shell(command).is_some();
        std::thread::sleep(INPUT_SETTLE);
        ok
    }
}

impl DeviceGateway for AdbGateway {
    fn ensure_available(&self) -> Result<()> {
        let (program, args) = self.shell_invocation("echo ok");
        let output = run_command_with_timeout(&program, &args, self.timeout)
            .map_err(|e| Error::GatewayUnavailable(e.to_string()))?;

        if !output.success() || output.stdout.trim() != "ok" {
            return Err(Error::GatewayUnavailable(format!(
                "{} exited with {:?}: {}",
                program,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn is_process_running(&self, package: &str) -> bool {
        self.shell(&format!("pidof {}", quote(package)))
            .map(|out| !out.is_empty())
            .unwrap_or(false)
    }

    fn foreground_surface(&self) -> Option<String> {
        let output = self.shell("dumpsys window windows | grep -E 'mCurrentFocus'")?;
        parse_focused_component(&output)
    }

    fn force_stop(&self, package: &str) -> bool {
        self.shell(&format!("am force-stop {}", quote(package)));
        std::thread::sleep(FORCE_STOP_SETTLE);
        !self.is_process_running(package)
    }

    fn start_activity(&self, package: &str, activity: Option<&str>) -> bool {
        self.shell(&start_activity_command(package, activity));
        std::thread::sleep(START_SETTLE);
        self.is_process_running(package)
    }

    fn open_uri(&self, uri: &str, package: Option<&str>) -> bool {
        let opened = match self.shell(&open_uri_command(uri, package)) {
            // `am start` reports unresolvable intents on stdout with exit code 0
            Some(output) => !output.contains("Error:"),
            None => false,
        };
        std::thread::sleep(OPEN_URI_SETTLE);
        opened
    }

    fn tap(&self, x: u32, y: u32) -> bool {
        self.input(&format!("input tap {} {}", x, y))
    }

    fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> bool {
        self.input(&format!(
            "input swipe {} {} {} {} {}",
            from.0, from.1, to.0, to.1, duration_ms
        ))
    }

    fn input_text(&self, text: &str) -> bool {
        self.input(&input_text_command(text))
    }

    fn press_key(&self, keycode: u32) -> bool {
        self.input(&format!("input keyevent {}", keycode))
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        let output = self.shell("wm size")?;
        parse_screen_size(&output)
    }

    fn screen_texts(&self) -> Vec<String> {
        match self.shell("uiautomator dump /dev/tty") {
            Some(output) => parse_ui_texts(&output),
            None => Vec::new(),
        }
    }

    fn capture_screenshot(&self, dest: &Path) -> bool {
        let dest = dest.to_string_lossy();
        match &self.transport {
            Transport::Local => self.shell(&format!("screencap -p {}", quote(&dest))).is_some(),
            Transport::Adb { adb_path, serial } => {
                if self
                    .shell(&format!("screencap -p {}", DEVICE_SCREENSHOT_PATH))
                    .is_none()
                {
                    return false;
                }
                let mut args = adb_target_args(serial.as_deref());
                args.extend([
                    "pull".to_string(),
                    DEVICE_SCREENSHOT_PATH.to_string(),
                    dest.to_string(),
                ]);
                matches!(
                    run_command_with_timeout(adb_path, &args, self.timeout),
                    Ok(output) if output.success()
                )
            }
        }
    }
}

fn adb_target_args(serial: Option<&str>) -> Vec<String> {
    match serial {
        Some(serial) if !serial.is_empty() => vec!["-s".to_string(), serial.to_string()],
        _ => Vec::new(),
    }
}

/// Single-quote an argument for the device shell
pub fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

pub fn open_uri_command(uri: &str, package: Option<&str>) -> String {
    match package {
        // Pinning the package keeps the link from opening in a browser
        Some(package) => format!(
            "am start -a android.intent.action.VIEW -d {} -p {}",
            quote(uri),
            quote(package)
        ),
        None => format!("am start -a android.intent.action.VIEW -d {}", quote(uri)),
    }
}

pub fn start_activity_command(package: &str, activity: Option<&str>) -> String {
    match activity {
        Some(activity) => format!("am start -n {}", quote(&format!("{}/{}", package, activity))),
        None => format!(
            "monkey -p {} -c android.intent.category.LAUNCHER 1",
            quote(package)
        ),
    }
}

/// `input text` treats `%s` as a space and stops at a literal one
pub fn input_text_command(text: &str) -> String {
    format!("input text {}", quote(&text.replace(' ', "%s")))
}

static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_.]+/[A-Za-z0-9_.$]+").expect("Invalid component regex"));

static OVERRIDE_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Override size:\s*(\d+)x(\d+)").expect("Invalid size regex"));

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)x(\d+)").expect("Invalid size regex"));

static TEXT_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|\s)text="([^"]*)""#).expect("Invalid text regex"));

/// Extract `package/activity` from a `mCurrentFocus` line
pub fn parse_focused_component(output: &str) -> Option<String> {
    COMPONENT_RE.find(output).map(|m| m.as_str().to_string())
}

/// Parse `wm size`; an override size wins over the physical one since taps use it
pub fn parse_screen_size(output: &str) -> Option<(u32, u32)> {
    let caps = OVERRIDE_SIZE_RE
        .captures(output)
        .or_else(|| SIZE_RE.captures(output))?;
    let width = caps.get(1)?.as_str().parse().ok()?;
    let height = caps.get(2)?.as_str().parse().ok()?;
    Some((width, height))
}

/// Collect non-empty `text` attributes from a uiautomator XML dump
pub fn parse_ui_texts(xml: &str) -> Vec<String> {
    TEXT_ATTR_RE
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|text| !text.is_empty())
        .collect()
}

fn unescape_xml(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
