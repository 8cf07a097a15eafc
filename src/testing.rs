//! Scripted in-memory gateway for tests
//!
//! Simulates just enough of a device: force-stop kills the process, opening a
//! URI starts it and swaps in the next scripted screen.

use crate::error::{Error, Result};
use crate::gateway::DeviceGateway;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;

#[derive(Debug, Default)]
struct DeviceState {
    running: bool,
    screen: Vec<String>,
    foreground: Option<String>,
    screen_size: Option<(u32, u32)>,
    open_uri_ok: bool,
    force_stop_ok: bool,
    launch_screens: VecDeque<Vec<String>>,
    available: bool,
    calls: HashMap<&'static str, usize>,
    opened: Vec<(String, Option<String>)>,
    taps: Vec<(u32, u32)>,
}

pub struct FakeGateway {
    state: RefCell<DeviceState>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    /// A running client with an empty screen
    pub fn new() -> Self {
        Self {
            state: RefCell::new(DeviceState {
                running: true,
                screen_size: Some((1080, 2400)),
                open_uri_ok: true,
                force_stop_ok: true,
                available: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.state.borrow_mut().running = running;
    }

    pub fn set_screen(&self, texts: &[&str]) {
        self.set_screen_owned(texts.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_screen_owned(&self, texts: Vec<String>) {
        self.state.borrow_mut().screen = texts;
    }

    pub fn set_foreground(&self, surface: Option<&str>) {
        self.state.borrow_mut().foreground = surface.map(str::to_string);
    }

    pub fn set_screen_size(&self, size: Option<(u32, u32)>) {
        self.state.borrow_mut().screen_size = size;
    }

    pub fn set_open_uri_result(&self, ok: bool) {
        self.state.borrow_mut().open_uri_ok = ok;
    }

    /// A failing force-stop leaves the process as it was
    pub fn set_force_stop_result(&self, ok: bool) {
        self.state.borrow_mut().force_stop_ok = ok;
    }

    pub fn set_available(&self, available: bool) {
        self.state.borrow_mut().available = available;
    }

    /// Screens shown after each successful `open_uri`; the last one repeats
    pub fn set_launch_screens(&self, screens: &[&[&str]]) {
        self.state.borrow_mut().launch_screens = screens
            .iter()
            .map(|screen| screen.iter().map(|s| s.to_string()).collect())
            .collect();
    }

    pub fn calls(&self, primitive: &str) -> usize {
        self.state.borrow().calls.get(primitive).copied().unwrap_or(0)
    }

    pub fn opened_uris(&self) -> Vec<(String, Option<String>)> {
        self.state.borrow().opened.clone()
    }

    pub fn taps(&self) -> Vec<(u32, u32)> {
        self.state.borrow().taps.clone()
    }

    fn record(&self, primitive: &'static str) {
        *self.state.borrow_mut().calls.entry(primitive).or_insert(0) += 1;
    }
}

impl DeviceGateway for FakeGateway {
    fn ensure_available(&self) -> Result<()> {
        self.record("ensure_available");
        if self.state.borrow().available {
            Ok(())
        } else {
            Err(Error::GatewayUnavailable("fake device offline".to_string()))
        }
    }

    fn is_process_running(&self, _package: &str) -> bool {
        self.record("is_process_running");
        self.state.borrow().running
    }

    fn foreground_surface(&self) -> Option<String> {
        self.record("foreground_surface");
        self.state.borrow().foreground.clone()
    }

    fn force_stop(&self, _package: &str) -> bool {
        self.record("force_stop");
        let mut state = self.state.borrow_mut();
        if state.force_stop_ok {
            state.running = false;
        }
        state.force_stop_ok
    }

    fn start_activity(&self, _package: &str, _activity: Option<&str>) -> bool {
        self.record("start_activity");
        self.state.borrow_mut().running = true;
        true
    }

    fn open_uri(&self, uri: &str, package: Option<&str>) -> bool {
        self.record("open_uri");
        let mut state = self.state.borrow_mut();
        state
            .opened
            .push((uri.to_string(), package.map(str::to_string)));
        if !state.open_uri_ok {
            return false;
        }
        state.running = true;
        let next = if state.launch_screens.len() > 1 {
            state.launch_screens.pop_front()
        } else {
            state.launch_screens.front().cloned()
        };
        if let Some(screen) = next {
            state.screen = screen;
        }
        true
    }

    fn tap(&self, x: u32, y: u32) -> bool {
        self.record("tap");
        self.state.borrow_mut().taps.push((x, y));
        true
    }

    fn swipe(&self, _from: (u32, u32), _to: (u32, u32), _duration_ms: u32) -> bool {
        self.record("swipe");
        true
    }

    fn input_text(&self, _text: &str) -> bool {
        self.record("input_text");
        true
    }

    fn press_key(&self, _keycode: u32) -> bool {
        self.record("press_key");
        true
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        self.record("screen_size");
        self.state.borrow().screen_size
    }

    fn screen_texts(&self) -> Vec<String> {
        self.record("screen_texts");
        self.state.borrow().screen.clone()
    }

    fn capture_screenshot(&self, dest: &Path) -> bool {
        self.record("capture_screenshot");
        std::fs::write(dest, b"\x89PNG fake").is_ok()
    }
}
