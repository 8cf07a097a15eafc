//! Debug screenshots

use crate::gateway::DeviceGateway;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Saves timestamped device screenshots into one directory
pub struct ScreenshotManager {
    dir: PathBuf,
}

impl ScreenshotManager {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture `<prefix>_<YYYYmmdd_HHMMSS>.png`, returning the saved path
    pub fn take<G: DeviceGateway>(&self, gateway: &G, prefix: &str) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!("Cannot create screenshot dir {}: {}", self.dir.display(), e);
            return None;
        }

        let filename = format!("{}_{}.png", prefix, Local::now().format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(filename);
        debug!("Taking screenshot: {}", path.display());

        if gateway.capture_screenshot(&path) {
            debug!("Screenshot saved: {}", path.display());
            Some(path)
        } else {
            error!("Failed to take screenshot");
            None
        }
    }

    pub fn on_error<G: DeviceGateway>(&self, gateway: &G, kind: &str) -> Option<PathBuf> {
        self.take(gateway, &format!("error_{}", kind))
    }
}
