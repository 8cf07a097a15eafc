//! Cooperative shutdown
//!
//! The monitor checks the flag between ticks and sleeps through
//! [`Shutdown::sleep`], so a signal cuts a sleep short but never aborts a
//! rejoin step halfway.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Inner {
    triggered: Mutex<bool>,
    cv: Condvar,
}

/// Cloneable shutdown flag with an interruptible sleep
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request shutdown and wake every sleeper
    pub fn trigger(&self) {
        *self.lock() = true;
        self.inner.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `duration` unless shutdown is requested first
    ///
    /// Returns true if shutdown was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut triggered = self.lock();

        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            triggered = match self.inner.cv.wait_timeout(triggered, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        *triggered
    }
}

/// Trigger `shutdown` on Ctrl-C or SIGTERM
///
/// Signals are awaited on a dedicated thread running a small tokio runtime;
/// the monitor itself stays synchronous.
pub fn install_signal_handler(shutdown: Shutdown) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Signal(format!("cannot build signal runtime: {}", e)))?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                wait_for_signal().await;
                warn!("Received shutdown signal");
                shutdown.trigger();
            });
        })
        .map_err(|e| Error::Signal(format!("cannot spawn signal thread: {}", e)))?;

    debug!("Signal handler installed");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_runs_full_duration() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_trigger_interrupts_sleep() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });

        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(shutdown.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_sleep() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.sleep(Duration::ZERO));
    }
}
