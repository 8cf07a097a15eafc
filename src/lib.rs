//! Roblox auto-rejoin - Rust daemon
//!
//! Watches the Roblox Android client over a shell or ADB connection and
//! relaunches it into the configured game whenever it crashes, closes or
//! shows a disconnect screen.

pub mod config;
pub mod detector;
pub mod error;
pub mod gateway;
pub mod launcher;
pub mod link;
pub mod logging;
pub mod monitor;
pub mod runner;
pub mod screenshot;
pub mod shutdown;
pub mod stats;
// Scripted device for unit and integration tests
#[doc(hidden)]
pub mod testing;

pub use error::{Error, Result};
