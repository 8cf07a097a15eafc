//! Roblox auto-rejoin daemon - Rust implementation
//!
//! CLI for the monitor loop plus one-shot device commands.

use anyhow::{bail, Context, Result};
use autorejoin_rs::config::{Config, Transport, DEFAULT_PACKAGE};
use autorejoin_rs::detector::{AppState, StateDetector};
use autorejoin_rs::gateway::{AdbGateway, DeviceGateway};
use autorejoin_rs::launcher::Launcher;
use autorejoin_rs::link::resolve;
use autorejoin_rs::logging;
use autorejoin_rs::monitor::Monitor;
use autorejoin_rs::screenshot::ScreenshotManager;
use autorejoin_rs::shutdown::{install_signal_handler, Shutdown};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

/// Roblox auto-rejoin - keeps the Android client in a game
#[derive(Parser)]
#[command(name = "autorejoin-rs")]
#[command(about = "Relaunch the Roblox Android client whenever it drops out of a game")]
struct Cli {
    /// Config file (default: ./config.json if present, else the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless AUTOREJOIN_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the client and rejoin when needed (default)
    Run,

    /// Write a config file
    Init {
        /// Android package of the client
        #[arg(long, default_value = DEFAULT_PACKAGE)]
        package: String,

        /// Numeric place id to join
        #[arg(long, conflicts_with = "link", required_unless_present = "link")]
        game_id: Option<String>,

        /// Private server or share link to join
        #[arg(long)]
        link: Option<String>,

        /// Seconds between checks
        #[arg(long, default_value_t = 30)]
        interval: u64,

        /// Consecutive failed rejoins before cooling down
        #[arg(long, default_value_t = 3)]
        max_retries: u32,

        /// Reach the device through adb instead of a local shell
        #[arg(long)]
        adb: bool,

        /// adb device serial
        #[arg(long, requires = "adb")]
        serial: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Print the current client state
    State,

    /// Wait until the client reaches a state
    Wait {
        /// not_running, disconnected, in_game or loading
        state: AppState,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Seconds between polls
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Print the launch URI for a game link
    Resolve {
        link: String,
    },

    /// Run one rejoin sequence
    Rejoin,

    /// Start the client without joining a game
    Launch,

    /// Capture a screenshot into the screenshots dir
    Screenshot {
        /// File name prefix
        #[arg(long, default_value = "screen")]
        prefix: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&config_path, cli.verbose),
        Commands::Init {
            package,
            game_id,
            link,
            interval,
            max_retries,
            adb,
            serial,
            force,
        } => cmd_init(
            &config_path,
            InitArgs {
                package,
                game_id,
                link,
                interval,
                max_retries,
                adb,
                serial,
                force,
            },
        ),
        Commands::State => cmd_state(&config_path, cli.verbose),
        Commands::Wait {
            state,
            timeout,
            interval,
        } => cmd_wait(&config_path, cli.verbose, state, timeout, interval),
        Commands::Resolve { link } => cmd_resolve(&link),
        Commands::Rejoin => cmd_rejoin(&config_path, cli.verbose),
        Commands::Launch => cmd_launch(&config_path, cli.verbose),
        Commands::Screenshot { prefix } => cmd_screenshot(&config_path, cli.verbose, &prefix),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| {
        format!(
            "cannot load config from {} (create one with `autorejoin-rs init`)",
            path.display()
        )
    })
}

/// Config, logger guard and a gateway that answered its availability check
fn connect(config_path: &Path, verbose: bool) -> Result<(Config, WorkerGuard, AdbGateway)> {
    let config = load_config(config_path)?;
    let guard = logging::init(&config.logs_dir, verbose)?;
    let gateway = AdbGateway::new(&config);
    gateway
        .ensure_available()
        .context("device shell is not reachable")?;
    Ok((config, guard, gateway))
}

// ============================================================================
// CLI Commands
// ============================================================================

fn cmd_run(config_path: &Path, verbose: bool) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let _guard = logging::init(&config.logs_dir, verbose)?;

    let gateway = AdbGateway::new(&config);
    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone())?;

    let mut monitor = Monitor::new(&gateway, &config, shutdown)?;
    monitor.run().context("monitor failed to start")?;
    Ok(ExitCode::SUCCESS)
}

struct InitArgs {
    package: String,
    game_id: Option<String>,
    link: Option<String>,
    interval: u64,
    max_retries: u32,
    adb: bool,
    serial: Option<String>,
    force: bool,
}

fn cmd_init(config_path: &Path, args: InitArgs) -> Result<ExitCode> {
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let transport = if args.adb {
        Transport::Adb {
            adb_path: "adb".to_string(),
            serial: args.serial,
        }
    } else {
        Transport::Local
    };

    let config = Config {
        package: args.package,
        game_id: args.game_id,
        vip_server_link: args.link,
        check_interval: args.interval,
        max_retries: args.max_retries,
        transport,
        ..Config::default()
    };
    config.validate().context("invalid settings")?;
    config
        .save(config_path)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    println!("Config written to {}", config_path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_state(config_path: &Path, verbose: bool) -> Result<ExitCode> {
    let (config, _guard, gateway) = connect(config_path, verbose)?;
    let detector = StateDetector::new(&gateway, &config.package);
    println!("{}", detector.detect_state());
    Ok(ExitCode::SUCCESS)
}

fn cmd_wait(
    config_path: &Path,
    verbose: bool,
    target: AppState,
    timeout: u64,
    interval: u64,
) -> Result<ExitCode> {
    let (config, _guard, gateway) = connect(config_path, verbose)?;
    let detector = StateDetector::new(&gateway, &config.package);

    if detector.wait_for_state(
        target,
        Duration::from_secs(timeout),
        Duration::from_secs(interval.max(1)),
    ) {
        println!("{}", target);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Timed out after {}s waiting for {}", timeout, target);
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_resolve(link: &str) -> Result<ExitCode> {
    println!("{}", resolve(link));
    Ok(ExitCode::SUCCESS)
}

fn cmd_rejoin(config_path: &Path, verbose: bool) -> Result<ExitCode> {
    let (config, _guard, gateway) = connect(config_path, verbose)?;
    let shutdown = Shutdown::new();
    install_signal_handler(shutdown.clone())?;
    let launcher = Launcher::new(&gateway, &config)?.with_shutdown(shutdown);

    if launcher.rejoin() {
        println!("Rejoined");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Rejoin failed after {} attempts", launcher.max_retries() + 1);
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_launch(config_path: &Path, verbose: bool) -> Result<ExitCode> {
    let (config, _guard, gateway) = connect(config_path, verbose)?;
    let launcher = Launcher::new(&gateway, &config)?;

    if launcher.launch_app() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_screenshot(config_path: &Path, verbose: bool, prefix: &str) -> Result<ExitCode> {
    let (config, _guard, gateway) = connect(config_path, verbose)?;
    let screenshots = ScreenshotManager::new(&config.screenshots_dir);

    match screenshots.take(&gateway, prefix) {
        Some(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => bail!("screenshot failed"),
    }
}
