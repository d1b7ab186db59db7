//! `localmap` – command line entry point of the local obstacle map.
//!
//! ```text
//! localmap [--config PATH] run     # default: start the node and the WebSocket bridge
//! localmap [--config PATH] check   # load, validate and print the effective configuration
//! localmap [--config PATH] init    # write a default config file
//! ```
//!
//! The configuration comes from `--config` (or `~/.localmap/config.toml`),
//! with `LOCALMAP_*` environment overrides on top.  Ctrl-C stops the node
//! after the current cycle.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use localmap_middleware::{MapPublisher, ScenePublisher, SensorBus, WsBridge};
use localmap_perception::TfBuffer;
use localmap_runtime::{LocalMapConfig, LocalObstaclesNode, SceneGraph, telemetry};

#[derive(Parser, Debug)]
#[command(name = "localmap", version, about = "Time-windowed local obstacle map")]
struct Cli {
    /// Config file (defaults to ~/.localmap/config.toml).
    #[arg(long, global = true, env = "LOCALMAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Start the node and the WebSocket bridge.
    Run,
    /// Validate the configuration and print it.
    Check,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Init { force } => init(&path, force),
        Command::Check => check(&path),
        Command::Run => run(&path),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn init(path: &Path, force: bool) -> ExitCode {
    if path.exists() && !force {
        println!(
            "{} {} already exists (use --force to overwrite)",
            "✗".red().bold(),
            path.display().to_string().bold()
        );
        return ExitCode::FAILURE;
    }
    match config::save_to(&LocalMapConfig::default(), path) {
        Ok(()) => {
            println!("{} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn check(path: &Path) -> ExitCode {
    let Some(cfg) = load_validated(path) else {
        return ExitCode::FAILURE;
    };
    match toml::to_string_pretty(&cfg) {
        Ok(raw) => {
            println!("{} Configuration is valid:\n", "✓".green().bold());
            println!("{raw}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error printing config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(path: &Path) -> ExitCode {
    // Logging first: the OTLP exporter must exist before the runtime.
    let _telemetry = telemetry::init_tracing("localmap");
    print_banner();

    let Some(cfg) = load_validated(path) else {
        return ExitCode::FAILURE;
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current cycle …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(cfg, stop_rx)) {
        Ok(()) => {
            println!("{}", "  ✓ Local map stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "local map failed to start");
            ExitCode::FAILURE
        }
    }
}

/// Wire the bus, transform buffer, publishers, bridge and node, then run
/// until `stop` fires.
async fn serve(cfg: LocalMapConfig, stop: watch::Receiver<bool>) -> Result<(), localmap_types::LocalMapError> {
    let bus = SensorBus::default();
    let tf = Arc::new(TfBuffer::new(cfg.tf_cache_time));
    let maps = MapPublisher::default();
    let scenes = ScenePublisher::default();

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.ws_port));
    let bridge = WsBridge::new(bus.clone(), Arc::clone(&tf), maps.clone(), scenes.clone());
    let bridge_task = tokio::spawn(async move {
        if let Err(e) = bridge.run_ws_server(addr).await {
            error!(error = %e, "websocket bridge stopped");
        }
    });

    let node = LocalObstaclesNode::new(cfg.clone(), tf, &bus, Arc::new(maps))?
        .with_scene(Box::new(SceneGraph::with_publisher(scenes)));
    info!(
        output = %cfg.output_topic_name,
        ws = %addr,
        subscriptions = node.subscription_count(),
        "serving local map"
    );
    node.run(stop).await;

    bridge_task.abort();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve file + environment and validate; prints the reason on failure.
fn load_validated(path: &Path) -> Option<LocalMapConfig> {
    let (cfg, found) = match config::resolve(path) {
        Ok(resolved) => resolved,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return None;
        }
    };
    if found {
        println!("  Config loaded from {}", path.display().to_string().bold());
    } else {
        println!(
            "  {} not found, using defaults.  Run `{}` to create it.",
            path.display().to_string().dimmed(),
            "localmap init".bold()
        );
    }
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Invalid configuration".red(), e);
        return None;
    }
    Some(cfg)
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "localmap".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Time-windowed local obstacle map");
    println!();
}
