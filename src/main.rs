//! cam-tool-exchange: MCP server converting FreeCAD tool bits to and from
//! tool-exchange service records.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use cam_tool_exchange::config;
use cam_tool_exchange::mcp::{McpServer, ServerSettings};

/// MCP server for FreeCAD CAM tool exchange.
///
/// Reads and writes FreeCAD tool bits and libraries, converts them to
/// tool-exchange records, and prepares shape files for upload.
#[derive(Parser, Debug)]
#[command(name = "cam-tool-exchange")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (default: ~/.cam-tool-exchange/config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Picks the log level: `--quiet`, then `-v` flags, then the config file.
fn log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => config_level.parse().unwrap_or(Level::WARN),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Logs go to stderr; stdout carries MCP traffic.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    init_tracing(log_level(args.verbose, args.quiet, &cfg.logging.level));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting cam-tool-exchange server"
    );

    let mut settings = ServerSettings::from_config(&cfg);
    if settings.allowed_paths.is_empty() {
        settings.allowed_paths = vec![PathBuf::from(".")];
    }
    info!(
        allowed_paths = ?settings.allowed_paths,
        bits_dir = ?settings.bits_dir,
        default_shape = %settings.conversion.default_shape,
        "Server settings"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut server = McpServer::new(settings);
    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("Server shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
