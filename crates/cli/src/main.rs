mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use libvmrac::lock::ProcessLock;
use libvmrac::{Completion, Request, SessionError, run_command};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, LogConfig};
use logging::RotatingLog;

/// vmrac - run a single RACF command on the z/VM RACF service machine
#[derive(Parser)]
#[command(name = "vmrac", version, about)]
struct Cli {
    /// Config file (default: $VMRAC_CONFIG, then /etc/vmrac/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RACF command to run, e.g. "LISTUSER IBMUSER"
    command: String,
}

/// Process exit codes (clap exits with 2 on usage errors)
mod exit {
    pub const NOT_ROOT: u8 = 1;
    pub const USAGE: u8 = 2;
    pub const LOCK: u8 = 3;
    pub const CONNECT: u8 = 4;
    pub const DIALOGUE: u8 = 5;
}

fn main() -> ExitCode {
    if !is_root() {
        eprintln!("Usage: sudo vmrac <RACF Command>");
        return ExitCode::from(exit::NOT_ROOT);
    }

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("vmrac: {e}; using built-in defaults");
        Config::default()
    });

    if let Err(e) = init_logging(&config.log) {
        eprintln!("vmrac: logging disabled: {e}");
    }

    let request = match Request::new(&cli.command) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("vmrac: {e}");
            return ExitCode::from(exit::USAGE);
        }
    };

    let endpoint = match config.server.endpoint() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!(error = %e, "Invalid server configuration");
            eprintln!("vmrac: invalid server configuration: {e}");
            return ExitCode::from(exit::CONNECT);
        }
    };

    // Held until the end of main, after the connection has been closed
    let _lock = match ProcessLock::acquire(&config.lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "Unable to take the session lock");
            eprintln!("vmrac: {e}");
            return ExitCode::from(exit::LOCK);
        }
    };

    match run_command(&endpoint, config.server.receive_timeout(), request) {
        Ok(outcome) => {
            if outcome.completion == Completion::Rejected {
                warn!("Command rejected by the server");
            }
            println!("{}", outcome.text);
            ExitCode::SUCCESS
        }
        Err(SessionError::Connect(e)) => {
            eprintln!("Unable to process the command. {e}");
            ExitCode::from(exit::CONNECT)
        }
        Err(e) => {
            eprintln!("Error while receiving the command response: {e}");
            ExitCode::from(exit::DIALOGUE)
        }
    }
}

/// Default log directives, used when `RUST_LOG` is unset or unparsable
const DEFAULT_LOG_FILTER: &str = "vmrac=info,libvmrac=info";

fn log_filter(env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_logging(log: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let writer = RotatingLog::new(log);
    if !writer.is_file_backed() {
        eprintln!(
            "vmrac: cannot open {}, logging to stderr",
            log.path.display()
        );
    }

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_ansi(false)
        .with_writer(writer)
        .try_init()?;

    info!(pid = std::process::id(), "vmrac starting");
    Ok(())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    euid == 0
}
