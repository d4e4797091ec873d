use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use ofp_slicing::config::{self, Config};
use ofp_slicing::logging::init_logging;
use ofp_slicing::ofp_controller::OF0x01Controller;
use ofp_slicing::slicing::SlicingController;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "slicing_controller")]
#[command(about = "OpenFlow 1.0 controller that slices traffic by transport protocol")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept switch connections and install slicing rules
    Run {
        /// Path to the slicing tables
        #[arg(short, long, default_value = "slicing.toml")]
        config: PathBuf,

        /// Override the listen address from the config file
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Check the slicing tables without starting the controller
    Validate {
        /// Path to the slicing tables
        #[arg(short, long, default_value = "slicing.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run { config, listen }) => cmd_run(&config, listen),
        Some(Commands::Validate { config }) => cmd_validate(&config),
        None => cmd_run(Path::new("slicing.toml"), None),
    };
    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// Load the config, start logging and report validation findings.
fn load_checked(path: &Path) -> Result<Config, String> {
    let config = config::load(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    init_logging(Some(&config.log));

    let validation = config::validate(&config);
    validation.log_diagnostics();
    if validation.has_errors() {
        return Err(format!(
            "{}: {} configuration error(s)",
            path.display(),
            validation.errors.len()
        ));
    }
    Ok(config)
}

fn cmd_validate(path: &Path) -> Result<(), String> {
    let config = load_checked(path)?;
    info!(
        switches = config.policy.mac_to_port.switches().count(),
        "{} is valid",
        path.display()
    );
    Ok(())
}

fn cmd_run(path: &Path, listen: Option<SocketAddr>) -> Result<(), String> {
    let config = load_checked(path)?;
    let addr = listen.unwrap_or(config.listen);

    let listener = TcpListener::bind(addr).map_err(|e| format!("failed to bind {}: {}", addr, e))?;
    info!(%addr, "listening for switches");

    let controller = Arc::new(SlicingController::new(config.policy));
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        debug!(peer = ?peer, "switch connecting");
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            if let Err(e) = controller.handle_client_connected(&mut stream) {
                error!(peer = ?peer, error = %e, "control session ended");
            }
        });
    }
    Ok(())
}
