//! DroneLink - Interactive drone client
//!
//! Reads one-letter commands, sends them to a drone as raw link-layer
//! frames and shows what the drone answered.

mod config;
mod link;
mod protocol;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use link::{MacAddr, RawLink};
use session::Session;

/// DroneLink - Steer drones over a raw link-layer protocol
#[derive(Parser)]
#[command(name = "dronelink")]
#[command(author = "DroneLink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Send movement commands to drones and track their replies", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Run {
        /// Network interface to send frames on
        #[arg(short, long)]
        interface: Option<String>,

        /// Destination hardware address
        #[arg(short, long)]
        dst: Option<MacAddr>,

        /// Reply timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Don't print the command banner before each prompt
        #[arg(long)]
        no_banner: bool,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            interface,
            dst,
            timeout_ms,
            no_banner,
        } => {
            let mut config = config;
            if let Some(interface) = interface {
                config.link.interface = Some(interface);
            }
            if let Some(dst) = dst {
                config.link.destination = dst;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.link.reply_timeout_ms = timeout_ms;
            }
            if no_banner {
                config.general.quiet_banner = true;
            }
            run_session(config).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the interactive session until `quit`
async fn run_session(config: Config) -> anyhow::Result<()> {
    let link_config = config.link_config()?;
    let reply_timeout = link_config.reply_timeout;

    tracing::info!(
        "Talking to {} on {} (timeout {:?})",
        link_config.destination,
        link_config.interface,
        reply_timeout
    );

    let link = RawLink::open(link_config)?;
    let mut session = Session::new(link, reply_timeout).with_banner(!config.general.quiet_banner);

    session
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    Ok(())
}

/// Print protocol information
fn print_protocol_info() {
    println!("DroneLink Protocol Information");
    println!("==============================\n");

    println!("Platform: {}", std::env::consts::OS);
    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Marker: {}", String::from_utf8_lossy(&protocol::MARKER));
    println!("EtherType: {:#06x}", protocol::ETHER_TYPE);
    println!("Frame Size: {} bytes", protocol::FRAME_SIZE);
    println!(
        "Default Destination: {}",
        MacAddr(protocol::DEFAULT_DESTINATION)
    );
    println!(
        "Default Reply Timeout: {:?}",
        Duration::from_millis(protocol::DEFAULT_REPLY_TIMEOUT_MS)
    );
    println!("\nCommands: {}", session::banner());

    #[cfg(target_os = "linux")]
    {
        println!("\nLinux Requirements:");
        println!("  - Raw sockets need CAP_NET_RAW: sudo setcap cap_net_raw+ep $(which dronelink)");
    }

    #[cfg(not(target_os = "linux"))]
    {
        println!("\nRaw link-layer sockets are only supported on Linux.");
    }
}
