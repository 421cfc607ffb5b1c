mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "idbridge")]
#[command(about = "Cross-window identity handshake toolkit")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the feature string a provider window would be opened with
    Features {
        #[arg(long)]
        width: Option<f64>,

        #[arg(long)]
        height: Option<f64>,

        #[arg(long)]
        top: Option<f64>,

        #[arg(long)]
        left: Option<f64>,

        #[arg(long)]
        toolbar: Option<bool>,

        #[arg(long)]
        location: Option<bool>,

        #[arg(long)]
        menubar: Option<bool>,

        /// Screen width used to centre the window
        #[arg(long, default_value_t = 1920.0)]
        screen_width: f64,

        /// Screen height used to centre the window
        #[arg(long, default_value_t = 1080.0)]
        screen_height: f64,
    },
    /// Run every flow against an in-process provider (default if no subcommand provided)
    Demo {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Close the transfer window instead of approving it
        #[arg(long, default_value_t = false)]
        close_transfer: bool,
    },
    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(default_value = "idbridge.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Features {
            width,
            height,
            top,
            left,
            toolbar,
            location,
            menubar,
            screen_width,
            screen_height,
        }) => {
            let overrides = idbridge_transport::WindowFeatures {
                height,
                width,
                top,
                left,
                toolbar,
                location,
                menubar,
            };
            println!(
                "{}",
                commands::features(&overrides, screen_width, screen_height)
            );
            Ok(())
        }
        Some(Commands::Demo {
            config,
            close_transfer,
        }) => commands::run_demo(config, close_transfer).await,
        Some(Commands::InitConfig { path, force }) => commands::init_config(&path, force),
        None => commands::run_demo(None, false).await,
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "idbridge={},idbridge_transport={},idbridge_auth={}",
                    log_level, log_level, log_level
                ))
            }),
        )
        .init();
}
