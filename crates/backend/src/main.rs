//! Termdock Backend
//!
//! Session backend for the termdock terminal emulator, with a small CLI for
//! running a session attached to the current terminal.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use backend::channel::ControlChannel;
use backend::config::Config;
use clap::{Parser, Subcommand};
use control::{TerminalEvent, TerminalOptions};

/// Termdock backend - pseudo-terminal session manager.
#[derive(Parser, Debug)]
#[command(name = "termdock-backend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the backend.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a shell session attached to the current terminal
    Run {
        /// Shell or command to run (default: configured or platform shell)
        #[arg(long)]
        shell: Option<String>,

        /// Working directory for the session (default: user home)
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { shell, cwd } => run_attached(config, shell, cwd).await,
        Commands::Init { force } => init_config(cli.config, force),
    }
}

/// Runs a single session wired to the calling terminal: stdin is forwarded
/// as session input and session output goes to stdout, until the shell
/// exits.
async fn run_attached(
    config: Config,
    shell: Option<String>,
    cwd: Option<String>,
) -> anyhow::Result<()> {
    let (channel, mut events) = ControlChannel::new(config.session);
    let channel = Arc::new(channel);

    let (cols, rows) =
        crossterm::terminal::size().unwrap_or((control::DEFAULT_COLS, control::DEFAULT_ROWS));
    let options = TerminalOptions {
        shell,
        cwd,
        env: Vec::new(),
        cols,
        rows,
    };

    let id = channel
        .create_terminal(options)
        .await
        .context("failed to create session")?;
    tracing::info!(session_id = %id, cols, rows, "session started");

    crossterm::terminal::enable_raw_mode().context("failed to enable raw mode")?;

    // Forward stdin to the session from a blocking thread.
    let stdin_channel = Arc::clone(&channel);
    let stdin_id = id.clone();
    let stdin_task = tokio::task::spawn_blocking(move || {
        let mut stdin = std::io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if stdin_channel
                        .write_to_terminal(&stdin_id, buffer[..n].to_vec())
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let run_result = async {
        let mut stdout = std::io::stdout();
        let mut exit_code = 0;
        while let Some(event) = events.recv().await {
            match event {
                TerminalEvent::Data { data, .. } => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                TerminalEvent::Exit {
                    session_id,
                    exit_code: code,
                } => {
                    if session_id == id {
                        exit_code = code;
                        break;
                    }
                }
            }
        }
        Ok::<i32, anyhow::Error>(exit_code)
    }
    .await;

    let _ = crossterm::terminal::disable_raw_mode();
    stdin_task.abort();

    let exit_code = run_result?;
    tracing::info!(exit_code, "session ended");
    std::process::exit(exit_code);
}

/// Writes a pristine default configuration file.
fn init_config(path_override: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path_override.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
