// MIT License - Copyright (c) 2026 Peter Wright
// Command-line front end: one-shot panel commands and the event receiver

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use isecnet_bridge::command::COMMAND_NAMES;
use isecnet_bridge::{
    BridgeError, CommandReply, CommandSession, CommandVariant, Password, Receiver, ReceiverConfig,
    ScriptHooks,
};

const EXIT_FAILURE: i32 = 2;
const EXIT_INVALID_ARGUMENT: i32 = 3;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "isecnet-bridge")]
#[command(about = "Command client and event receiver for ISECNet2/RIP alarm panels")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one command to a panel and report the outcome
    Command {
        /// Panel address as host:port
        addr: String,
        /// Remote access password (digits only)
        password: u32,
        /// Password width, 4 or 6
        width: usize,
        /// Command name (noop, status, arm, arm-stay, disarm, ...)
        command: String,
        /// Partition or zone number, depending on the command
        arg: Option<u8>,
    },
    /// Accept panel connections and run hook scripts for their events
    Receiver {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "receiver.toml")]
        config: String,
    },
}

// ---------------------------------------------------------------------------
// Command mode
// ---------------------------------------------------------------------------

fn usage(err: &BridgeError) -> ! {
    eprintln!("Available commands:");
    for (name, help) in COMMAND_NAMES {
        eprintln!("  {} {}", name, help);
    }
    eprintln!();
    eprintln!("Error: {}", err);
    process::exit(EXIT_INVALID_ARGUMENT);
}

async fn run_command(
    addr: String,
    password: u32,
    width: usize,
    command: String,
    arg: Option<u8>,
) -> Result<()> {
    let password = Password::new(password, width).unwrap_or_else(|e| usage(&e));
    let variant = CommandVariant::from_name(&command, arg).unwrap_or_else(|e| usage(&e));

    info!("Running {} against {}", command, addr);
    match CommandSession::new(addr, password, variant).run().await {
        Ok(CommandReply::Ack) => {
            println!("Success");
            Ok(())
        }
        Ok(CommandReply::Status(report)) => {
            println!("{}", report);
            println!("Success");
            Ok(())
        }
        Err(e) => {
            println!("{}", failure_message(&e));
            process::exit(EXIT_FAILURE);
        }
    }
}

fn failure_message(err: &BridgeError) -> String {
    if err.is_retryable() {
        format!("Failure: {} (transient, try again)", err)
    } else {
        format!("Failure: {}", err)
    }
}

// ---------------------------------------------------------------------------
// Receiver mode
// ---------------------------------------------------------------------------

async fn run_receiver(config_path: &str) -> Result<()> {
    let config = ReceiverConfig::load(config_path)
        .with_context(|| format!("Failed to load config file {}", config_path))?;
    let hooks = Arc::new(ScriptHooks::new(config.hooks.clone()));
    let receiver = Receiver::bind(config, hooks)
        .await
        .context("Failed to start receiver")?;

    let mut sigterm = signal(SignalKind::terminate())?;
    info!(
        "Receiver listening on {}. Send SIGINT/SIGTERM to stop.",
        receiver.local_addr()
    );

    receiver
        .run(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Cannot wait for SIGINT: {}", e);
                    }
                    info!("Received SIGINT, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        })
        .await;

    info!("Receiver stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=isecnet_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_INVALID_ARGUMENT } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    match cli.mode {
        Mode::Command {
            addr,
            password,
            width,
            command,
            arg,
        } => run_command(addr, password, width, command, arg).await,
        Mode::Receiver { config } => run_receiver(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isecnet_bridge::AuthFailure;

    #[test]
    fn test_failure_message_marks_transient_errors() {
        assert_eq!(
            failure_message(&BridgeError::PanelBusy),
            format!("Failure: {} (transient, try again)", BridgeError::PanelBusy)
        );
        let rejected = BridgeError::AuthRejected(AuthFailure::WrongPassword);
        assert_eq!(failure_message(&rejected), format!("Failure: {}", rejected));
    }
}
