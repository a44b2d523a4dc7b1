mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use commands::Operation;
use output::{CliOutput, QuietOutput, UserOutput};
use std::sync::Arc;
use tails_server::persistence::{InstanceLock, StateDir};
use tails_server::status::ChannelListener;
use tails_server::{Error as ServerError, Parser as ConfigParser, ServiceRegistry};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(server_error) = e.downcast_ref::<ServerError>() {
            eprintln!("Error: {}", server_error);
            if let Some(suggestion) = server_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let out: &dyn UserOutput = if cli.quiet { &QuietOutput } else { &CliOutput };

    // ── Commands that need no config ────────────────────────────────
    match &cli.command {
        Commands::Validate => {
            return commands::run_validate(cli.config.clone(), out);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let parser = ConfigParser::new();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&config_path)?;
    tracing::debug!("Loaded {}", config_path.display());

    let _instance = if cli.command.needs_instance_lock() {
        Some(InstanceLock::acquire(
            &StateDir::new(&config.state_dir).lock_file(),
        )?)
    } else {
        None
    };

    let (listener, mut events) = ChannelListener::new();
    let registry = ServiceRegistry::from_config(&config, Arc::new(listener))?;

    match cli.command {
        Commands::Status { json } => {
            commands::run_status(&registry, json, out).await?;
        }
        Commands::Info { service } => {
            commands::run_info(&registry, &service, out).await?;
        }
        Commands::Install { service } => {
            commands::run_operation(&registry, &service, Operation::Install, &mut events, out)
                .await?;
        }
        Commands::Enable { service } => {
            commands::run_operation(&registry, &service, Operation::Enable, &mut events, out)
                .await?;
        }
        Commands::Disable { service } => {
            commands::run_operation(&registry, &service, Operation::Disable, &mut events, out)
                .await?;
        }
        Commands::Uninstall { service } => {
            commands::run_operation(&registry, &service, Operation::Uninstall, &mut events, out)
                .await?;
        }
        Commands::GetOption { service, option } => {
            commands::run_get_option(&registry, &service, &option, out)?;
        }
        Commands::SetOption {
            service,
            option,
            value,
        } => {
            commands::run_set_option(&registry, &service, &option, &value, &mut events, out)
                .await?;
        }
        Commands::ResetOption { service, option } => {
            commands::run_reset_option(&registry, &service, &option, &mut events, out).await?;
        }
        Commands::Autostart => {
            commands::run_autostart(&registry, out).await?;
        }
        Commands::Watch { no_autostart } => {
            commands::run_watch(&registry, !no_autostart, &mut events, out).await?;
        }
        // Handled before the config was loaded
        Commands::Validate | Commands::Completions { .. } => {
            unreachable!("handled before loading the config");
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
