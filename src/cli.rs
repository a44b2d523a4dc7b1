use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tails-server")]
#[command(about = "Tails Server - Share services over Tor onion services")]
pub struct Cli {
    /// Config file path (defaults to tails-server.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,

    /// Print nothing but errors
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the status of every service
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show status, address and options of one service
    Info {
        /// Service name
        service: String,
    },
    /// Install a service (waits for Tor to bootstrap)
    Install {
        /// Service name
        service: String,
    },
    /// Start a service and publish its onion service
    Enable {
        /// Service name
        service: String,
    },
    /// Stop a service and remove its onion service
    Disable {
        /// Service name
        service: String,
    },
    /// Disable a service and remove everything stored for it
    Uninstall {
        /// Service name
        service: String,
    },
    /// Print the current value of an option
    GetOption {
        /// Service name
        service: String,
        /// Option name
        option: String,
    },
    /// Change an option, restarting the service if it is running
    SetOption {
        /// Service name
        service: String,
        /// Option name
        option: String,
        /// New value
        value: String,
    },
    /// Reset an option to its default, restarting the service if it is running
    ResetOption {
        /// Service name
        service: String,
        /// Option name
        option: String,
    },
    /// Enable every installed service with autostart turned on
    Autostart,
    /// Follow unit state changes and print every status change until Ctrl-C
    Watch {
        /// Do not enable autostart services on startup
        #[arg(long)]
        no_autostart: bool,
    },
    /// Validate configuration without touching any service
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Commands that change services or follow their state must not run
    /// next to another instance.
    pub fn needs_instance_lock(&self) -> bool {
        !matches!(
            self,
            Commands::Status { .. }
                | Commands::Info { .. }
                | Commands::GetOption { .. }
                | Commands::Validate
                | Commands::Completions { .. }
        )
    }
}
