use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ota-client", about = "Device-side OTA update client", version)]
pub struct Cli {
    /// Path to the device configuration file.
    #[arg(long, env = "OTA_CONFIG", default_value = "/etc/ota/config.yml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the update client: drives the state machine and serves the local control API.
    Run {
        /// Loopback port the control API listens on.
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },

    /// Query a running client's control API.
    Status {
        /// Loopback port the control API listens on.
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },

    /// Generate the device key and control token without starting the update loop.
    Bootstrap {
        /// Regenerate the device key and control token even if they already exist.
        #[arg(long)]
        force: bool,
    },
}
