use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "telemby")]
#[command(about = "Telegram control surface for an Emby media server", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the bot: Telegram long-poll loop plus the Emby webhook listener.
    Run {
        /// Persisted settings document (created on first toggle).
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Poster URL cache.
        #[arg(long, default_value = "poster_cache.json")]
        poster_cache: PathBuf,

        /// Webhook bind address.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Webhook port.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Validate the menu declarations and the settings document, then exit.
    Check {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}
