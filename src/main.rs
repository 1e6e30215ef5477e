//! Mount a Telegram channel as a flat directory of files.
use std::path::PathBuf;

use clap::Parser;
use clap::builder::BoolishValueParser;
use secrecy::SecretString;
use tracing::{debug, error};

mod app_config;
mod daemon;
mod fuse_check;
mod telegram;
mod trc;

use crate::app_config::{Config, Overrides};
use crate::trc::Trc;

const VERSION: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(
    version = VERSION,
    about = "Mount a Telegram channel as a flat read/write filesystem."
)]
struct Args {
    /// Directory to mount the channel on. Created if missing; must be empty.
    mount_point: PathBuf,

    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a tgfs config TOML."
    )]
    config_path: Option<PathBuf>,

    /// Bot API token.
    #[arg(long, env = "TG_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Identifier of the channel, usually negative (-100...).
    #[arg(long, env = "CHAT_ID", allow_negative_numbers = true)]
    chat_id: Option<i64>,

    /// Keep file contents in memory after they are closed.
    #[arg(long, env = "CACHE", value_parser = BoolishValueParser::new())]
    cache: Option<bool>,

    /// Log level when neither TGFS_LOG nor RUST_LOG is set.
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Also append debug logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds a new file waits before it is first uploaded.
    #[arg(long)]
    upload_delay_secs: Option<u64>,

    /// Seconds between two syncs with the channel.
    #[arg(long)]
    sync_interval_secs: Option<u64>,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,
}

impl Args {
    fn overrides(self) -> Overrides {
        Overrides {
            mount_point: self.mount_point,
            bot_token: self.bot_token.map(SecretString::from),
            chat_id: self.chat_id,
            cache: self.cache,
            log_level: self.log_level,
            log_file: self.log_file,
            upload_delay_secs: self.upload_delay_secs,
            sync_interval_secs: self.sync_interval_secs,
            allow_other: self.allow_other,
        }
    }
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load(args.config_path.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        })
        .with_overrides(args.overrides());
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    Trc::new(&config.log_level)
        .with_log_file(config.log_file.as_deref())
        .and_then(Trc::init)
        .unwrap_or_else(|e| {
            eprintln!(
                "Failed to initialize logging. Without logging, we can't provide any useful error \
                 messages, so we have to exit: {e}"
            );
            std::process::exit(1);
        });

    if let Err(e) = fuse_check::ensure_fuse() {
        error!("{e}");
        std::process::exit(1);
    }

    debug!(config = ?config, "Starting with configuration...");
    if let Err(e) = daemon::spawn(config) {
        error!("tgfs failed: {e}");
        std::process::exit(1);
    }
}
