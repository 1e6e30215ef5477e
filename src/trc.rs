//! Tracing configuration and initialization.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};

#[derive(Debug, thiserror::Error)]
pub enum TrcError {
    #[error("could not open log file: {0}")]
    LogFile(#[from] std::io::Error),

    #[error(transparent)]
    Init(#[from] TryInitError),
}

/// Plain debug-level records appended to `file`, independent of the console filter.
fn file_layer<S>(file: Option<File>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(LevelFilter::DEBUG)
    })
}

enum Mode {
    /// Plain, verbose output.
    Ugly,
    /// Compact output with spinners.
    Pretty,
}

pub struct Trc {
    mode: Mode,
    env_filter: EnvFilter,
    span_events: bool,
    log_file: Option<File>,
}

impl Trc {
    /// Prefer `TGFS_LOG`, then `RUST_LOG`, then `default_level`.
    pub fn new(default_level: &str) -> Self {
        let maybe_env_filter =
            EnvFilter::try_from_env("TGFS_LOG").or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            // Whoever sets a filter by hand wants raw output they can grep.
            Ok(env_filter) => Self {
                mode: Mode::Ugly,
                env_filter,
                span_events: true,
                log_file: None,
            },
            Err(_) => Self {
                mode: Mode::Pretty,
                env_filter: EnvFilter::new(default_level),
                span_events: matches!(default_level, "debug" | "trace"),
                log_file: None,
            },
        }
    }

    /// Additionally append debug-level records to `path`.
    pub fn with_log_file(mut self, path: Option<&Path>) -> Result<Self, TrcError> {
        if let Some(path) = path {
            self.log_file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        Ok(self)
    }

    pub fn init(self) -> Result<(), TrcError> {
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match self.mode {
            Mode::Ugly => {
                tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(std::io::stderr)
                            .with_span_events(span_events)
                            .with_filter(self.env_filter),
                    )
                    .with(file_layer(self.log_file))
                    .try_init()?;
            }
            Mode::Pretty => {
                let indicatif_layer = IndicatifLayer::new();
                tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(indicatif_layer.get_stderr_writer())
                            .with_target(false)
                            .with_span_events(span_events)
                            .without_time()
                            .compact()
                            .with_filter(self.env_filter),
                    )
                    .with(file_layer(self.log_file))
                    .with(indicatif_layer)
                    .try_init()?;
            }
        }

        Ok(())
    }
}
