//! Tracing subscriber setup shared by the binaries

use std::env;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Subscriber options, read from `LOG_*` variables and `RUST_LOG`
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: Level,
    /// Source file and line on every event
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_timestamps: bool,
    /// Emit one JSON object per event instead of the pretty format
    pub json_format: bool,
    pub log_spans: bool,
    /// Raw `RUST_LOG` directive, overrides `level` when set
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_location: true,
            include_thread_ids: false,
            include_timestamps: true,
            json_format: false,
            log_spans: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
        };

        Self {
            level: lookup("LOG_LEVEL")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.level),
            include_location: flag("LOG_INCLUDE_LOCATION", defaults.include_location),
            include_thread_ids: flag("LOG_INCLUDE_THREAD_IDS", defaults.include_thread_ids),
            include_timestamps: flag("LOG_INCLUDE_TIMESTAMPS", defaults.include_timestamps),
            json_format: flag("LOG_JSON_FORMAT", defaults.json_format),
            log_spans: flag("LOG_SPANS", defaults.log_spans),
            env_filter: lookup("RUST_LOG"),
        }
    }

    /// Install the global subscriber; fails if one is already set
    pub fn init_tracing(&self) -> Result<()> {
        let env_filter = self.build_env_filter()?;

        let span_events = if self.log_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };

        let fmt_layer = if self.json_format {
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_thread_ids(self.include_thread_ids)
                .with_target(true)
                .with_span_events(span_events);
            if self.include_timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        } else {
            let layer = fmt::layer()
                .pretty()
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_thread_ids(self.include_thread_ids)
                .with_target(false)
                .with_span_events(span_events);
            if self.include_timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        };

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }

    fn build_env_filter(&self) -> Result<EnvFilter> {
        let filter = if let Some(ref env_filter) = self.env_filter {
            EnvFilter::try_new(env_filter)?
        } else {
            EnvFilter::default()
                .add_directive(format!("codesync_engine={}", self.level).parse()?)
                .add_directive(format!("codesync_api={}", self.level).parse()?)
                .add_directive(format!("codesync={}", self.level).parse()?)
                .add_directive("tower_http=debug".parse()?)
                .add_directive("hyper=info".parse()?)
                .add_directive("qdrant_client=info".parse()?)
        };

        Ok(filter)
    }
}

/// Initialize logging from the environment
pub fn init_default_logging() -> Result<()> {
    LoggingConfig::from_env().init_tracing()
}

/// JSON lines without source locations, for the API server
pub fn init_production_logging() -> Result<()> {
    let mut config = LoggingConfig::from_env();
    config.json_format = true;
    config.include_location = false;
    config.init_tracing()
}

/// `operation`/`status` tagged events around a service operation
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr, $($field:ident = $value:expr),*) => {
        tracing::info!(
            operation = $operation,
            status = "started",
            $($field = $value,)*
            "Operation started"
        );
    };
}

#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr, $duration:expr, $($field:ident = $value:expr),*) => {
        tracing::info!(
            operation = $operation,
            status = "success",
            duration_ms = $duration.as_millis() as u64,
            $($field = $value,)*
            "Operation completed"
        );
    };
}
