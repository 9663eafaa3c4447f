use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::{Builder, EnvFilter, FromEnvError};

/// Environment variable selecting the log format (`text` or `json`).
pub const LOG_FORMAT_ENV: &str = "PEERDISPATCH_LOG_FORMAT";
/// Environment variable holding filter directives, e.g. `debug` or
/// `warn,peerdispatch_peer=trace`.
pub const LOG_LEVEL_ENV: &str = "PEERDISPATCH_LOG_LEVEL";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logging options. Flatten into an application's own `clap` parser, or let
/// [`init_logging_from_env`] read them from the environment.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "peerdispatch", disable_help_flag = true, disable_version_flag = true)]
pub struct LogSettings {
    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        env = "PEERDISPATCH_LOG_FORMAT",
        ignore_case = true
    )]
    pub log_format: LogFormat,

    /// Level used when `PEERDISPATCH_LOG_LEVEL` holds no directives.
    #[arg(long, value_name = "LEVEL", default_value = "warn", ignore_case = true)]
    pub log_level: LogLevel,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log settings: {0}")]
    Settings(#[from] clap::Error),

    #[error("invalid PEERDISPATCH_LOG_LEVEL directives: {0}")]
    Filter(#[from] FromEnvError),
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

/// Install a subscriber configured from `PEERDISPATCH_LOG_FORMAT` and
/// `PEERDISPATCH_LOG_LEVEL`. Unset variables fall back to text at warn;
/// invalid values are reported. A second call is a no-op.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let settings = LogSettings::try_parse_from(["peerdispatch"])?;
    let filter = filter_builder(settings.log_level).from_env()?;

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match settings.log_format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
    Ok(())
}

fn filter_builder(default: LogLevel) -> Builder {
    EnvFilter::builder()
        .with_default_directive(default.as_filter().into())
        .with_env_var(LOG_LEVEL_ENV)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_like_cli_flags() {
        let settings = LogSettings::try_parse_from([
            "node",
            "--log-format",
            "JSON",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.log_level.as_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(LogSettings::try_parse_from(["node", "--log-format", "yaml"]).is_err());
        assert!(LogSettings::try_parse_from(["node", "--log-level", "verbose"]).is_err());
        assert!(LogFormat::from_str("Text", true).is_ok());
        assert!(LogLevel::from_str("loud", true).is_err());
    }

    #[test]
    fn filter_accepts_directives_and_rejects_garbage() {
        assert!(filter_builder(LogLevel::Warn).parse("").is_ok());
        assert!(filter_builder(LogLevel::Warn)
            .parse("info,peerdispatch_peer=trace")
            .is_ok());
        assert!(filter_builder(LogLevel::Warn)
            .parse("peerdispatch_peer=loud")
            .is_err());
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(LogFormat::Text, LogLevel::Error);
        init_logging(LogFormat::Json, LogLevel::Trace);
    }
}
