//! Logging setup
//!
//! Diagnostics go to stderr by default so that command output on stdout
//! (serialized definitions, DDL) stays machine readable.

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Map a configured level name to a tracing level
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Level for a `-v` count, starting from warnings
pub fn verbosity_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let directive = format!("db_tools={}", level)
        .parse()
        .map_err(|e| Error::ConfigError(format!("invalid log directive: {}", e)))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Initialize logging based on configuration
///
/// `level` overrides the configured level when given.
pub fn init_logging(config: Option<&LoggingConfig>, level: Option<Level>) -> Result<()> {
    let default_config = LoggingConfig::default();
    let config = config.unwrap_or(&default_config);
    let level = level.unwrap_or_else(|| parse_level(&config.level));
    let filter = env_filter(level)?;
    let json = config.format.eq_ignore_ascii_case("json");

    let builder = fmt::Subscriber::builder().with_env_filter(filter);

    let result = if let Some(file_path) = &config.file {
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(file_path)?;
        let builder = builder.with_writer(file).with_ansi(false);
        match (json, config.include_timestamps) {
            (true, _) => tracing::subscriber::set_global_default(builder.json().finish()),
            (false, true) => tracing::subscriber::set_global_default(builder.finish()),
            (false, false) => {
                tracing::subscriber::set_global_default(builder.without_time().finish())
            }
        }
    } else if config.stdout {
        match (json, config.include_timestamps) {
            (true, _) => tracing::subscriber::set_global_default(builder.json().finish()),
            (false, true) => tracing::subscriber::set_global_default(builder.finish()),
            (false, false) => {
                tracing::subscriber::set_global_default(builder.without_time().finish())
            }
        }
    } else {
        let builder = builder.with_writer(std::io::stderr);
        match (json, config.include_timestamps) {
            (true, _) => tracing::subscriber::set_global_default(builder.json().finish()),
            (false, true) => tracing::subscriber::set_global_default(builder.finish()),
            (false, false) => {
                tracing::subscriber::set_global_default(builder.without_time().finish())
            }
        }
    };

    result.map_err(|e| Error::ConfigError(format!("cannot install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("bogus"), Level::WARN);
        assert_eq!(verbosity_level(0), Level::WARN);
        assert_eq!(verbosity_level(2), Level::DEBUG);
        assert_eq!(verbosity_level(9), Level::TRACE);
    }
}
