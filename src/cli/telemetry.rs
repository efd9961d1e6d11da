//! Logging initialization.
//!
//! `RUST_LOG` wins when set; otherwise the `-v` count picks the level.
//! `WARDEN_LOG_FORMAT=json` switches to structured output for collectors.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Safe to call once per process.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::try_from_default_env()?,
        Err(_) => {
            let level = verbosity_level.map_or("error", level_str);
            EnvFilter::try_new(level)?
        }
    };

    let json = std::env::var("WARDEN_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow::anyhow!("failed to initialize logging: {err}"))
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_match_filter_directives() {
        assert_eq!(level_str(Level::ERROR), "error");
        assert_eq!(level_str(Level::TRACE), "trace");
    }
}
