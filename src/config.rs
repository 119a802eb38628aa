//! Command-line surface and validated runtime settings.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use clap::Parser;
use snafu::{ResultExt, Snafu};

/// Speech Pool Application (Service)
///
/// Facade in front of an external text-to-speech (TTS) provider: caches
/// conversions by text, fans the resulting byte stream out to every
/// subscriber, and limits the number of simultaneous conversions against the
/// upstream.
#[derive(Parser, Debug, Clone)]
#[command(name = "speech_pool", version, about, long_about = None)]
pub struct Cli {
    /// Service host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Service port
    #[arg(short = 'P', long, default_value_t = 8080)]
    pub port: u16,

    /// Service API path
    #[arg(short = 'A', long = "api-path", default_value = "/api/v1")]
    pub api_path: String,

    /// Text-to-speech service url
    #[arg(long = "tts-api-url", env = "SPEECH_POOL_TTS_API_URL")]
    pub tts_api_url: String,

    /// Text-to-speech service connections limit
    #[arg(long = "tts-api-limit", default_value_t = 10)]
    pub tts_api_limit: usize,

    /// Maximum number of cached conversions
    #[arg(long = "max-cache-items", default_value_t = 128)]
    pub max_cache_items: usize,

    /// Per-byte emission interval of the demo TTS driver, in milliseconds.
    #[arg(long = "tts-tick-millis", default_value_t = 50, hide = true)]
    pub tts_tick_millis: u64,

    /// Switch on debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("invalid host address {host:?}: {source}"))]
    InvalidHost {
        host: String,
        source: std::net::AddrParseError,
    },
    #[snafu(display("tts-api-limit must be greater than zero"))]
    InvalidTtsApiLimit,
    #[snafu(display("max-cache-items must be greater than zero"))]
    InvalidMaxCacheItems,
    #[snafu(display("api-path must be a non-empty, absolute path starting with '/'"))]
    InvalidApiPath,
}

/// Validated, immutable settings shared read-only for the lifetime of the
/// process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    pub api_path: String,
    pub tts_api_url: String,
    pub tts_api_limit: NonZeroUsize,
    pub max_cache_items: NonZeroUsize,
    pub tts_tick: Duration,
    pub verbose: bool,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Settings, ConfigError> {
        let host = cli
            .host
            .parse()
            .context(InvalidHostSnafu { host: cli.host.clone() })?;
        let tts_api_limit =
            NonZeroUsize::new(cli.tts_api_limit).ok_or(ConfigError::InvalidTtsApiLimit)?;
        let max_cache_items =
            NonZeroUsize::new(cli.max_cache_items).ok_or(ConfigError::InvalidMaxCacheItems)?;
        if !cli.api_path.starts_with('/') {
            return Err(ConfigError::InvalidApiPath);
        }
        Ok(Settings {
            host,
            port: cli.port,
            api_path: cli.api_path,
            tts_api_url: cli.tts_api_url,
            tts_api_limit,
            max_cache_items,
            tts_tick: Duration::from_millis(cli.tts_tick_millis),
            verbose: cli.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            host: "127.0.0.1".into(),
            port: 8080,
            api_path: "/api/v1".into(),
            tts_api_url: "http://upstream.example".into(),
            tts_api_limit: 10,
            max_cache_items: 128,
            tts_tick_millis: 50,
            verbose: false,
        }
    }

    #[test]
    fn valid_cli_produces_settings() {
        let settings = Settings::from_cli(base_cli()).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.tts_api_limit.get(), 10);
    }

    #[test]
    fn zero_tts_api_limit_is_rejected() {
        let mut cli = base_cli();
        cli.tts_api_limit = 0;
        assert!(matches!(
            Settings::from_cli(cli),
            Err(ConfigError::InvalidTtsApiLimit)
        ));
    }

    #[test]
    fn zero_max_cache_items_is_rejected() {
        let mut cli = base_cli();
        cli.max_cache_items = 0;
        assert!(matches!(
            Settings::from_cli(cli),
            Err(ConfigError::InvalidMaxCacheItems)
        ));
    }

    #[test]
    fn api_path_must_be_absolute() {
        let mut cli = base_cli();
        cli.api_path = "api/v1".into();
        assert!(matches!(
            Settings::from_cli(cli),
            Err(ConfigError::InvalidApiPath)
        ));
    }

    #[test]
    fn unparseable_host_is_rejected() {
        let mut cli = base_cli();
        cli.host = "not-an-ip".into();
        assert!(matches!(
            Settings::from_cli(cli),
            Err(ConfigError::InvalidHost { .. })
        ));
    }
}
