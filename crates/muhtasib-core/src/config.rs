//! Configuration module
//!
//! Settings are read from the environment (after loading an optional `.env` file)
//! with a default for everything except provider credentials.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_CLAMAV_HOST, DEFAULT_CLAMAV_PORT, DEFAULT_GMAIL_API_BASE_URL,
    DEFAULT_GRAPH_API_BASE_URL, DEFAULT_VIRUSTOTAL_BASE_URL,
};

const CLAMAV_TIMEOUT_SECS: u64 = 30;
const CLAMAV_MAX_CONCURRENT_SCANS: usize = 4;
const FETCH_TIMEOUT_SECS: u64 = 30;
const STAGING_VERIFY_ATTEMPTS: u32 = 5;
const STAGING_VERIFY_DELAY_MS: u64 = 200;
const MAX_CONCURRENT_ARTIFACTS: usize = 4;

/// How concurrent scans share the daemon
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanAccess {
    /// Up to `n` scans in flight at once
    Concurrent(usize),
    /// One scan at a time, queued in arrival order
    Serialized,
}

impl ScanAccess {
    pub fn permits(&self) -> usize {
        match self {
            ScanAccess::Concurrent(n) => (*n).max(1),
            ScanAccess::Serialized => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("Unknown LOG_FORMAT '{}'", other)),
        }
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    // ClamAV daemon
    pub clamav_host: String,
    pub clamav_port: u16,
    /// Unix socket path; takes precedence over host/port when set
    pub clamav_socket: Option<PathBuf>,
    pub clamav_timeout_secs: u64,
    pub scan_access: ScanAccess,
    // Staging
    /// Parent of the per-run staging directory; system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    pub staging_verify_attempts: u32,
    pub staging_verify_delay_ms: u64,
    // Fetching
    pub fetch_timeout_secs: u64,
    pub max_concurrent_artifacts: usize,
    // Providers (bearer tokens are minted elsewhere)
    pub gmail_access_token: Option<String>,
    pub gmail_api_base_url: String,
    pub outlook_access_token: Option<String>,
    pub graph_api_base_url: String,
    // Link reputation
    pub virustotal_api_key: Option<String>,
    pub virustotal_base_url: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clamav_host: DEFAULT_CLAMAV_HOST.to_string(),
            clamav_port: DEFAULT_CLAMAV_PORT,
            clamav_socket: None,
            clamav_timeout_secs: CLAMAV_TIMEOUT_SECS,
            scan_access: ScanAccess::Concurrent(CLAMAV_MAX_CONCURRENT_SCANS),
            staging_dir: None,
            staging_verify_attempts: STAGING_VERIFY_ATTEMPTS,
            staging_verify_delay_ms: STAGING_VERIFY_DELAY_MS,
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            max_concurrent_artifacts: MAX_CONCURRENT_ARTIFACTS,
            gmail_access_token: None,
            gmail_api_base_url: DEFAULT_GMAIL_API_BASE_URL.to_string(),
            outlook_access_token: None,
            graph_api_base_url: DEFAULT_GRAPH_API_BASE_URL.to_string(),
            virustotal_api_key: None,
            virustotal_base_url: DEFAULT_VIRUSTOTAL_BASE_URL.to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Read an optional, non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, falling back to `default` when unset.
/// A set but unparseable value is an error rather than a silent default.
fn env_parse<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let max_concurrent_scans =
            env_parse("CLAMAV_MAX_CONCURRENT_SCANS", CLAMAV_MAX_CONCURRENT_SCANS)?;
        let scan_access = match env_opt("CLAMAV_SCAN_ACCESS")
            .unwrap_or_else(|| "concurrent".to_string())
            .to_lowercase()
            .as_str()
        {
            "concurrent" => ScanAccess::Concurrent(max_concurrent_scans),
            "serialized" | "serial" => ScanAccess::Serialized,
            other => {
                return Err(anyhow::anyhow!(
                    "CLAMAV_SCAN_ACCESS must be 'concurrent' or 'serialized', got '{}'",
                    other
                ))
            }
        };

        let config = Config {
            clamav_host: env_opt("CLAMAV_HOST").unwrap_or(defaults.clamav_host),
            clamav_port: env_parse("CLAMAV_PORT", DEFAULT_CLAMAV_PORT)?,
            clamav_socket: env_opt("CLAMAV_SOCKET").map(PathBuf::from),
            clamav_timeout_secs: env_parse("CLAMAV_TIMEOUT_SECS", CLAMAV_TIMEOUT_SECS)?,
            scan_access,
            staging_dir: env_opt("STAGING_DIR").map(PathBuf::from),
            staging_verify_attempts: env_parse("STAGING_VERIFY_ATTEMPTS", STAGING_VERIFY_ATTEMPTS)?,
            staging_verify_delay_ms: env_parse("STAGING_VERIFY_DELAY_MS", STAGING_VERIFY_DELAY_MS)?,
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", FETCH_TIMEOUT_SECS)?,
            max_concurrent_artifacts: env_parse(
                "MAX_CONCURRENT_ARTIFACTS",
                MAX_CONCURRENT_ARTIFACTS,
            )?,
            gmail_access_token: env_opt("GMAIL_ACCESS_TOKEN"),
            gmail_api_base_url: env_opt("GMAIL_API_BASE_URL")
                .unwrap_or(defaults.gmail_api_base_url),
            outlook_access_token: env_opt("OUTLOOK_ACCESS_TOKEN"),
            graph_api_base_url: env_opt("GRAPH_API_BASE_URL")
                .unwrap_or(defaults.graph_api_base_url),
            virustotal_api_key: env_opt("VIRUSTOTAL_API_KEY"),
            virustotal_base_url: env_opt("VIRUSTOTAL_BASE_URL")
                .unwrap_or(defaults.virustotal_base_url),
            log_format: env_parse("LOG_FORMAT", LogFormat::Pretty)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.clamav_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "CLAMAV_TIMEOUT_SECS and FETCH_TIMEOUT_SECS must be greater than zero"
            ));
        }

        if self.max_concurrent_artifacts == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CONCURRENT_ARTIFACTS must be at least 1"
            ));
        }

        if self.staging_verify_attempts == 0 {
            return Err(anyhow::anyhow!("STAGING_VERIFY_ATTEMPTS must be at least 1"));
        }

        for (key, url) in [
            ("GMAIL_API_BASE_URL", &self.gmail_api_base_url),
            ("GRAPH_API_BASE_URL", &self.graph_api_base_url),
            ("VIRUSTOTAL_BASE_URL", &self.virustotal_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{} must be an http(s) URL", key));
            }
        }

        Ok(())
    }

    /// `host:port` address of the daemon
    pub fn clamav_address(&self) -> String {
        format!("{}:{}", self.clamav_host, self.clamav_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clamav_address(), "127.0.0.1:3310");
        assert_eq!(config.staging_verify_attempts, 5);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = Config {
            max_concurrent_artifacts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_base_url_rejected() {
        let config = Config {
            graph_api_base_url: "graph.microsoft.com".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GRAPH_API_BASE_URL"));
    }

    #[test]
    fn scan_access_permits() {
        assert_eq!(ScanAccess::Serialized.permits(), 1);
        assert_eq!(ScanAccess::Concurrent(0).permits(), 1);
        assert_eq!(ScanAccess::Concurrent(8).permits(), 8);
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
