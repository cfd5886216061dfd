use crate::domain::ControlError;
use crate::domain::ServerConfig;
use crate::domain::settings::CONFIG_KEYS;
use std::path::{Path, PathBuf};
use std::{env, io, time::Duration};
use tracing::{info, warn};

// Runtime/process settings (not game tunables).

pub fn config_path() -> PathBuf {
    env::var("DEDICATED_CONFIG")
        .unwrap_or_else(|_| "dedicated_config.toml".to_string())
        .into()
}

pub fn log_file() -> PathBuf {
    env::var("DEDICATED_LOG_FILE")
        .unwrap_or_else(|_| "dedicated_control.log".to_string())
        .into()
}

pub fn error_file() -> PathBuf {
    env::var("DEDICATED_ERROR_FILE")
        .unwrap_or_else(|_| "dedicated_control_errors.log".to_string())
        .into()
}

/// Internal heartbeat period; `None` when host ticks drive time.
pub fn tick_interval() -> Option<Duration> {
    let millis = env::var("DEDICATED_TICK_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(1000);
    (millis > 0).then(|| Duration::from_millis(millis))
}

/// Parsed config plus the keys that fell back to defaults or were not recognized.
#[derive(Debug)]
pub struct ParsedConfig {
    pub config: ServerConfig,
    pub missing: Vec<&'static str>,
    pub unknown: Vec<String>,
}

pub fn parse_server_config(text: &str) -> Result<ParsedConfig, toml::de::Error> {
    let table: toml::Table = toml::from_str(text)?;
    let config: ServerConfig = toml::from_str(text)?;

    let missing = CONFIG_KEYS
        .iter()
        .copied()
        .filter(|key| !table.contains_key(*key))
        .collect();
    let unknown = table
        .keys()
        .filter(|key| !CONFIG_KEYS.contains(&key.as_str()))
        .cloned()
        .collect();

    Ok(ParsedConfig {
        config,
        missing,
        unknown,
    })
}

/// Reads the config file once. Any failure here prevents startup.
pub fn load_server_config(path: &Path) -> io::Result<ServerConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to read config {}: {e}", path.display()),
        )
    })?;
    let parsed = parse_server_config(&text).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse config {}: {e}", path.display()),
        )
    })?;

    for &key in &parsed.missing {
        info!(key, "{}", ControlError::ConfigMissingKey(key));
    }
    for key in &parsed.unknown {
        warn!(key = %key, "unknown config key ignored");
    }
    info!(path = %path.display(), "config loaded");
    Ok(parsed.config)
}
