//! `~/.dnsgate/config.toml` loading.
//!
//! Every section is optional. A missing file is not an error: the daemon still
//! starts, and API calls report that the server is not configured.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use serde::Deserialize;
use thiserror::Error;

use dnsgate_api::ApiCredentials;
use dnsgate_types::OptionsPatch;

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "DNSGATE_CONFIG";

const DEFAULT_PROBE_ZONE: &str = "example.com";
const DEFAULT_SETTLE_MS: u64 = 600;
const DEFAULT_PROBE_ATTEMPTS: u32 = 3;

#[derive(Debug, Default, Deserialize)]
pub struct DnsGateConfig {
    pub server: Option<ServerConfig>,
    pub daemon: Option<DaemonConfig>,
    /// Seeds for the user options, applied only when the store has no value.
    pub options: Option<OptionsConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

// Manual Debug impl to prevent leaking the API token in logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &if self.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

impl ServerConfig {
    /// Credentials with `${VAR}` references expanded. `None` unless both the
    /// base URL and the key end up non-empty.
    #[must_use]
    pub fn credentials(&self) -> Option<ApiCredentials> {
        let base_url = expand_env_vars(self.base_url.as_deref()?.trim());
        let api_key = expand_env_vars(self.api_key.as_deref()?.trim());
        if base_url.trim().is_empty() || api_key.trim().is_empty() {
            return None;
        }
        Some(ApiCredentials { base_url, api_key })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    /// Where durable state lives. `~` and `${VAR}` are expanded.
    pub state_path: Option<String>,
    /// Zone under which identity probe labels are generated.
    pub probe_zone: Option<String>,
    /// Wait between emitting an identity probe and each log lookup.
    pub settle_ms: Option<u64>,
    /// Log lookups per identity probe before giving up.
    pub probe_attempts: Option<u32>,
}

impl DaemonConfig {
    #[must_use]
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state_path
            .as_deref()
            .map(|raw| expand_home(&expand_env_vars(raw.trim())))
    }

    #[must_use]
    pub fn probe_zone(&self) -> String {
        self.probe_zone
            .as_deref()
            .map(|z| z.trim().trim_matches('.'))
            .filter(|z| !z.is_empty())
            .unwrap_or(DEFAULT_PROBE_ZONE)
            .to_string()
    }

    #[must_use]
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(DEFAULT_SETTLE_MS))
    }

    #[must_use]
    pub fn probe_attempts(&self) -> u32 {
        self.probe_attempts.unwrap_or(DEFAULT_PROBE_ATTEMPTS).max(1)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionsConfig {
    pub temp_allow_minutes: Option<u32>,
    pub log_window_seconds: Option<u32>,
    pub show_allow_status: Option<bool>,
}

impl OptionsConfig {
    #[must_use]
    pub fn to_patch(&self) -> OptionsPatch {
        OptionsPatch {
            temp_allow_minutes: self.temp_allow_minutes.map(f64::from),
            log_window_seconds: self.log_window_seconds.map(f64::from),
            show_allow_status: self.show_allow_status,
        }
    }
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        let Some(close_rel) = rest[open + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &rest[open + 2..open + 2 + close_rel];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &rest[open + 2 + close_rel + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

impl DnsGateConfig {
    /// Load from [`config_path`]. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn credentials(&self) -> Option<ApiCredentials> {
        self.server.as_ref().and_then(ServerConfig::credentials)
    }

    /// Configured state path, else `~/.dnsgate/state.json`.
    #[must_use]
    pub fn state_path(&self) -> Option<PathBuf> {
        self.daemon
            .as_ref()
            .and_then(DaemonConfig::state_path)
            .or_else(|| data_dir().map(|d| d.join("state.json")))
    }
}

/// `~/.dnsgate`, where state, logs and the default config live.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dnsgate"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = env::var(CONFIG_PATH_ENV)
        && !explicit.trim().is_empty()
    {
        return Some(expand_home(explicit.trim()));
    }
    data_dir().map(|d| d.join("config.toml"))
}
