use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

/// Tunables for the session registry and its runners.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed delay before reconnecting after a transient close.
    pub reconnect_delay: Duration,
    /// Bounded wait for connection establishment.
    pub connect_timeout: Duration,
    /// Whether a logout immediately re-arms a fresh connect.
    pub rearm_after_logout: bool,
    /// Renders QR payloads to the terminal as they arrive.
    pub print_qr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(60),
            rearm_after_logout: false,
            print_qr: false,
        }
    }
}

/// Throttling for bulk contact jobs.
#[derive(Debug, Clone)]
pub struct ContactJobConfig {
    pub import_batch_size: usize,
    pub import_delay: Duration,
    pub reset_page_size: usize,
    pub reset_batch_size: usize,
    pub reset_delay: Duration,
}

impl Default for ContactJobConfig {
    fn default() -> Self {
        Self {
            import_batch_size: 10,
            import_delay: Duration::from_millis(1500),
            reset_page_size: 100,
            reset_batch_size: 5,
            reset_delay: Duration::from_millis(500),
        }
    }
}

/// Connection settings for the remote document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppwriteConfig {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
    pub collection_id: String,
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address for binding the HTTP server.
    pub bind_addr: SocketAddr,
    /// Application-private data root; credentials live under `sessions/`.
    pub data_dir: PathBuf,
    pub session: SessionConfig,
    pub contacts: ContactJobConfig,
    /// Remote contact store; `None` selects the in-memory store.
    pub appwrite: Option<AppwriteConfig>,
    /// Seconds after which the synthetic client confirms a pending scan.
    pub synthetic_auto_pair: Option<Duration>,
    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Config {
    /// Loads runtime configuration using environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = match lookup("SERVER_HOST") {
            Some(raw) => IpAddr::from_str(raw.trim())
                .map_err(|_| ConfigError::invalid("SERVER_HOST", &raw))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = parse_or(&lookup, "SERVER_PORT", 3000_u16)?;

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let session = SessionConfig {
            reconnect_delay: Duration::from_secs(parse_or(&lookup, "WA_RECONNECT_DELAY_SECS", 5_u64)?),
            connect_timeout: Duration::from_secs(parse_or(&lookup, "WA_CONNECT_TIMEOUT_SECS", 60_u64)?),
            rearm_after_logout: parse_bool_or(&lookup, "WA_REARM_AFTER_LOGOUT", false)?,
            print_qr: parse_bool_or(&lookup, "WA_PRINT_QR", false)?,
        };

        let contacts = ContactJobConfig {
            import_batch_size: parse_non_zero(&lookup, "IMPORT_BATCH_SIZE", 10)?,
            import_delay: Duration::from_millis(parse_or(&lookup, "IMPORT_DELAY_MS", 1500_u64)?),
            reset_page_size: parse_non_zero(&lookup, "RESET_PAGE_SIZE", 100)?,
            reset_batch_size: parse_non_zero(&lookup, "RESET_BATCH_SIZE", 5)?,
            reset_delay: Duration::from_millis(parse_or(&lookup, "RESET_DELAY_MS", 500_u64)?),
        };

        let appwrite = match (
            lookup("APPWRITE_ENDPOINT"),
            lookup("APPWRITE_PROJECT_ID"),
            lookup("APPWRITE_API_KEY"),
            lookup("APPWRITE_DATABASE_ID"),
            lookup("APPWRITE_CONTACTS_COLLECTION_ID"),
        ) {
            (Some(endpoint), Some(project_id), Some(api_key), Some(database_id), Some(collection_id)) => {
                Some(AppwriteConfig {
                    endpoint: endpoint.trim_end_matches('/').to_owned(),
                    project_id,
                    api_key,
                    database_id,
                    collection_id,
                })
            }
            _ => None,
        };

        let synthetic_auto_pair = match lookup("WA_SYNTHETIC_AUTO_PAIR_SECS") {
            Some(raw) => Some(Duration::from_secs(
                u64::from_str(raw.trim())
                    .map_err(|_| ConfigError::invalid("WA_SYNTHETIC_AUTO_PAIR_SECS", &raw))?,
            )),
            None => None,
        };

        let log_json = lookup("LOG_FORMAT")
            .map(|raw| raw.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            data_dir,
            session,
            contacts,
            appwrite,
            synthetic_auto_pair,
            log_json,
        })
    }

    /// Directory holding one credentials folder per user.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => T::from_str(raw.trim()).map_err(|_| ConfigError::invalid(key, &raw)),
        None => Ok(default),
    }
}

fn parse_non_zero<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::ZeroValue(key));
    }

    Ok(value)
}

fn parse_bool_or<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, &raw)),
    }
}

/// Errors while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str) -> Self {
        Self::Invalid {
            key,
            value: value.to_owned(),
        }
    }
}
