use anyhow::{anyhow, Result};
use chrono::Duration;
use std::{env, fmt::Display, path::PathBuf, str::FromStr};
use tracing::{info, warn};

use crate::cache::DIRECTORY_TTL_SECS;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub data_dir: PathBuf,
    pub directory_ttl_secs: i64,
    pub board_ttl_secs: Option<i64>,
    pub request_timeout_secs: u64,
    pub start_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            data_dir: default_data_dir(),
            directory_ttl_secs: DIRECTORY_TTL_SECS,
            board_ttl_secs: None,
            request_timeout_secs: 60,
            start_url: "/".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let start_url = env::args()
            .nth(1)
            .or_else(|| var("CAMPUS_BOARD_START_URL"))
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            api_base_url: try_load("CAMPUS_BOARD_API_URL", DEFAULT_API_URL)?,
            api_token: var("CAMPUS_BOARD_API_TOKEN"),
            data_dir: var("CAMPUS_BOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            directory_ttl_secs: try_load(
                "CAMPUS_BOARD_DIRECTORY_TTL_SECS",
                &DIRECTORY_TTL_SECS.to_string(),
            )?,
            board_ttl_secs: try_load_optional("CAMPUS_BOARD_BOARD_TTL_SECS")?,
            request_timeout_secs: try_load("CAMPUS_BOARD_REQUEST_TIMEOUT_SECS", "60")?,
            start_url,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("campus_board.db")
    }

    pub fn directory_ttl(&self) -> Duration {
        Duration::seconds(self.directory_ttl_secs)
    }

    pub fn board_ttl(&self) -> Option<Duration> {
        self.board_ttl_secs.map(Duration::seconds)
    }
}

fn default_data_dir() -> PathBuf {
    let mut path = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".campus_board");
    path
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("Environment misconfigured: {key}: {e}")
        })
}

fn try_load_optional<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Environment misconfigured: {key}: {e}")),
        None => {
            info!("{key} not set, keeping entries for the whole session");
            Ok(None)
        }
    }
}
