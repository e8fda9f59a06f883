use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::acquisition::SourceMode;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Runtime settings for the local app binary.
#[derive(Clone, Debug)]
pub struct AppSettings {
    /// Directory holding the SQLite store.
    pub data_dir: PathBuf,
    /// Localhost port for the control surface and live feed.
    pub control_port: u16,
    /// Base URL of the remote service; empty disables pushing entirely.
    pub endpoint_url: String,
    pub mode: SourceMode,
    /// Explicit serial device path; `None` means scan for a board.
    pub device_path: Option<String>,
}

impl AppSettings {
    pub fn from_env() -> Result<Self> {
        let control_port = env_or("VERDANT_PORT", "8096")
            .parse::<u16>()
            .context("VERDANT_PORT must be a port number")?;

        let mode = if env_flag("VERDANT_EMULATE") {
            SourceMode::Emulate
        } else {
            SourceMode::Device
        };

        Ok(Self {
            data_dir: PathBuf::from(env_or("VERDANT_DATA_DIR", "./data")),
            control_port,
            endpoint_url: env_or("VERDANT_ENDPOINT_URL", ""),
            mode,
            device_path: std::env::var("VERDANT_DEVICE").ok().filter(|p| !p.is_empty()),
        })
    }
}

/// Runtime settings for the remote service binary.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// Accounts to create at startup when they do not exist yet; their
    /// tokens are logged once so an operator can hand them out.
    pub seed_accounts: Vec<String>,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self> {
        let bind = env_or("VERDANT_SERVER_BIND", "0.0.0.0:3000")
            .parse::<SocketAddr>()
            .context("VERDANT_SERVER_BIND must be host:port")?;

        let seed_accounts = env_or("VERDANT_SEED_ACCOUNTS", "")
            .split(',')
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            bind,
            db_path: PathBuf::from(env_or("VERDANT_SERVER_DB", "./verdant-server.sqlite3")),
            seed_accounts,
        })
    }
}
