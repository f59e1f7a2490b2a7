// ⚙️ Configuration
//
// Sources, lowest precedence first:
// 1. Built-in defaults
// 2. letting-desk.toml in the working directory (optional)
// 3. Environment variables prefixed LETTING_DESK, nested with "__"
//    e.g. LETTING_DESK__SERVER__BIND=127.0.0.1:8080

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "letting-desk.toml";
pub const ENV_PREFIX: &str = "LETTING_DESK";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub blobs: BlobConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("letting-desk.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory for image blobs
    pub dir: PathBuf,

    /// Largest accepted upload, in bytes
    pub max_bytes: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        BlobConfig {
            dir: PathBuf::from("blobs"),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Let `POST /login` start a session from an email address alone.
    /// Off by default; sessions then come from `letting-desk login`.
    pub dev_login: bool,
}

impl AppConfig {
    /// Load `.env`, the default config file (if present) and the environment.
    pub fn load() -> Result<Self> {
        if Path::new(".env").exists() {
            dotenvy::dotenv().context("Failed to load .env file")?;
        }

        let file = Path::new(CONFIG_FILE);
        AppConfig::load_from(file.exists().then_some(file))
    }

    /// Load from an explicit file (if any) plus the environment.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
