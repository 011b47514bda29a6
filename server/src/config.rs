//! Configuration for the Skiff server.
//!
//! Configuration is stored in RON and discovered from standard locations;
//! credentials always come from the environment so they never live in a
//! checked-in file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Standard config file names to search for
const CONFIG_FILENAMES: &[&str] = &["skiff.ron", ".skiff/config.ron"];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub listen: Listen,

    #[serde(default)]
    pub storage: Storage,

    /// Seed users for the in-memory identity provider.
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Listen {
    pub addr: String,
}

impl Default for Listen {
    fn default() -> Self {
        Self { addr: "0.0.0.0:8000".to_string() }
    }
}

/// Where repositories live. The in-memory mode exists for tests and local
/// hacking, mirrored by the `SKIFF_IN_MEMORY_STORE` environment variable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub enum Storage {
    #[default]
    Memory,
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct S3Config {
    /// Endpoint base URL, e.g. `https://s3.example.com` or a MinIO address.
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Credentials come from SKIFF_S3_ACCESS_KEY / SKIFF_S3_SECRET_KEY.
    #[serde(skip)]
    pub access_key: String,
    #[serde(skip)]
    pub secret_key: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UserEntry {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Load configuration from a specific file path
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = ron::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(apply_env(config))
}

/// Load configuration with automatic file discovery
///
/// Searches, in order: the SKIFF_CONFIG_PATH environment variable, then
/// `skiff.ron` and `.skiff/config.ron` in the current directory. Without a
/// file the defaults apply (in-memory storage, no users).
pub fn load_with_discovery() -> Result<Config> {
    if let Ok(env_path) = std::env::var("SKIFF_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            tracing::info!("Loading config from SKIFF_CONFIG_PATH: {}", path.display());
            return load_from_file(&path);
        }
        tracing::warn!(
            "SKIFF_CONFIG_PATH specified but file not found: {}",
            path.display()
        );
    }

    for filename in CONFIG_FILENAMES {
        let path = PathBuf::from(filename);
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return load_from_file(&path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(apply_env(Config::default()))
}

/// Environment overrides: storage mode and S3 credentials.
fn apply_env(mut config: Config) -> Config {
    if std::env::var("SKIFF_IN_MEMORY_STORE").ok().as_deref() == Some("true") {
        config.storage = Storage::Memory;
    }
    if let Storage::S3(s3) = &mut config.storage {
        if let Ok(key) = std::env::var("SKIFF_S3_ACCESS_KEY") {
            s3.access_key = key;
        }
        if let Ok(secret) = std::env::var("SKIFF_S3_SECRET_KEY") {
            s3.secret_key = secret;
        }
        if let Ok(endpoint) = std::env::var("SKIFF_S3_ENDPOINT") {
            s3.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("SKIFF_S3_BUCKET") {
            s3.bucket = bucket;
        }
    }
    if let Ok(addr) = std::env::var("SKIFF_LISTEN_ADDR") {
        config.listen.addr = addr;
    }
    config
}
