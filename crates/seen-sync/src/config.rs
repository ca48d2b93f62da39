//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use seen_tracing::TracingConfig;
use serde::{Deserialize, Deserializer};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upper bound on a PUT body. Larger bodies are rejected with 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Write credential.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared pin every PUT must present in `X-Pin`.
    ///
    /// Bare numbers are accepted and read back in decimal, so a pin with
    /// leading zeros must be quoted in TOML.
    #[serde(default = "default_pin", deserialize_with = "deserialize_pin")]
    pub pin: String,
}

/// Persistence backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for the file backend. Ignored by the memory backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

// The pin must never show up in startup logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("pin", &"<redacted>").finish()
    }
}

/// Accept the pin as a string or as an integer.
///
/// figment's `Env` provider parses `SEEN_AUTH__PIN=7714` as a number, which a
/// plain `String` field would reject.
fn deserialize_pin<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPin {
        Text(String),
        Number(u64),
    }

    Ok(match RawPin::deserialize(deserializer)? {
        RawPin::Text(pin) => pin,
        RawPin::Number(pin) => pin.to_string(),
    })
}

fn default_listen_address() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_pin() -> String {
    "7714".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("seen-data")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { pin: default_pin() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. `SEEN_PIN`
    /// 2. Environment variables (SEEN_ prefix, __ for nesting)
    /// 3. TOML config file (a missing file is not an error)
    /// 4. Defaults
    ///
    /// Both pin variables are read raw, so `0042` stays `0042`.
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: SyncConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SEEN_").split("__"))
            .extract()?;

        // Direct env var overrides for the sensitive value
        for var in ["SEEN_AUTH__PIN", "SEEN_PIN"] {
            if let Ok(pin) = std::env::var(var) {
                config.auth.pin = pin;
            }
        }

        Ok(config)
    }
}
