//! Configuration is layered: defaults, then `config.json` in the application directory, then
//! environment variables, then command line flags (applied by the cli).

use std::{io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

pub const URL_VARIABLE: &str = "REALCON_URL";
pub const ANON_KEY_VARIABLE: &str = "REALCON_ANON_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub location: LocationConfig,
    /// Identity used with the local store.
    pub offline_user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// How often the dashboard polls the backend for new rows.
    pub realtime_poll_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub use_gpsd: bool,
    pub gpsd_address: String,
    pub use_network: bool,
    pub network_url: String,
    pub network_poll_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            location: LocationConfig::default(),
            offline_user: "local".into(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            realtime_poll_secs: 5,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            use_gpsd: true,
            gpsd_address: "127.0.0.1:2947".into(),
            use_network: true,
            network_url: "http://ip-api.com/json".into(),
            network_poll_secs: 30,
        }
    }
}

impl AppConfig {
    /// Reads `config.json` from `application_dir`. A missing file means defaults.
    pub fn load(application_dir: &Path) -> Result<Self> {
        let path = application_dir.join(CONFIG_FILE);
        match std::fs::read(&path) {
            Ok(content) => serde_json::from_slice(&content)
                .with_context(|| format!("Malformed configuration in {path:?}")),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Can't read configuration {path:?}")),
        }
    }

    /// Applies environment overrides. `lookup` is `std::env::var` outside of tests.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(URL_VARIABLE) {
            self.backend.url = Some(url);
        }
        if let Some(key) = lookup(ANON_KEY_VARIABLE) {
            self.backend.anon_key = Some(key);
        }
        self
    }

    /// Url and key of the hosted backend, if both are configured.
    pub fn backend_credentials(&self) -> Option<(&str, &str)> {
        self.backend
            .url
            .as_deref()
            .zip(self.backend.anon_key.as_deref())
    }
}
