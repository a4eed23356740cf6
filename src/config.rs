use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use mac_address::MacAddress;
use serde_derive::Deserialize;

/// Sentinel shipped in example configs; a key equal to it counts as unset.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_AFTER_DEPLOY";

const DEFAULT_MAX_TRACKED_DEVICES: NonZeroUsize = NonZeroUsize::new(30).unwrap();
const DEFAULT_EXPORT_LIMIT: NonZeroUsize = NonZeroUsize::new(10).unwrap();

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub scanner: Option<ScannerConfig>,
    pub server: Option<ServerConfig>,
    pub scan: Option<ScanConfig>,
    pub devices: Option<Vec<KnownDevice>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScannerConfig {
    pub id: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotConfigured {
    MissingUrl,
    MissingApiKey,
    PlaceholderApiKey,
}

impl std::fmt::Display for NotConfigured {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotConfigured::MissingUrl => write!(f, "server URL not configured"),
            NotConfigured::MissingApiKey => write!(f, "API key not configured"),
            NotConfigured::PlaceholderApiKey => write!(f, "API key still set to placeholder"),
        }
    }
}

impl ServerConfig {
    pub fn readiness(&self) -> Result<(), NotConfigured> {
        if self.url.is_empty() {
            return Err(NotConfigured::MissingUrl);
        }
        if self.api_key.is_empty() {
            return Err(NotConfigured::MissingApiKey);
        }
        if self.api_key == PLACEHOLDER_API_KEY {
            return Err(NotConfigured::PlaceholderApiKey);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(15))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub scan_duration_seconds: Option<u64>,
    pub scan_interval_seconds: Option<u64>,
    pub device_timeout_seconds: Option<u64>,
    pub max_tracked_devices: Option<NonZeroUsize>,
    pub export_limit: Option<NonZeroUsize>,
}

/// A device the operator already knows; its name stands in when advertisements carry none.
#[derive(Deserialize, Debug, Clone)]
pub struct KnownDevice {
    pub address: MacAddress,
    pub name: String,
}

/// Timing and sizing for the reporting cycle, with defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub scan_duration: Duration,
    pub scan_interval: Duration,
    pub device_timeout: Duration,
    pub max_tracked_devices: NonZeroUsize,
    pub export_limit: NonZeroUsize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        ScanConfig::default().settings()
    }
}

impl ScanConfig {
    pub fn settings(&self) -> CycleSettings {
        CycleSettings {
            scan_duration: Duration::from_secs(self.scan_duration_seconds.unwrap_or(5)),
            scan_interval: Duration::from_secs(self.scan_interval_seconds.unwrap_or(15)),
            device_timeout: Duration::from_secs(self.device_timeout_seconds.unwrap_or(120)),
            max_tracked_devices: self
                .max_tracked_devices
                .unwrap_or(DEFAULT_MAX_TRACKED_DEVICES),
            export_limit: self.export_limit.unwrap_or(DEFAULT_EXPORT_LIMIT),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn scanner_id(&self) -> String {
        self.scanner
            .as_ref()
            .and_then(|s| s.id.clone())
            .unwrap_or("beacon-reporter".to_string())
    }

    pub fn settings(&self) -> CycleSettings {
        self.scan.clone().unwrap_or_default().settings()
    }
}
