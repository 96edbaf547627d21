use std::path::{Path, PathBuf};
use std::time::Duration;

use fairway_core::Coordinate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Anchor used for simulated positions when nothing else is configured.
pub const DEFAULT_REFERENCE: Coordinate = Coordinate::new(36.5725, -121.9486);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub location: LocationConfig,
    pub ble: BleConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Anchor of the simulated player position.
    pub reference: Coordinate,
    pub simulation_interval_ms: u64,
    /// Maximum per-axis offset, in degrees, applied on each simulated tick.
    pub simulation_jitter_deg: f64,
    /// Minimum interval requested from a real location source.
    pub min_update_interval_ms: u64,
    /// Minimum displacement in meters requested from a real location source.
    pub min_displacement_m: f64,
    /// Upper bound on each permission, subscribe or unsubscribe call.
    pub request_timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            reference: DEFAULT_REFERENCE,
            simulation_interval_ms: 2_000,
            simulation_jitter_deg: 0.000_05,
            min_update_interval_ms: 1_000,
            min_displacement_m: 1.0,
            request_timeout_ms: 10_000,
        }
    }
}

impl LocationConfig {
    /// Never zero; a zero setting ticks every millisecond.
    pub fn simulation_interval(&self) -> Duration {
        period(self.simulation_interval_ms)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Anchor around which paired balls are placed.
    pub reference: Coordinate,
    pub scan_timeout_ms: u64,
    /// How long `pair` waits for a freshly started scan to collect devices.
    pub settle_delay_ms: u64,
    /// Delay before the simulated device list is reported.
    pub simulated_discovery_delay_ms: u64,
    pub telemetry_interval_ms: u64,
    pub telemetry_jitter_deg: f64,
    pub pairing_jitter_deg: f64,
    /// Upper bound on connecting to a device and discovering its services.
    pub connect_timeout_ms: u64,
    /// Upper bound on the adapter accepting a scan or stop request.
    pub scan_request_timeout_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            reference: DEFAULT_REFERENCE,
            scan_timeout_ms: 30_000,
            settle_delay_ms: 3_000,
            simulated_discovery_delay_ms: 1_000,
            telemetry_interval_ms: 5_000,
            telemetry_jitter_deg: 0.000_5,
            pairing_jitter_deg: 0.005,
            connect_timeout_ms: 10_000,
            scan_request_timeout_ms: 5_000,
        }
    }
}

impl BleConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn simulated_discovery_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_discovery_delay_ms)
    }

    /// Never zero; a zero setting ticks every millisecond.
    pub fn telemetry_interval(&self) -> Duration {
        period(self.telemetry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn scan_request_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_request_timeout_ms)
    }
}

/// Period for a repeating timer. Tokio rejects a zero period.
fn period(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}
