//! Radio and sync configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Configuration for a tracker sync session.
///
/// Defaults match the radio parameters the tracker is paired with; they
/// rarely need changing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// RF frequency offset from the 2.4 GHz base.
    pub frequency: u8,
    /// Channel message period (32768 / period = Hz).
    pub period: u16,
    /// Transmit power level.
    pub transmit_power: u8,
    /// Channel search timeout (0xFF = search forever).
    pub search_timeout: u8,
    /// Delay between burst chunks, in milliseconds.
    pub burst_pacing_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frequency: 0x02,
            period: 0x1000,
            transmit_power: 0x03,
            search_timeout: 0xFF,
            burst_pacing_ms: 10,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
