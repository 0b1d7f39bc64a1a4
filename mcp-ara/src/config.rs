use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol;

pub const MICROCHIP_VID: u16 = 0x04D8;
pub const MCP2221_PID: u16 = 0x00DD;

/// 12 MHz / 260, roughly 46 kHz.
pub const DEFAULT_CLOCK_DIVIDER: u16 = 260;

pub const DEFAULT_CONFIG_PATH: &str = "./mcp-ara.json";

/// What a GP pin is used for. Only plain GPIO is needed by the adapter; the
/// chip's alternate functions are passed through as raw designation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    Gpio,
    Alternate(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSetting {
    pub mode: PinMode,
    pub direction: Direction,
    pub high: bool,
}

impl Default for PinSetting {
    fn default() -> Self {
        Self {
            mode: PinMode::Gpio,
            direction: Direction::Output,
            high: false,
        }
    }
}

impl PinSetting {
    pub fn encode(&self) -> u8 {
        let designation = match self.mode {
            PinMode::Gpio => 0,
            PinMode::Alternate(code) => code,
        };
        protocol::gp_setting(designation, self.direction == Direction::Input, self.high)
    }
}

/// Settings applied once when a bridge is opened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// GP0 through GP3.
    pub gpio: [PinSetting; 4],
    /// Divisor of the 12 MHz system clock used for SCL.
    pub clock_divider: u16,
    /// Upper bound on waiting for the I2C engine to finish a transfer.
    pub timeout_ms: u64,
    /// Pause between engine polls. Zero polls back to back.
    pub poll_interval_us: u64,
    /// Cancel the engine after a failed transfer so the next one starts idle.
    /// Off by default: the next call sees whatever state the failure left.
    pub cancel_after_error: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vendor_id: MICROCHIP_VID,
            product_id: MCP2221_PID,
            gpio: [PinSetting::default(); 4],
            clock_divider: DEFAULT_CLOCK_DIVIDER,
            timeout_ms: 1000,
            poll_interval_us: 0,
            cancel_after_error: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Like [`BridgeConfig::load`], but any problem falls back to the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("ignoring {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn gpio_settings(&self) -> [u8; 4] {
        self.gpio.map(|pin| pin.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_legacy_setup() {
        let config = BridgeConfig::default();
        assert_eq!(config.vendor_id, 0x04D8);
        assert_eq!(config.product_id, 0x00DD);
        assert_eq!(config.clock_divider, 260);
        assert_eq!(config.gpio_settings(), [0, 0, 0, 0]);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.poll_interval(), Duration::ZERO);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = BridgeConfig::from_json(r#"{ "clock_divider": 120, "timeout_ms": 50 }"#).unwrap();
        assert_eq!(config.clock_divider, 120);
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.product_id, MCP2221_PID);
        assert!(!config.cancel_after_error);
    }

    #[test]
    fn pin_settings_from_json() {
        let config = BridgeConfig::from_json(
            r#"{ "gpio": [
                { "mode": "gpio", "direction": "output", "high": true },
                { "mode": "gpio", "direction": "input", "high": false },
                { "mode": { "alternate": 2 }, "direction": "output", "high": false },
                { "mode": "gpio", "direction": "output", "high": false }
            ] }"#,
        )
        .unwrap();
        assert_eq!(config.gpio_settings(), [0x10, 0x08, 0x02, 0x00]);
    }

    #[test]
    fn load_or_default_tolerates_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(BridgeConfig::load_or_default(&missing), BridgeConfig::default());

        let broken = dir.path().join("broken.json");
        std::fs::File::create(&broken)
            .unwrap()
            .write_all(b"{ not json")
            .unwrap();
        assert!(BridgeConfig::load(&broken).is_err());
        assert_eq!(BridgeConfig::load_or_default(&broken), BridgeConfig::default());

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{ "vendor_id": 1234 }"#).unwrap();
        assert_eq!(BridgeConfig::load_or_default(&good).vendor_id, 1234);
    }
}
