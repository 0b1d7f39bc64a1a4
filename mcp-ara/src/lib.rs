//! I2C access through a USB-attached MCP2221.
//!
//! [`Bridge`] opens the first matching chip, sets GP0-3 and the I2C clock, and
//! then offers blocking reads and writes. It also implements the
//! `embedded-hal` 0.2 blocking I2C traits. The [`ffi`] module exposes the same
//! operations to C callers with 0 / -1 return codes.
//!
//! ```no_run
//! use mcp_ara::{Bridge, BridgeConfig};
//!
//! # fn main() -> mcp_ara::Result<()> {
//! let mut bridge = Bridge::open(BridgeConfig::default())?;
//! bridge.i2c_write(0x50, &[0x01, 0x02])?;
//!
//! let mut buffer = [0u8; 2];
//! bridge.i2c_read(0x50, &mut buffer)?;
//! bridge.close();
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod error;
pub mod ffi;
pub mod mock;
pub mod protocol;
mod subsystem;
mod transport;

pub use bridge::Bridge;
pub use config::{
    BridgeConfig, Direction, PinMode, PinSetting, DEFAULT_CLOCK_DIVIDER, DEFAULT_CONFIG_PATH,
    MCP2221_PID, MICROCHIP_VID,
};
pub use error::{Error, Result};
pub use protocol::{EngineState, StatusReport, TransferStatus};
pub use subsystem::Lease;
pub use transport::{Backend, HidBackend, HidTransport, Transport};
