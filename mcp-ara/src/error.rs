use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no MCP2221 found (VID {vendor_id:#06x}, PID {product_id:#06x})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("the USB-HID subsystem is already held by another bridge")]
    SubsystemBusy,

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// The device answered with a report for a different command, or a short one.
    #[error("unexpected response to command {command:#04x} (got {received:#04x})")]
    UnexpectedResponse { command: u8, received: u8 },

    /// The device refused a command, usually because the engine was busy.
    #[error("command {command:#04x} rejected with code {code:#04x}")]
    CommandRejected { command: u8, code: u8 },

    #[error("{0:#04x} is not a 7-bit I2C address")]
    InvalidAddress(u8),

    #[error("invalid transfer length {0}")]
    InvalidLength(usize),

    #[error("I2C write to {address:#04x} was not acknowledged")]
    Nak { address: u8 },

    #[error("no I2C device answered at {address:#04x}")]
    AddressNotFound { address: u8 },

    #[error("I2C engine reported error state {state:#04x}")]
    Engine { state: u8 },

    #[error("I2C engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}
