//! MCP2221 HID report layout.
//!
//! Every exchange with the chip is one 64-byte output report answered by one
//! 64-byte input report whose first byte echoes the command code.

use crate::error::{Error, Result};

pub const REPORT_LEN: usize = 64;

pub type Report = [u8; REPORT_LEN];

/// Payload bytes carried by a single I2C write or get-data report.
pub const CHUNK_LEN: usize = 60;

/// Largest transfer the chip's 16-bit length field can describe.
pub const MAX_TRANSFER: usize = u16::MAX as usize;

pub const SYSTEM_CLOCK_HZ: u32 = 12_000_000;

pub mod command {
    pub const STATUS: u8 = 0x10;
    pub const I2C_GET_DATA: u8 = 0x40;
    pub const SET_SRAM: u8 = 0x60;
    pub const I2C_WRITE: u8 = 0x90;
    pub const I2C_READ: u8 = 0x91;
}

const CANCEL_TRANSFER: u8 = 0x10;
const SET_SPEED: u8 = 0x20;
const ALTER_GP: u8 = 0x80;

// Offsets into the status/set-parameters response.
const STATUS_CANCEL: usize = 2;
const STATUS_SPEED: usize = 3;
const STATUS_ENGINE: usize = 8;
const STATUS_REQUESTED: usize = 9;
const STATUS_TRANSFERRED: usize = 11;
const STATUS_DIVIDER: usize = 14;
const STATUS_SCL: usize = 22;
const STATUS_SDA: usize = 23;

/// Speed status byte when a transfer in progress kept the divider from loading.
pub const SPEED_NOT_SET: u8 = 0x21;

const DATA_ERROR: u8 = 0x41;
const DATA_COUNT_ERROR: u8 = 0x7F;

/// State of the chip's internal I2C engine, as reported in status responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// A chunk of a long read is buffered, more will follow.
    PartialData,
    DataReady,
    AddressNotFound,
    /// The engine gave up waiting on the bus; carries the raw code.
    Timeout(u8),
    ReadError,
    /// Mid-transaction, or a code with no special meaning to the adapter.
    Busy(u8),
}

impl From<u8> for EngineState {
    fn from(code: u8) -> Self {
        match code {
            0x00 => EngineState::Idle,
            0x25 => EngineState::AddressNotFound,
            0x54 => EngineState::PartialData,
            0x55 => EngineState::DataReady,
            0x7F => EngineState::ReadError,
            0x12 | 0x23 | 0x44 | 0x62 => EngineState::Timeout(code),
            other => EngineState::Busy(other),
        }
    }
}

impl EngineState {
    pub fn code(self) -> u8 {
        match self {
            EngineState::Idle => 0x00,
            EngineState::AddressNotFound => 0x25,
            EngineState::PartialData => 0x54,
            EngineState::DataReady => 0x55,
            EngineState::ReadError => 0x7F,
            EngineState::Timeout(code) | EngineState::Busy(code) => code,
        }
    }

    pub fn status(self) -> TransferStatus {
        match self {
            EngineState::AddressNotFound => TransferStatus::Nak,
            EngineState::Timeout(_) => TransferStatus::Timeout,
            EngineState::ReadError => TransferStatus::Error,
            _ => TransferStatus::Ok,
        }
    }
}

/// Whether the current transaction has latched an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    Nak,
    Timeout,
    Error,
}

/// Decoded answer to [`command::STATUS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub state: EngineState,
    pub cancel_code: u8,
    pub speed_code: u8,
    pub divider: u8,
    pub requested: u16,
    pub transferred: u16,
    pub scl_high: bool,
    pub sda_high: bool,
}

impl StatusReport {
    pub fn parse(report: &Report) -> Result<Self> {
        expect_echo(command::STATUS, report)?;
        Ok(Self {
            state: EngineState::from(report[STATUS_ENGINE]),
            cancel_code: report[STATUS_CANCEL],
            speed_code: report[STATUS_SPEED],
            divider: report[STATUS_DIVIDER],
            requested: u16::from_le_bytes([report[STATUS_REQUESTED], report[STATUS_REQUESTED + 1]]),
            transferred: u16::from_le_bytes([
                report[STATUS_TRANSFERRED],
                report[STATUS_TRANSFERRED + 1],
            ]),
            scl_high: report[STATUS_SCL] != 0,
            sda_high: report[STATUS_SDA] != 0,
        })
    }

    pub fn transfer_status(&self) -> TransferStatus {
        self.state.status()
    }
}

fn request(code: u8) -> Report {
    let mut report = [0u8; REPORT_LEN];
    report[0] = code;
    report
}

/// Status poll, optionally cancelling the current transfer and/or loading a
/// new clock divider.
pub fn status_request(cancel: bool, divider: Option<u8>) -> Report {
    let mut report = request(command::STATUS);
    if cancel {
        report[2] = CANCEL_TRANSFER;
    }
    if let Some(divider) = divider {
        report[3] = SET_SPEED;
        report[4] = divider;
    }
    report
}

/// SRAM update that only touches the GP pin designations (bytes 8..12).
pub fn set_gpio_request(pins: [u8; 4]) -> Report {
    let mut report = request(command::SET_SRAM);
    report[7] = ALTER_GP;
    report[8..12].copy_from_slice(&pins);
    report
}

/// Encodes one GP pin setting: bit 4 output value, bit 3 direction (1 = input),
/// bits 2..0 designation.
pub fn gp_setting(designation: u8, input: bool, high: bool) -> u8 {
    (u8::from(high) << 4) | (u8::from(input) << 3) | (designation & 0x07)
}

pub fn write_request(address: u8, total_len: u16, chunk: &[u8]) -> Report {
    debug_assert!(chunk.len() <= CHUNK_LEN);
    let mut report = request(command::I2C_WRITE);
    report[1..3].copy_from_slice(&total_len.to_le_bytes());
    report[3] = address << 1;
    report[4..4 + chunk.len()].copy_from_slice(chunk);
    report
}

pub fn read_request(address: u8, len: u16) -> Report {
    let mut report = request(command::I2C_READ);
    report[1..3].copy_from_slice(&len.to_le_bytes());
    report[3] = (address << 1) | 1;
    report
}

pub fn get_data_request() -> Report {
    request(command::I2C_GET_DATA)
}

/// Converts a 12 MHz system clock divisor into the chip's one-byte field,
/// which holds `divider - 3`. Out of range values clamp to the nearest
/// encodable divisor.
pub fn divider_byte(divider: u16) -> u8 {
    divider.saturating_sub(3).clamp(1, u8::MAX as u16) as u8
}

/// Bus clock produced by a divider byte.
pub fn bus_clock_hz(byte: u8) -> u32 {
    SYSTEM_CLOCK_HZ / (u32::from(byte) + 3)
}

pub fn expect_echo(command: u8, report: &Report) -> Result<()> {
    if report[0] != command {
        return Err(Error::UnexpectedResponse {
            command,
            received: report[0],
        });
    }
    Ok(())
}

/// Checks the accepted/busy byte of an I2C write or read command response.
pub fn expect_accepted(command: u8, report: &Report) -> Result<()> {
    expect_echo(command, report)?;
    match report[1] {
        0 => Ok(()),
        code => Err(Error::CommandRejected { command, code }),
    }
}

/// Extracts the payload of a get-data response.
pub fn parse_data(report: &Report) -> Result<&[u8]> {
    expect_echo(command::I2C_GET_DATA, report)?;
    let count = report[3];
    if report[1] == DATA_ERROR || count == DATA_COUNT_ERROR || count as usize > CHUNK_LEN {
        return Err(Error::Engine { state: report[2] });
    }
    Ok(&report[4..4 + count as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_codes() {
        assert_eq!(EngineState::from(0x00), EngineState::Idle);
        assert_eq!(EngineState::from(0x25), EngineState::AddressNotFound);
        assert_eq!(EngineState::from(0x55), EngineState::DataReady);
        assert_eq!(EngineState::from(0x44), EngineState::Timeout(0x44));
        assert_eq!(EngineState::from(0x42), EngineState::Busy(0x42));
        for code in [0x00, 0x12, 0x25, 0x42, 0x54, 0x55, 0x7F] {
            assert_eq!(EngineState::from(code).code(), code);
        }
    }

    #[test]
    fn engine_status() {
        assert_eq!(EngineState::Busy(0x42).status(), TransferStatus::Ok);
        assert_eq!(EngineState::AddressNotFound.status(), TransferStatus::Nak);
        assert_eq!(EngineState::Timeout(0x62).status(), TransferStatus::Timeout);
        assert_eq!(EngineState::ReadError.status(), TransferStatus::Error);
    }

    #[test]
    fn divider_encoding() {
        assert_eq!(divider_byte(120), 117);
        assert_eq!(divider_byte(30), 27);
        // The default divisor is slower than the field can express.
        assert_eq!(divider_byte(260), 255);
        assert_eq!(divider_byte(0), 1);
        assert_eq!(bus_clock_hz(117), 100_000);
    }

    #[test]
    fn status_request_layout() {
        let report = status_request(true, Some(117));
        assert_eq!(&report[..5], &[0x10, 0x00, 0x10, 0x20, 117]);

        let report = status_request(false, None);
        assert!(report[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn transfer_request_layout() {
        let report = write_request(0x50, 2, &[0x01, 0x02]);
        assert_eq!(&report[..6], &[0x90, 0x02, 0x00, 0xA0, 0x01, 0x02]);

        let report = read_request(0x50, 300);
        assert_eq!(&report[..4], &[0x91, 0x2C, 0x01, 0xA1]);
    }

    #[test]
    fn gpio_request_layout() {
        let low_output = gp_setting(0, false, false);
        assert_eq!(low_output, 0);
        assert_eq!(gp_setting(0, true, true), 0x18);

        let report = set_gpio_request([low_output; 4]);
        assert_eq!(report[0], 0x60);
        assert_eq!(report[7], 0x80);
        assert_eq!(&report[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn status_parsing() {
        let mut report = [0u8; REPORT_LEN];
        report[0] = command::STATUS;
        report[8] = 0x25;
        report[9] = 0x02;
        report[14] = 117;
        report[22] = 1;
        let status = StatusReport::parse(&report).unwrap();
        assert_eq!(status.state, EngineState::AddressNotFound);
        assert_eq!(status.transfer_status(), TransferStatus::Nak);
        assert_eq!(status.requested, 2);
        assert_eq!(status.divider, 117);
        assert!(status.scl_high);
        assert!(!status.sda_high);

        report[0] = command::I2C_READ;
        assert!(matches!(
            StatusReport::parse(&report),
            Err(Error::UnexpectedResponse { command: 0x10, received: 0x91 })
        ));
    }

    #[test]
    fn data_parsing() {
        let mut report = [0u8; REPORT_LEN];
        report[0] = command::I2C_GET_DATA;
        report[2] = 0x55;
        report[3] = 3;
        report[4..7].copy_from_slice(&[7, 8, 9]);
        assert_eq!(parse_data(&report).unwrap(), &[7, 8, 9]);

        report[1] = DATA_ERROR;
        report[3] = DATA_COUNT_ERROR;
        assert!(matches!(parse_data(&report), Err(Error::Engine { state: 0x55 })));
    }

    #[test]
    fn busy_command_is_rejected() {
        let mut report = [0u8; REPORT_LEN];
        report[0] = command::I2C_WRITE;
        report[1] = 0x01;
        assert!(matches!(
            expect_accepted(command::I2C_WRITE, &report),
            Err(Error::CommandRejected { command: 0x90, code: 0x01 })
        ));
    }
}
