//! An in-memory MCP2221 for exercising the adapter without hardware.
//!
//! [`SimulatedChip`] answers the same HID reports as the real chip and keeps a
//! small I2C bus of targets behind it. Clones share state, so a test can keep
//! one clone for inspection while the bridge owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{BridgeConfig, MCP2221_PID, MICROCHIP_VID};
use crate::error::{Error, Result};
use crate::protocol::{command, EngineState, Report, CHUNK_LEN, REPORT_LEN, SPEED_NOT_SET};
use crate::transport::{Backend, Transport};

/// Engine code reported while a simulated transfer is in flight.
pub const BUSY: u8 = 0x42;

const IDLE: u8 = 0x00;
const ADDRESS_NAK: u8 = 0x25;
const DATA_READY: u8 = 0x55;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Opened,
    Closed,
    BusReleased,
}

#[derive(Debug, Default)]
struct Target {
    response: Vec<u8>,
    received: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct PendingWrite {
    address: u8,
    total: usize,
    data: Vec<u8>,
}

#[derive(Debug)]
struct ChipState {
    vendor_id: u16,
    product_id: u16,
    engine: u8,
    divider: u8,
    gpio: [u8; 4],
    targets: HashMap<u8, Target>,
    latency: usize,
    remaining: usize,
    pending: Option<u8>,
    stuck: bool,
    write: Option<PendingWrite>,
    read_buffer: VecDeque<u8>,
    commands: Vec<u8>,
    cancels: usize,
    lifecycle: Vec<Lifecycle>,
}

impl Default for ChipState {
    fn default() -> Self {
        Self {
            vendor_id: MICROCHIP_VID,
            product_id: MCP2221_PID,
            engine: IDLE,
            // Power-on values: 100 kHz, all pins inputs.
            divider: 117,
            gpio: [0x08; 4],
            targets: HashMap::new(),
            latency: 0,
            remaining: 0,
            pending: None,
            stuck: false,
            write: None,
            read_buffer: VecDeque::new(),
            commands: Vec::new(),
            cancels: 0,
            lifecycle: Vec::new(),
        }
    }
}

impl ChipState {
    fn busy(&self) -> bool {
        self.pending.is_some() || self.engine != IDLE
    }

    fn schedule(&mut self, outcome: u8) {
        self.engine = BUSY;
        self.pending = Some(outcome);
        self.remaining = self.latency;
    }

    fn advance(&mut self) {
        if self.stuck || self.pending.is_none() {
            return;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
        } else if let Some(outcome) = self.pending.take() {
            self.engine = outcome;
        }
    }

    fn reset_engine(&mut self) {
        self.engine = IDLE;
        self.pending = None;
        self.write = None;
        self.read_buffer.clear();
    }

    fn handle(&mut self, request: &Report) -> Report {
        self.commands.push(request[0]);
        let mut response = [0u8; REPORT_LEN];
        response[0] = request[0];

        match request[0] {
            command::STATUS => {
                if request[2] == 0x10 {
                    response[2] = if self.busy() { 0x10 } else { 0x11 };
                    self.cancels += 1;
                    self.reset_engine();
                }
                if request[3] == 0x20 {
                    if self.busy() {
                        response[3] = SPEED_NOT_SET;
                    } else {
                        response[3] = 0x20;
                        self.divider = request[4];
                    }
                }
                self.advance();
                response[8] = self.engine;
                response[14] = self.divider;
                response[22] = 1;
                response[23] = 1;
            }
            command::SET_SRAM => {
                if request[7] & 0x80 != 0 {
                    self.gpio.copy_from_slice(&request[8..12]);
                }
            }
            command::I2C_WRITE => response[1] = self.accept_write(request),
            command::I2C_READ => response[1] = self.accept_read(request),
            command::I2C_GET_DATA => {
                response[2] = self.engine;
                if self.engine == DATA_READY {
                    let count = self.read_buffer.len().min(CHUNK_LEN);
                    for (slot, byte) in response[4..4 + count].iter_mut().zip(self.read_buffer.drain(..count)) {
                        *slot = byte;
                    }
                    response[3] = count as u8;
                    if self.read_buffer.is_empty() {
                        self.engine = IDLE;
                    }
                } else {
                    response[1] = 0x41;
                    response[3] = 0x7F;
                }
            }
            _ => response[1] = 0xFF,
        }
        response
    }

    fn accept_write(&mut self, request: &Report) -> u8 {
        let total = u16::from_le_bytes([request[1], request[2]]) as usize;
        let address = request[3] >> 1;
        let mut write = match self.write.take() {
            Some(write) => write,
            None if self.busy() => return 0x01,
            None => PendingWrite {
                address,
                total,
                data: Vec::with_capacity(total),
            },
        };
        let take = (write.total - write.data.len()).min(CHUNK_LEN);
        write.data.extend_from_slice(&request[4..4 + take]);
        if write.data.len() < write.total {
            self.write = Some(write);
            return 0x00;
        }

        match self.targets.get_mut(&write.address) {
            Some(target) => {
                target.received.push(write.data);
                self.schedule(IDLE);
            }
            None => self.schedule(ADDRESS_NAK),
        }
        0x00
    }

    fn accept_read(&mut self, request: &Report) -> u8 {
        if self.busy() {
            return 0x01;
        }
        let len = u16::from_le_bytes([request[1], request[2]]) as usize;
        let address = request[3] >> 1;
        match self.targets.get(&address) {
            Some(target) => {
                self.read_buffer = target
                    .response
                    .iter()
                    .copied()
                    .chain(std::iter::repeat(0))
                    .take(len)
                    .collect();
                self.schedule(DATA_READY);
            }
            None => self.schedule(ADDRESS_NAK),
        }
        0x00
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimulatedChip {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedChip {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a target that acknowledges writes and answers reads with `response`
    /// (zero padded).
    pub fn with_target(self, address: u8, response: &[u8]) -> Self {
        self.lock().targets.insert(
            address,
            Target {
                response: response.to_vec(),
                received: Vec::new(),
            },
        );
        self
    }

    /// USB identifiers the chip enumerates with. Defaults to a stock MCP2221.
    pub fn with_ids(self, vendor_id: u16, product_id: u16) -> Self {
        let mut state = self.lock();
        state.vendor_id = vendor_id;
        state.product_id = product_id;
        drop(state);
        self
    }

    fn matches(&self, config: &BridgeConfig) -> bool {
        let state = self.lock();
        state.vendor_id == config.vendor_id && state.product_id == config.product_id
    }

    /// Starts the engine in an arbitrary state, as if a previous user left it there.
    pub fn with_engine_state(self, code: u8) -> Self {
        self.lock().engine = code;
        self
    }

    /// Number of status polls a transfer stays busy before completing.
    pub fn with_latency(self, polls: usize) -> Self {
        self.lock().latency = polls;
        self
    }

    /// Transfers never complete until cancelled.
    pub fn stuck(self) -> Self {
        self.lock().stuck = true;
        self
    }

    pub fn engine_state(&self) -> EngineState {
        EngineState::from(self.lock().engine)
    }

    pub fn divider(&self) -> u8 {
        self.lock().divider
    }

    pub fn gpio(&self) -> [u8; 4] {
        self.lock().gpio
    }

    /// Payloads written to `address`, one entry per completed write.
    pub fn received(&self, address: u8) -> Vec<Vec<u8>> {
        self.lock()
            .targets
            .get(&address)
            .map(|target| target.received.clone())
            .unwrap_or_default()
    }

    /// Command codes of every report the chip has answered.
    pub fn commands(&self) -> Vec<u8> {
        self.lock().commands.clone()
    }

    pub fn cancels(&self) -> usize {
        self.lock().cancels
    }

    pub fn lifecycle(&self) -> Vec<Lifecycle> {
        self.lock().lifecycle.clone()
    }
}

/// An open handle to a [`SimulatedChip`].
#[derive(Debug)]
pub struct SimulatedDevice {
    chip: SimulatedChip,
}

impl Transport for SimulatedDevice {
    fn exchange(&mut self, request: &Report) -> Result<Report> {
        Ok(self.chip.lock().handle(request))
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.chip.lock().lifecycle.push(Lifecycle::Closed);
    }
}

/// A USB bus with zero or more simulated bridges attached.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    chips: Vec<SimulatedChip>,
}

impl SimulatedBus {
    pub fn new(chips: impl IntoIterator<Item = SimulatedChip>) -> Self {
        Self {
            chips: chips.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl Backend for SimulatedBus {
    type Device = SimulatedDevice;

    fn count(&mut self, config: &BridgeConfig) -> Result<usize> {
        Ok(self.chips.iter().filter(|chip| chip.matches(config)).count())
    }

    fn open_first(&mut self, config: &BridgeConfig) -> Result<SimulatedDevice> {
        let chip = self.chips.iter().find(|chip| chip.matches(config)).cloned().ok_or(Error::DeviceNotFound {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
        })?;
        chip.lock().lifecycle.push(Lifecycle::Opened);
        Ok(SimulatedDevice { chip })
    }
}

impl Drop for SimulatedBus {
    fn drop(&mut self) {
        for chip in &self.chips {
            chip.lock().lifecycle.push(Lifecycle::BusReleased);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{get_data_request, read_request, status_request, write_request};

    #[test]
    fn write_completes_after_latency() {
        let chip = SimulatedChip::new().with_target(0x50, &[]).with_latency(2);
        let mut device = SimulatedDevice { chip: chip.clone() };

        let response = device.exchange(&write_request(0x50, 1, &[0xAA])).unwrap();
        assert_eq!(response[1], 0x00);

        let states: Vec<u8> = (0..3)
            .map(|_| device.exchange(&status_request(false, None)).unwrap()[8])
            .collect();
        assert_eq!(states, [BUSY, BUSY, IDLE]);
        assert_eq!(chip.received(0x50), vec![vec![0xAA]]);
    }

    #[test]
    fn latched_nak_rejects_new_transfers_until_cancel() {
        let chip = SimulatedChip::new();
        let mut device = SimulatedDevice { chip: chip.clone() };

        device.exchange(&write_request(0x10, 1, &[0])).unwrap();
        assert_eq!(device.exchange(&status_request(false, None)).unwrap()[8], ADDRESS_NAK);
        assert_eq!(device.exchange(&read_request(0x10, 1)).unwrap()[1], 0x01);

        let response = device.exchange(&status_request(true, None)).unwrap();
        assert_eq!(response[2], 0x10);
        assert_eq!(response[8], IDLE);
        assert_eq!(chip.cancels(), 1);
    }

    #[test]
    fn get_data_without_a_read_is_an_error() {
        let mut device = SimulatedDevice {
            chip: SimulatedChip::new(),
        };
        let response = device.exchange(&get_data_request()).unwrap();
        assert_eq!(&response[1..4], &[0x41, 0x00, 0x7F]);
    }
}
