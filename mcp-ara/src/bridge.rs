use std::time::Instant;

use embedded_hal::blocking::i2c;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::{self, command, EngineState, StatusReport, TransferStatus, CHUNK_LEN, MAX_TRANSFER};
use crate::transport::{Backend, HidBackend, Transport};

/// An open MCP2221 with its GPIO and I2C clock configured.
///
/// Dropping the bridge (or calling [`Bridge::close`]) releases the device and
/// then the backend's USB state.
pub struct Bridge<B: Backend = HidBackend> {
    // Field order is drop order: the device goes before its backend.
    device: B::Device,
    backend: B,
    config: BridgeConfig,
}

impl Bridge<HidBackend> {
    /// Opens the first attached MCP2221 matching `config`.
    pub fn open(config: BridgeConfig) -> Result<Self> {
        Self::open_with(HidBackend::new()?, config)
    }
}

impl<B: Backend> Bridge<B> {
    pub fn open_with(mut backend: B, config: BridgeConfig) -> Result<Self> {
        let found = backend.count(&config)?;
        if found == 0 {
            return Err(Error::DeviceNotFound {
                vendor_id: config.vendor_id,
                product_id: config.product_id,
            });
        }
        log::debug!("found {found} bridge(s), opening the first");

        let device = backend.open_first(&config)?;
        let mut bridge = Self {
            device,
            backend,
            config,
        };
        bridge.configure()?;
        Ok(bridge)
    }

    fn configure(&mut self) -> Result<()> {
        let pins = self.config.gpio_settings();
        let response = self.device.exchange(&protocol::set_gpio_request(pins))?;
        protocol::expect_accepted(command::SET_SRAM, &response)?;
        log::debug!("GP0-3 set to {pins:02x?}");

        let status = self.status()?;
        if status.state != EngineState::Idle {
            log::warn!("I2C engine left in {:?}, cancelling", status.state);
            self.cancel()?;
        }

        let divider = protocol::divider_byte(self.config.clock_divider);
        if u16::from(divider) + 3 != self.config.clock_divider {
            log::warn!(
                "clock divider {} out of range, using {}",
                self.config.clock_divider,
                u16::from(divider) + 3
            );
        }
        let response = self.device.exchange(&protocol::status_request(false, Some(divider)))?;
        let status = StatusReport::parse(&response)?;
        if status.speed_code == protocol::SPEED_NOT_SET {
            return Err(Error::CommandRejected {
                command: command::STATUS,
                code: status.speed_code,
            });
        }
        log::debug!("I2C clock set to {} Hz", protocol::bus_clock_hz(divider));
        Ok(())
    }

    /// Releases the device, then the backend.
    pub fn close(self) {
        let Self { device, backend, .. } = self;
        drop(device);
        drop(backend);
        log::debug!("bridge closed");
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn status(&mut self) -> Result<StatusReport> {
        let response = self.device.exchange(&protocol::status_request(false, None))?;
        StatusReport::parse(&response)
    }

    pub fn engine_state(&mut self) -> Result<EngineState> {
        Ok(self.status()?.state)
    }

    /// Aborts the current transfer and waits for the engine to go idle.
    pub fn cancel(&mut self) -> Result<()> {
        let response = self.device.exchange(&protocol::status_request(true, None))?;
        let status = StatusReport::parse(&response)?;
        if status.state == EngineState::Idle {
            return Ok(());
        }
        let deadline = self.deadline();
        self.poll_until(deadline, |status| status.state == EngineState::Idle)?;
        Ok(())
    }

    /// Writes `data` to `address` and waits for the engine to finish.
    pub fn i2c_write(&mut self, address: u8, data: &[u8]) -> Result<()> {
        validate(address, data.len())?;
        log::debug!("write {} byte(s) to {address:#04x}", data.len());
        let result = self.write_transfer(address, data);
        self.settle(result)
    }

    fn write_transfer(&mut self, address: u8, data: &[u8]) -> Result<()> {
        let deadline = self.deadline();
        let total = data.len() as u16;
        for chunk in data.chunks(CHUNK_LEN) {
            self.submit(&protocol::write_request(address, total, chunk), deadline)?;
        }

        let status = self.poll_until(deadline, |status| {
            status.state == EngineState::Idle || status.transfer_status() != TransferStatus::Ok
        })?;
        match status.transfer_status() {
            TransferStatus::Ok => Ok(()),
            TransferStatus::Nak => Err(Error::Nak { address }),
            _ => Err(Error::Engine {
                state: status.state.code(),
            }),
        }
    }

    /// Reads `buffer.len()` bytes from `address`. The buffer is only written
    /// once the whole transfer has succeeded.
    pub fn i2c_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        validate(address, buffer.len())?;
        log::debug!("read {} byte(s) from {address:#04x}", buffer.len());
        let result = self.read_transfer(address, buffer.len());
        let staged = self.settle(result)?;
        buffer.copy_from_slice(&staged);
        Ok(())
    }

    fn read_transfer(&mut self, address: u8, len: usize) -> Result<Vec<u8>> {
        let deadline = self.deadline();
        self.submit(&protocol::read_request(address, len as u16), deadline)?;

        let mut staged = Vec::with_capacity(len);
        while staged.len() < len {
            let status = self.poll_until(deadline, |status| {
                matches!(
                    status.state,
                    EngineState::DataReady
                        | EngineState::PartialData
                        | EngineState::AddressNotFound
                        | EngineState::Timeout(_)
                        | EngineState::ReadError
                )
            })?;
            match status.state {
                EngineState::DataReady | EngineState::PartialData => {}
                EngineState::AddressNotFound => return Err(Error::AddressNotFound { address }),
                state => return Err(Error::Engine { state: state.code() }),
            }

            let response = self.device.exchange(&protocol::get_data_request())?;
            let bytes = protocol::parse_data(&response)?;
            if bytes.is_empty() {
                self.tick(deadline)?;
                continue;
            }
            let wanted = (len - staged.len()).min(bytes.len());
            staged.extend_from_slice(&bytes[..wanted]);
        }
        Ok(staged)
    }

    /// Sends a transfer command, resending it while the chip says it is busy.
    fn submit(&mut self, request: &protocol::Report, deadline: Instant) -> Result<()> {
        loop {
            let response = self.device.exchange(request)?;
            match protocol::expect_accepted(request[0], &response) {
                Err(Error::CommandRejected { .. }) => {
                    let status = self.status()?;
                    if status.transfer_status() != TransferStatus::Ok {
                        return Err(Error::Engine {
                            state: status.state.code(),
                        });
                    }
                    self.tick(deadline)?;
                }
                other => return other,
            }
        }
    }

    fn poll_until(
        &mut self,
        deadline: Instant,
        done: impl Fn(&StatusReport) -> bool,
    ) -> Result<StatusReport> {
        loop {
            let status = self.status()?;
            log::trace!("engine {:?}", status.state);
            if done(&status) {
                return Ok(status);
            }
            self.tick(deadline)?;
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeout()
    }

    fn tick(&self, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(self.config.timeout()));
        }
        let interval = self.config.poll_interval();
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
        Ok(())
    }

    /// Returns `result` unchanged, cancelling first if it left the engine latched.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            log::debug!("transfer failed: {e}");
            if self.config.cancel_after_error && leaves_engine_latched(e) {
                if let Err(cancel) = self.cancel() {
                    log::warn!("could not cancel I2C engine: {cancel}");
                }
            }
        }
        result
    }
}

fn validate(address: u8, len: usize) -> Result<()> {
    if address > 0x7F {
        return Err(Error::InvalidAddress(address));
    }
    if len == 0 || len > MAX_TRANSFER {
        return Err(Error::InvalidLength(len));
    }
    Ok(())
}

fn leaves_engine_latched(error: &Error) -> bool {
    matches!(
        error,
        Error::Nak { .. }
            | Error::AddressNotFound { .. }
            | Error::Engine { .. }
            | Error::Timeout(_)
            | Error::CommandRejected { .. }
    )
}

impl<B: Backend> i2c::Write for Bridge<B> {
    type Error = Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        self.i2c_write(address, bytes)
    }
}

impl<B: Backend> i2c::Read for Bridge<B> {
    type Error = Error;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        self.i2c_read(address, buffer)
    }
}

/// A plain write followed by a separate read. The chip's repeated-start
/// variants are not used.
impl<B: Backend> i2c::WriteRead for Bridge<B> {
    type Error = Error;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.i2c_write(address, bytes)?;
        self.i2c_read(address, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(validate(0x7F, 1).is_ok());
        assert!(matches!(validate(0x80, 1), Err(Error::InvalidAddress(0x80))));
        assert!(matches!(validate(0x50, 0), Err(Error::InvalidLength(0))));
        assert!(matches!(validate(0x50, MAX_TRANSFER + 1), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn latched_errors() {
        assert!(leaves_engine_latched(&Error::Nak { address: 0x50 }));
        assert!(leaves_engine_latched(&Error::Timeout(std::time::Duration::ZERO)));
        assert!(!leaves_engine_latched(&Error::InvalidLength(0)));
        assert!(!leaves_engine_latched(&Error::SubsystemBusy));
    }
}
