use std::time::Duration;

use hidapi::{HidApi, HidDevice};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::{self, Report, REPORT_LEN};
use crate::subsystem::Lease;

/// One request/response exchange with the bridge.
pub trait Transport {
    fn exchange(&mut self, request: &Report) -> Result<Report>;
}

/// Finds and opens bridges. Owns whatever global state the USB stack needs,
/// so dropping it tears that state down.
pub trait Backend {
    type Device: Transport;

    /// Number of attached bridges matching the configured VID/PID.
    fn count(&mut self, config: &BridgeConfig) -> Result<usize>;

    fn open_first(&mut self, config: &BridgeConfig) -> Result<Self::Device>;
}

/// hidapi-backed access to real hardware.
pub struct HidBackend {
    // Declared before the lease so the device list is dropped before the lease
    // is returned. The hidapi C library itself stays initialized.
    api: HidApi,
    _lease: Lease,
}

impl HidBackend {
    pub fn new() -> Result<Self> {
        let lease = Lease::acquire()?;
        let api = HidApi::new()?;
        Ok(Self { api, _lease: lease })
    }
}

impl Backend for HidBackend {
    type Device = HidTransport;

    fn count(&mut self, config: &BridgeConfig) -> Result<usize> {
        self.api.refresh_devices()?;
        Ok(self
            .api
            .device_list()
            .filter(|info| info.vendor_id() == config.vendor_id && info.product_id() == config.product_id)
            .count())
    }

    fn open_first(&mut self, config: &BridgeConfig) -> Result<HidTransport> {
        let info = self
            .api
            .device_list()
            .find(|info| info.vendor_id() == config.vendor_id && info.product_id() == config.product_id)
            .ok_or(Error::DeviceNotFound {
                vendor_id: config.vendor_id,
                product_id: config.product_id,
            })?;
        log::debug!("opening {:?}", info.path());
        let device = info.open_device(&self.api)?;
        Ok(HidTransport {
            device,
            timeout: config.timeout(),
        })
    }
}

pub struct HidTransport {
    device: HidDevice,
    timeout: Duration,
}

impl Transport for HidTransport {
    fn exchange(&mut self, request: &Report) -> Result<Report> {
        // hidapi wants the report ID in front; the MCP2221 uses ID 0.
        let mut out = [0u8; REPORT_LEN + 1];
        out[1..].copy_from_slice(request);
        self.device.write(&out)?;

        let mut response = [0u8; REPORT_LEN];
        let millis = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);
        let received = self.device.read_timeout(&mut response, millis)?;
        if received == 0 {
            return Err(Error::Timeout(self.timeout));
        }
        protocol::expect_echo(request[0], &response)?;
        Ok(response)
    }
}
