//! C entry points with the legacy calling convention: a null handle when open
//! fails, and 0 / -1 from the transfer calls.

use std::ffi::c_int;
use std::ptr;

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use crate::error::{Error, Result};
use crate::transport::{Backend, HidBackend};

pub type AraHandle = Bridge<HidBackend>;

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            log::debug!("{e}");
            -1
        }
    }
}

/// Opens the first MCP2221 and applies the configuration from
/// `./mcp-ara.json` (or the defaults). Returns null if no bridge is usable.
#[no_mangle]
pub extern "C" fn mcp_ara_open() -> *mut AraHandle {
    let config = BridgeConfig::load_or_default(DEFAULT_CONFIG_PATH);
    match Bridge::open(config) {
        Ok(bridge) => Box::into_raw(Box::new(bridge)),
        Err(e) => {
            log::error!("could not open MCP2221: {e}");
            ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `handle` must come from [`mcp_ara_open`] and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn mcp_ara_close(handle: *mut AraHandle) {
    close(handle)
}

/// # Safety
///
/// `handle` must be live and `data` must point to `length` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn mcp_ara_i2c_write(
    handle: *mut AraHandle,
    addr: u8,
    data: *const u8,
    length: c_int,
) -> c_int {
    i2c_write(handle, addr, data, length)
}

/// # Safety
///
/// `handle` must be live and `data` must point to `length` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn mcp_ara_i2c_read(
    handle: *mut AraHandle,
    addr: u8,
    data: *mut u8,
    length: c_int,
) -> c_int {
    i2c_read(handle, addr, data, length)
}

// The entry points above, for any backend.

unsafe fn close<B: Backend>(handle: *mut Bridge<B>) {
    if handle.is_null() {
        return;
    }
    Box::from_raw(handle).close();
}

unsafe fn i2c_write<B: Backend>(
    handle: *mut Bridge<B>,
    addr: u8,
    data: *const u8,
    length: c_int,
) -> c_int {
    let Some(bridge) = handle.as_mut() else {
        return -1;
    };
    if data.is_null() || length <= 0 {
        return -1;
    }
    let data = std::slice::from_raw_parts(data, length as usize);
    status(bridge.i2c_write(addr, data))
}

unsafe fn i2c_read<B: Backend>(
    handle: *mut Bridge<B>,
    addr: u8,
    data: *mut u8,
    length: c_int,
) -> c_int {
    let Some(bridge) = handle.as_mut() else {
        return -1;
    };
    if data.is_null() || length <= 0 {
        return -1;
    }
    let buffer = std::slice::from_raw_parts_mut(data, length as usize);
    status(bridge.i2c_read(addr, buffer))
}

/// Placeholder for the legacy control library's vendor request
/// (`bmRequestType`, `bRequest`, `wValue` = I2C address, `wIndex`, data,
/// `wLength`). Nothing is sent; always returns -1.
#[no_mangle]
pub extern "C" fn send_vendor_request(
    _request_type: u8,
    _request: u8,
    _value: u16,
    _index: u16,
    _data: *mut u8,
    _length: u16,
) -> c_int {
    status(Err(Error::Unsupported("vendor requests")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Lifecycle, SimulatedBus, SimulatedChip};

    fn boxed(chip: &SimulatedChip) -> *mut Bridge<SimulatedBus> {
        let bridge = Bridge::open_with(SimulatedBus::new([chip.clone()]), BridgeConfig::default()).unwrap();
        Box::into_raw(Box::new(bridge))
    }

    #[test]
    fn transfers_map_to_return_codes() {
        let chip = SimulatedChip::new().with_target(0x50, &[0xAB, 0xCD]);
        let handle = boxed(&chip);
        let data = [0x01, 0x02];
        let mut buffer = [0u8; 2];
        unsafe {
            assert_eq!(i2c_write(handle, 0x50, data.as_ptr(), 2), 0);
            assert_eq!(i2c_read(handle, 0x50, buffer.as_mut_ptr(), 2), 0);
            assert_eq!(buffer, [0xAB, 0xCD]);
            assert_eq!(i2c_write(handle, 0x50, data.as_ptr(), 0), -1);
            close(handle);
        }
        assert_eq!(chip.received(0x50), vec![vec![0x01, 0x02]]);
        assert_eq!(
            chip.lifecycle(),
            [Lifecycle::Opened, Lifecycle::Closed, Lifecycle::BusReleased]
        );
    }

    #[test]
    fn nak_and_missing_address_return_minus_one() {
        let chip = SimulatedChip::new();
        let handle = boxed(&chip);
        let data = [0xFF];
        let mut buffer = [0x5A; 2];
        unsafe {
            assert_eq!(i2c_write(handle, 0x7F, data.as_ptr(), 1), -1);
            // The NAK is still latched; clear it before the read.
            (*handle).cancel().unwrap();
            assert_eq!(i2c_read(handle, 0x20, buffer.as_mut_ptr(), 2), -1);
            close(handle);
        }
        assert_eq!(buffer, [0x5A; 2]);
    }

    #[test]
    fn null_handles_are_rejected() {
        let mut buffer = [0u8; 2];
        unsafe {
            assert_eq!(mcp_ara_i2c_write(ptr::null_mut(), 0x50, buffer.as_ptr(), 2), -1);
            assert_eq!(mcp_ara_i2c_read(ptr::null_mut(), 0x50, buffer.as_mut_ptr(), 2), -1);
            mcp_ara_close(ptr::null_mut());
        }
    }

    #[test]
    fn vendor_request_is_a_stub() {
        let mut data = [0u8; 4];
        assert_eq!(send_vendor_request(0x40, 0x01, 0x50, 0, data.as_mut_ptr(), 4), -1);
        assert_eq!(data, [0; 4]);
    }
}
