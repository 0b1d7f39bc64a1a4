//! Process-wide ownership of the USB-HID library.
//!
//! hidapi initializes its C library lazily and never tears it down, so the
//! init-on-open/teardown-on-close lifetime lives here instead: only one bridge
//! may hold the subsystem at a time. A [`Lease`] marks it taken and gives it
//! back exactly once when dropped.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

static HELD: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub struct Lease {
    _private: (),
}

impl Lease {
    pub fn acquire() -> Result<Self> {
        HELD.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SubsystemBusy)?;
        log::debug!("USB-HID subsystem acquired");
        Ok(Self { _private: () })
    }

    pub fn is_held() -> bool {
        HELD.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        HELD.store(false, Ordering::Release);
        log::debug!("USB-HID subsystem released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in the crate that touches the global lease.
    #[test]
    fn single_instance() {
        let lease = Lease::acquire().unwrap();
        assert!(Lease::is_held());
        assert!(matches!(Lease::acquire(), Err(Error::SubsystemBusy)));
        drop(lease);
        assert!(!Lease::is_held());

        let again = Lease::acquire().unwrap();
        drop(again);
    }
}
