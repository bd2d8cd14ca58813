//! Simulated filter wheel.

use async_trait::async_trait;
use ccd_core::capability::FilterWheel;
use ccd_core::error::{DriverError, DriverResult};
use parking_lot::Mutex;

const SLOTS: u32 = 5;

struct Inner {
    selected: bool,
    slot: u32,
}

/// Five-slot filter wheel.
pub struct MockWheel {
    inner: Mutex<Inner>,
}

impl MockWheel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                selected: false,
                slot: 0,
            }),
        }
    }
}

impl Default for MockWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterWheel for MockWheel {
    async fn probe(&self) -> DriverResult<u32> {
        Ok(1)
    }

    async fn device_name(&self, index: u32) -> DriverResult<String> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        Ok(format!("Mock Wheel ({SLOTS} slots)"))
    }

    async fn select(&self, index: u32) -> DriverResult<()> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        self.inner.lock().selected = true;
        Ok(())
    }

    fn slot_count(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        Ok(SLOTS)
    }

    async fn set_slot(&self, slot: u32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        if slot >= SLOTS {
            return Err(DriverError::invalid(format!(
                "slot {slot} outside 0..{SLOTS}"
            )));
        }
        inner.slot = slot;
        Ok(())
    }

    async fn slot(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        Ok(inner.slot)
    }
}
