//! Simulated focuser.

use async_trait::async_trait;
use ccd_core::capability::Focuser;
use ccd_core::error::{DriverError, DriverResult};
use parking_lot::Mutex;

const TRAVEL: i32 = 50_000;

struct Inner {
    selected: bool,
    position: i32,
}

/// Absolute-positioning focuser with a fixed travel range.
pub struct MockFocuser {
    inner: Mutex<Inner>,
}

impl MockFocuser {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                selected: false,
                position: 0,
            }),
        }
    }
}

impl Default for MockFocuser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Focuser for MockFocuser {
    async fn probe(&self) -> DriverResult<u32> {
        Ok(1)
    }

    async fn device_name(&self, index: u32) -> DriverResult<String> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        Ok("Mock Focuser".to_string())
    }

    async fn select(&self, index: u32) -> DriverResult<()> {
        if index != 0 {
            return Err(DriverError::NoDevice);
        }
        self.inner.lock().selected = true;
        Ok(())
    }

    async fn set_position(&self, steps: i32) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        if !(0..=TRAVEL).contains(&steps) {
            return Err(DriverError::invalid(format!(
                "position {steps} outside 0..{TRAVEL}"
            )));
        }
        inner.position = steps;
        Ok(())
    }

    async fn home(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        inner.position = 0;
        Ok(())
    }

    async fn position(&self) -> DriverResult<i32> {
        let inner = self.inner.lock();
        if !inner.selected {
            return Err(DriverError::NotConnected);
        }
        Ok(inner.position)
    }
}
