//! The backlight: a driver plus its change monitor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::device::{PmDevice, platform_device};
use crate::driver::BacklightDriver;
use crate::error::Result;
use crate::events::BacklightEvents;
use crate::guard::{InstanceLock, SystemLock};
use crate::monitor::{BacklightMonitor, DEFAULT_MONITOR_INTERVAL};
use crate::watcher::{SourceOpener, platform_opener};

#[derive(Debug)]
pub struct Backlight {
    driver: Arc<BacklightDriver>,
    monitor: Mutex<BacklightMonitor>,
}

impl Backlight {
    /// Open the platform driver and registry source with default timing.
    pub fn open() -> Result<Self> {
        Self::open_with_interval(DEFAULT_MONITOR_INTERVAL)
    }

    pub fn open_with_interval(monitor_interval: Duration) -> Result<Self> {
        Self::with_parts(
            Box::new(platform_device()),
            &SystemLock,
            platform_opener(),
            monitor_interval,
        )
    }

    /// Assemble from explicit parts. The monitor is created stopped.
    pub fn with_parts(
        device: Box<dyn PmDevice>,
        lock: &dyn InstanceLock,
        opener: SourceOpener,
        monitor_interval: Duration,
    ) -> Result<Self> {
        let driver = Arc::new(BacklightDriver::open_with(device, lock)?);
        let monitor = BacklightMonitor::new(Arc::clone(&driver), opener, monitor_interval);
        Ok(Backlight {
            driver,
            monitor: Mutex::new(monitor),
        })
    }

    fn monitor(&self) -> MutexGuard<'_, BacklightMonitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) -> Result<()> {
        self.monitor().start()
    }

    pub fn stop(&self) {
        self.monitor().stop();
    }

    /// Start or stop change monitoring.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.start()
        } else {
            self.stop();
            Ok(())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.monitor().is_running()
    }

    pub fn driver(&self) -> &Arc<BacklightDriver> {
        &self.driver
    }

    pub fn state(&self) -> u8 {
        self.driver.state()
    }

    pub fn limit(&self) -> u8 {
        self.driver.limit()
    }

    pub fn clamp(&self, level: i32) -> u8 {
        self.driver.clamp(level)
    }

    pub fn read_state(&self) -> Result<u8> {
        self.driver.read_state()
    }

    pub fn change_state(&self, level: i32) -> bool {
        self.driver.change_state(level)
    }

    pub fn events(&self) -> &BacklightEvents {
        self.driver.events()
    }
}
