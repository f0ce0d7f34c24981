//! Backlight driver access: locked read/modify/write of the status word.
//!
//! [`BacklightDriver`] is the single owner of the PM driver on this machine:
//! construction claims [`DRIVER_INSTANCE_NAME`] through an [`InstanceLock`]
//! and fails with `AlreadyRunning` if anyone else holds it. Within the
//! process, every request sequence runs under one internal lock so a
//! read/modify/write can never interleave with another caller's.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::{PmDevice, platform_device};
use crate::error::{BacklightError, Result};
use crate::events::BacklightEvents;
use crate::guard::{InstanceGuard, InstanceLock, SystemLock};
use crate::protocol::{DRIVER_INSTANCE_NAME, IOCTL_QUERY_STATUS, IOCTL_SET_STATUS, StatusWord};

pub struct BacklightDriver {
    device: Box<dyn PmDevice>,
    io_lock: Mutex<()>,
    limit: u8,
    state: AtomicU8,
    events: BacklightEvents,
    _instance: InstanceGuard,
}

impl BacklightDriver {
    /// Open the platform PM driver with machine-wide exclusivity.
    pub fn open() -> Result<Self> {
        Self::open_with(Box::new(platform_device()), &SystemLock)
    }

    /// Open with an explicit device and lock.
    ///
    /// Claims the driver name, then queries the current level and the level
    /// limit. Any failure aborts construction and releases the name.
    pub fn open_with(device: Box<dyn PmDevice>, lock: &dyn InstanceLock) -> Result<Self> {
        let instance = lock.acquire(DRIVER_INSTANCE_NAME)?;
        let mut driver = BacklightDriver {
            device,
            io_lock: Mutex::new(()),
            limit: 0,
            state: AtomicU8::new(0),
            events: BacklightEvents::default(),
            _instance: instance,
        };
        let level = driver.query_locked()?.level;
        driver.limit = driver.query_locked()?.limit;
        let level = driver.clamp(i32::from(level));
        driver.state.store(level, Ordering::SeqCst);
        log::debug!("backlight opened: level {level}, limit {}", driver.limit);
        Ok(driver)
    }

    fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Query and decode; caller holds the I/O lock.
    fn query(&self) -> Result<StatusWord> {
        let raw = self.device.control(IOCTL_QUERY_STATUS, 0)?;
        let status = StatusWord::decode(raw);
        if !status.ready {
            return Err(BacklightError::HardwareNotReady(raw));
        }
        Ok(status)
    }

    fn query_locked(&self) -> Result<StatusWord> {
        let _io = self.lock_io();
        self.query()
    }

    /// Read and decode the full status word. `level` is clamped to the
    /// limit; `raw` is left as the driver reported it.
    pub fn read_word(&self) -> Result<StatusWord> {
        let mut word = self.query_locked()?;
        word.level = self.clamp(i32::from(word.level));
        Ok(word)
    }

    /// Current hardware level, clamped to `0..=limit`.
    pub fn read_status(&self) -> Result<u8> {
        Ok(self.read_word()?.level)
    }

    /// Level limit as reported by the hardware.
    pub fn read_limit(&self) -> Result<u8> {
        Ok(self.query_locked()?.limit)
    }

    /// Read-modify-write `level`, verifying the driver echoes the payload.
    pub fn try_write_level(&self, level: u8) -> Result<()> {
        let _io = self.lock_io();
        let status = self.query()?;
        let payload = status.encode_write(level);
        let echoed = self.device.control(IOCTL_SET_STATUS, payload)?;
        if echoed != payload {
            return Err(BacklightError::DriverAccess(format!(
                "set 0x{payload:08X}: driver echoed 0x{echoed:08X}"
            )));
        }
        Ok(())
    }

    /// Like [`try_write_level`](Self::try_write_level) but reports failure
    /// as `false` instead of an error.
    pub fn write_level(&self, level: u8) -> bool {
        match self.try_write_level(level) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("backlight write failed: {e}");
                false
            }
        }
    }

    /// Clamp `level` into `0..=limit`.
    pub fn clamp(&self, level: i32) -> u8 {
        level.clamp(0, i32::from(self.limit)) as u8
    }

    /// Maximum supported level, queried once at construction.
    pub fn limit(&self) -> u8 {
        self.limit
    }

    /// Last level observed by [`read_state`](Self::read_state) or written by
    /// [`change_state`](Self::change_state).
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    /// Query the hardware level, clamped, and remember it.
    pub fn read_state(&self) -> Result<u8> {
        let level = self.read_status()?;
        self.state.store(level, Ordering::SeqCst);
        Ok(level)
    }

    /// Write a new level (clamped). On failure an exception notification is
    /// raised and `false` returned; nothing is propagated to the caller.
    pub fn change_state(&self, level: i32) -> bool {
        let level = self.clamp(level);
        match self.try_write_level(level) {
            Ok(()) => {
                self.state.store(level, Ordering::SeqCst);
                true
            }
            Err(e) => {
                log::warn!("could not change backlight to {level}: {e}");
                self.events.notify_exception(e);
                false
            }
        }
    }

    /// Subscriber lists for changed/exception notifications.
    pub fn events(&self) -> &BacklightEvents {
        &self.events
    }
}

impl fmt::Debug for BacklightDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklightDriver")
            .field("limit", &self.limit)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
