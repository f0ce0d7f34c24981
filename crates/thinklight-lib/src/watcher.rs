//! Hardware-change signal: the PM service's notification registry value.
//!
//! The PM service rewrites the default value of [`NOTIFY_SUBKEY`] whenever
//! hardware state changes; bit 17 flips on every backlight change. A
//! [`ChangeSource`] reads that value and arms a one-shot OS notification;
//! [`WatchToken`] remembers the last value so successive captures can be
//! compared.
//!
//! [`NOTIFY_SUBKEY`]: crate::protocol::NOTIFY_SUBKEY

use std::sync::Arc;
use std::time::Duration;

use crate::error::{BacklightError, Result};
use crate::protocol::backlight_bit_toggled;

// ── Trait ──

pub trait ChangeSource: Send {
    /// Current raw notification value.
    fn read_value(&mut self) -> Result<u32>;

    /// Register a one-shot change notification. Fails with
    /// [`BacklightError::NotificationRegistration`].
    fn arm(&mut self) -> Result<()>;

    /// Sleep up to `timeout`, returning early (`true`) if the armed
    /// notification fired.
    fn wait(&mut self, timeout: Duration) -> bool;
}

/// Opens a fresh source, or `None` when change notification is unavailable.
pub type SourceOpener = Arc<dyn Fn() -> Option<Box<dyn ChangeSource>> + Send + Sync>;

// ── Windows implementation ──

#[cfg(windows)]
mod windows_impl {
    use super::*;

    use windows::Win32::Foundation::{CloseHandle, ERROR_SUCCESS, HANDLE};
    use windows::Win32::System::Registry::{
        HKEY, REG_NOTIFY_CHANGE_LAST_SET, RegNotifyChangeKeyValue,
    };
    use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
    use windows::core::PCWSTR;
    use winreg::RegKey;
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_NOTIFY, KEY_READ};

    use crate::protocol::NOTIFY_SUBKEY;

    /// Registry-backed change source with an auto-reset event.
    pub struct RegistryChangeSource {
        key: RegKey,
        event: HANDLE,
    }

    // SAFETY: the key and event handles are owned exclusively by this value
    // and kernel handles may be used from any thread.
    unsafe impl Send for RegistryChangeSource {}

    impl RegistryChangeSource {
        pub fn open() -> Result<Self> {
            let key = RegKey::predef(HKEY_LOCAL_MACHINE)
                .open_subkey_with_flags(NOTIFY_SUBKEY, KEY_READ | KEY_NOTIFY)?;
            let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }.map_err(|e| {
                BacklightError::NotificationRegistration(format!("CreateEvent: {e}"))
            })?;
            Ok(RegistryChangeSource { key, event })
        }
    }

    impl ChangeSource for RegistryChangeSource {
        fn read_value(&mut self) -> Result<u32> {
            Ok(self.key.get_value::<u32, _>("")?)
        }

        fn arm(&mut self) -> Result<()> {
            let hkey = HKEY(self.key.raw_handle() as *mut core::ffi::c_void);
            let status = unsafe {
                RegNotifyChangeKeyValue(
                    hkey,
                    false,
                    REG_NOTIFY_CHANGE_LAST_SET,
                    Some(self.event),
                    true,
                )
            };
            if status != ERROR_SUCCESS {
                return Err(BacklightError::NotificationRegistration(format!(
                    "RegNotifyChangeKeyValue failed with code {}",
                    status.0
                )));
            }
            Ok(())
        }

        fn wait(&mut self, timeout: Duration) -> bool {
            let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
            // WAIT_OBJECT_0
            unsafe { WaitForSingleObject(self.event, ms) }.0 == 0
        }
    }

    impl Drop for RegistryChangeSource {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.event);
            }
        }
    }
}

#[cfg(windows)]
pub use windows_impl::RegistryChangeSource;

/// Open the platform change source.
///
/// Returns `None` when the notification key is absent or the platform has
/// no PM service.
pub fn open_platform_source() -> Option<Box<dyn ChangeSource>> {
    #[cfg(windows)]
    {
        match RegistryChangeSource::open() {
            Ok(source) => Some(Box::new(source)),
            Err(e) => {
                log::debug!("notification key unavailable: {e}");
                None
            }
        }
    }
    #[cfg(not(windows))]
    {
        None
    }
}

/// [`SourceOpener`] for [`open_platform_source`].
pub fn platform_opener() -> SourceOpener {
    Arc::new(open_platform_source)
}

// ── Watch token ──

/// Result of [`WatchToken::recapture`].
#[derive(Debug)]
pub struct Recapture {
    /// The backlight bit differs from the previous capture.
    pub toggled: bool,
    /// Re-arming failed; the value was still captured.
    pub arm_error: Option<BacklightError>,
}

/// Last observed notification value plus the live source.
pub struct WatchToken {
    last: u32,
    source: Box<dyn ChangeSource>,
}

impl WatchToken {
    /// Read the initial value. Does not arm.
    pub fn capture(mut source: Box<dyn ChangeSource>) -> Result<Self> {
        let last = source.read_value()?;
        Ok(WatchToken { last, source })
    }

    pub fn arm(&mut self) -> Result<()> {
        self.source.arm()
    }

    pub fn wait(&mut self, timeout: Duration) -> bool {
        self.source.wait(timeout)
    }

    /// Value seen by the most recent capture.
    pub fn last(&self) -> u32 {
        self.last
    }

    /// Read the value again, re-arm, and compare with the previous capture.
    pub fn recapture(&mut self) -> Result<Recapture> {
        let value = self.source.read_value()?;
        let toggled = backlight_bit_toggled(self.last, value);
        self.last = value;
        let arm_error = self.source.arm().err();
        Ok(Recapture { toggled, arm_error })
    }
}

impl std::fmt::Debug for WatchToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchToken")
            .field("last", &format_args!("0x{:08X}", self.last))
            .finish_non_exhaustive()
    }
}

// ── Scripted source for testing ──

#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

    use crate::protocol::NOTIFY_BACKLIGHT_BIT;

    #[derive(Debug, Default)]
    struct Script {
        value: u32,
        armed: bool,
        fired: bool,
        fail_arm: bool,
        fail_read: bool,
        arms: usize,
        reads: usize,
    }

    /// In-memory notification value. Clones share state, so a test keeps one
    /// clone to drive changes while the monitor owns another.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedSource {
        inner: Arc<(Mutex<Script>, Condvar)>,
    }

    impl ScriptedSource {
        pub fn new(value: u32) -> Self {
            let source = Self::default();
            source.lock().value = value;
            source
        }

        fn lock(&self) -> MutexGuard<'_, Script> {
            self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Replace the value, firing the notification if armed.
        pub fn set_value(&self, value: u32) {
            let mut s = self.lock();
            s.value = value;
            if s.armed {
                s.armed = false;
                s.fired = true;
                self.inner.1.notify_all();
            }
        }

        /// Flip the backlight bit, as the PM service does on a level change.
        pub fn toggle_backlight_bit(&self) {
            let value = self.value() ^ (1 << NOTIFY_BACKLIGHT_BIT);
            self.set_value(value);
        }

        pub fn value(&self) -> u32 {
            self.lock().value
        }

        pub fn set_fail_arm(&self, fail: bool) {
            self.lock().fail_arm = fail;
        }

        pub fn set_fail_read(&self, fail: bool) {
            self.lock().fail_read = fail;
        }

        /// Number of arm attempts, failed ones included.
        pub fn arm_count(&self) -> usize {
            self.lock().arms
        }

        /// Number of successful reads.
        pub fn read_count(&self) -> usize {
            self.lock().reads
        }

        /// An opener that hands out clones of this source.
        pub fn opener(&self) -> SourceOpener {
            let source = self.clone();
            Arc::new(move || Some(Box::new(source.clone()) as Box<dyn ChangeSource>))
        }

        /// An opener that reports notification as unavailable.
        pub fn unavailable() -> SourceOpener {
            Arc::new(|| None)
        }
    }

    impl ChangeSource for ScriptedSource {
        fn read_value(&mut self) -> Result<u32> {
            let mut s = self.lock();
            if s.fail_read {
                return Err(BacklightError::Io(std::io::Error::other(
                    "mock: read failure injected",
                )));
            }
            s.reads += 1;
            Ok(s.value)
        }

        fn arm(&mut self) -> Result<()> {
            let mut s = self.lock();
            s.arms += 1;
            if s.fail_arm {
                return Err(BacklightError::NotificationRegistration(
                    "RegNotifyChangeKeyValue failed with code 5".into(),
                ));
            }
            s.armed = true;
            s.fired = false;
            Ok(())
        }

        fn wait(&mut self, timeout: Duration) -> bool {
            let (lock, cvar) = &*self.inner;
            let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let (mut s, _) = cvar
                .wait_timeout_while(guard, timeout, |s| !s.fired)
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut s.fired)
        }
    }
}
