//! Device-control transport: trait + Windows backend.
//!
//! A [`PmDevice`] issues one 4-byte-in / 4-byte-out control request against
//! the power-management driver. Status decoding, locking and retries live
//! in [`crate::driver`]; this layer only moves bytes.

use std::sync::Arc;

use crate::error::{BacklightError, Result};

// ── Trait ──

pub trait PmDevice: Send + Sync {
    /// Issue a control request with a 4-byte input and return the 4-byte reply.
    fn control(&self, code: u32, input: u32) -> Result<u32>;
}

impl<T: PmDevice + ?Sized> PmDevice for Arc<T> {
    fn control(&self, code: u32, input: u32) -> Result<u32> {
        (**self).control(code, input)
    }
}

// ── Windows implementation ──

#[cfg(windows)]
mod windows_impl {
    use super::*;

    use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, OPEN_EXISTING,
    };
    use windows::Win32::System::IO::DeviceIoControl;
    use windows::core::PCWSTR;

    use crate::protocol::DEVICE_PATH;

    /// Talks to `\\.\IBMPmDrv`. A handle is opened and closed around every
    /// request so the driver is never held between calls.
    pub struct WindowsPmDevice {
        path: Vec<u16>,
    }

    impl Default for WindowsPmDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WindowsPmDevice {
        pub fn new() -> Self {
            WindowsPmDevice {
                path: DEVICE_PATH
                    .encode_utf16()
                    .chain(std::iter::once(0))
                    .collect(),
            }
        }

        fn open_handle(&self) -> Result<HANDLE> {
            unsafe {
                CreateFileW(
                    PCWSTR(self.path.as_ptr()),
                    GENERIC_READ.0,
                    FILE_SHARE_READ,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAGS_AND_ATTRIBUTES(0),
                    None,
                )
            }
            .map_err(|e| BacklightError::DriverAccess(format!("CreateFileW: {e}")))
        }
    }

    impl PmDevice for WindowsPmDevice {
        fn control(&self, code: u32, input: u32) -> Result<u32> {
            let handle = self.open_handle()?;

            let inp = input.to_le_bytes();
            let mut out = [0u8; 4];
            let mut returned: u32 = 0;
            // SAFETY: both buffers are 4 bytes and outlive the synchronous call;
            // the handle was opened without FILE_FLAG_OVERLAPPED.
            let io = unsafe {
                DeviceIoControl(
                    handle,
                    code,
                    Some(inp.as_ptr() as *const _),
                    inp.len() as u32,
                    Some(out.as_mut_ptr() as *mut _),
                    out.len() as u32,
                    Some(&mut returned),
                    None,
                )
            };
            // Close before inspecting the request result so the handle never leaks.
            let closed = unsafe { CloseHandle(handle) };

            io.map_err(|e| {
                BacklightError::DriverAccess(format!("DeviceIoControl(0x{code:08X}): {e}"))
            })?;
            closed.map_err(|e| BacklightError::DriverAccess(format!("CloseHandle: {e}")))?;

            Ok(u32::from_le_bytes(out))
        }
    }
}

#[cfg(windows)]
pub use windows_impl::WindowsPmDevice;

// ── Stub device for unsupported platforms ──

/// Placeholder device that always fails with `DriverAccess`.
/// Enables compilation and `cargo test` on hosts without the PM driver.
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct StubPmDevice;

#[cfg(not(windows))]
impl PmDevice for StubPmDevice {
    fn control(&self, code: u32, _input: u32) -> Result<u32> {
        Err(BacklightError::DriverAccess(format!(
            "control 0x{code:08X}: PM driver is not available on this platform"
        )))
    }
}

/// Concrete device type for the current platform.
#[cfg(windows)]
pub type PlatformDevice = WindowsPmDevice;
#[cfg(not(windows))]
pub type PlatformDevice = StubPmDevice;

/// Create the platform-appropriate PM device.
pub fn platform_device() -> PlatformDevice {
    PlatformDevice::default()
}

// ── Mock device for testing ──

/// Simulated PM driver for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use crate::protocol::{
        IOCTL_QUERY_STATUS, IOCTL_SET_STATUS, STATUS_LEVEL_MASK, STATUS_LIMIT_SHIFT,
        STATUS_READY_MASK,
    };

    #[derive(Debug, Default)]
    struct MockState {
        status: u32,
        writes: Vec<u32>,
        queries: usize,
        fail_query: bool,
        fail_set: bool,
        not_ready: bool,
        echo_mismatch: bool,
    }

    /// Thread-safe in-memory driver. Writes update the level nibble of the
    /// stored status word and echo the payload back, like the real driver.
    #[derive(Debug, Default)]
    pub struct MockPmDevice {
        state: Mutex<MockState>,
    }

    impl MockPmDevice {
        /// A ready driver reporting `limit` and `level`.
        pub fn new(limit: u8, level: u8) -> Self {
            let status = STATUS_READY_MASK
                | (u32::from(limit) & STATUS_LEVEL_MASK) << STATUS_LIMIT_SHIFT
                | (u32::from(level) & STATUS_LEVEL_MASK);
            Self::with_status(status)
        }

        /// A driver reporting an arbitrary raw status word.
        pub fn with_status(status: u32) -> Self {
            MockPmDevice {
                state: Mutex::new(MockState {
                    status,
                    ..Default::default()
                }),
            }
        }

        fn lock(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Current level held by the simulated hardware.
        pub fn level(&self) -> u8 {
            (self.lock().status & STATUS_LEVEL_MASK) as u8
        }

        /// Raw status word held by the simulated hardware.
        pub fn status(&self) -> u32 {
            self.lock().status
        }

        /// Change the level out of band (e.g. the Fn+Space hotkey).
        pub fn perturb(&self, level: u8) {
            let mut s = self.lock();
            s.status = (s.status & !STATUS_LEVEL_MASK) | (u32::from(level) & STATUS_LEVEL_MASK);
        }

        /// Every payload passed to the set request, in order.
        pub fn writes(&self) -> Vec<u32> {
            self.lock().writes.clone()
        }

        /// Number of set requests issued.
        pub fn write_count(&self) -> usize {
            self.lock().writes.len()
        }

        /// Number of successful query requests issued.
        pub fn query_count(&self) -> usize {
            self.lock().queries
        }

        /// Make every request fail as if the handle could not be opened.
        pub fn set_fail_query(&self, fail: bool) {
            self.lock().fail_query = fail;
        }

        /// Make set requests fail.
        pub fn set_fail_set(&self, fail: bool) {
            self.lock().fail_set = fail;
        }

        /// Report the status word with its ready flags cleared.
        pub fn set_not_ready(&self, not_ready: bool) {
            self.lock().not_ready = not_ready;
        }

        /// Echo a different payload than the one written, without applying it.
        pub fn set_echo_mismatch(&self, mismatch: bool) {
            self.lock().echo_mismatch = mismatch;
        }
    }

    impl PmDevice for MockPmDevice {
        fn control(&self, code: u32, input: u32) -> Result<u32> {
            let mut s = self.lock();
            match code {
                IOCTL_QUERY_STATUS => {
                    if s.fail_query {
                        return Err(BacklightError::DriverAccess(
                            "mock: query failure injected".into(),
                        ));
                    }
                    s.queries += 1;
                    if s.not_ready {
                        Ok(s.status & !STATUS_READY_MASK)
                    } else {
                        Ok(s.status)
                    }
                }
                IOCTL_SET_STATUS => {
                    if s.fail_set {
                        return Err(BacklightError::DriverAccess(
                            "mock: set failure injected".into(),
                        ));
                    }
                    s.writes.push(input);
                    if s.echo_mismatch {
                        return Ok(input ^ 0x1);
                    }
                    s.status = (s.status & !STATUS_LEVEL_MASK) | (input & STATUS_LEVEL_MASK);
                    Ok(input)
                }
                _ => Err(BacklightError::DriverAccess(format!(
                    "mock: unknown control code 0x{code:08X}"
                ))),
            }
        }
    }
}
