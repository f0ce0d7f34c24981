//! Unified error type for the thinklight-lib crate.
//!
//! [`BacklightError`] covers the four runtime failure kinds of the backlight
//! stack (duplicate instance, unready hardware, driver transport, change
//! notification) plus I/O and configuration errors from the ambient layer.
//! String payloads follow the convention **"context: details"**.

use std::fmt;

/// Unified error type for thinklight-lib operations.
#[derive(Debug)]
pub enum BacklightError {
    /// Another holder of the named exclusivity object exists on this system.
    AlreadyRunning(String),
    /// The driver answered, but the status word's ready flags were not set.
    HardwareNotReady(u32),
    /// The device handle could not be opened/closed, or the request failed.
    DriverAccess(String),
    /// The OS change notification could not be armed.
    NotificationRegistration(String),
    /// Standard I/O error (config persistence).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for BacklightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacklightError::AlreadyRunning(name) => {
                write!(f, "Another instance is already running ({name})")
            }
            BacklightError::HardwareNotReady(raw) => {
                write!(f, "Backlight hardware not ready (status 0x{raw:08X})")
            }
            BacklightError::DriverAccess(e) => write!(f, "Driver access error: {e}"),
            BacklightError::NotificationRegistration(e) => {
                write!(f, "Change notification registration failed: {e}")
            }
            BacklightError::Io(e) => write!(f, "I/O error: {e}"),
            BacklightError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for BacklightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BacklightError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BacklightError {
    fn from(e: std::io::Error) -> Self {
        BacklightError::Io(e)
    }
}

/// Crate-level Result alias using [`BacklightError`].
pub type Result<T> = std::result::Result<T, BacklightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: BacklightError = io_err.into();
        assert!(matches!(e, BacklightError::Io(_)));
    }

    #[test]
    fn display_already_running() {
        let e = BacklightError::AlreadyRunning("ThinklightDriver".into());
        assert_eq!(
            e.to_string(),
            "Another instance is already running (ThinklightDriver)"
        );
    }

    #[test]
    fn display_hardware_not_ready_shows_raw_word() {
        let e = BacklightError::HardwareNotReady(0x0001_0201);
        assert_eq!(
            e.to_string(),
            "Backlight hardware not ready (status 0x00010201)"
        );
    }

    #[test]
    fn display_driver_access() {
        let e = BacklightError::DriverAccess("CreateFileW: access denied".into());
        assert_eq!(
            e.to_string(),
            "Driver access error: CreateFileW: access denied"
        );
    }

    #[test]
    fn display_notification_registration() {
        let e = BacklightError::NotificationRegistration(
            "RegNotifyChangeKeyValue failed with code 5".into(),
        );
        assert!(e.to_string().contains("code 5"));
    }

    #[test]
    fn display_config_error() {
        let e = BacklightError::Config("invalid input".into());
        assert_eq!(e.to_string(), "Config error: invalid input");
    }

    #[test]
    fn source_chains_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = BacklightError::Io(io_err);
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("denied"));
    }

    #[test]
    fn source_none_for_string_variants() {
        let e = BacklightError::DriverAccess("test".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_io_to_backlight() {
        fn inner() -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        let err = outer().unwrap_err();
        assert!(matches!(err, BacklightError::Io(_)));
    }
}
