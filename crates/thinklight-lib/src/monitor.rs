//! Change monitor: turns notification-value toggles into "changed" events.
//!
//! The loop captures the notification value, arms, sleeps one poll interval
//! (waking early if the notification fires), recaptures and compares bit 17.
//! On a toggle it re-reads the hardware level and emits `changed(level)` on
//! the driver's events. Errors inside the loop become `exception` events;
//! only an unavailable or unreadable source at start-up ends it.
//!
//! Two flips of bit 17 between captures cancel out and go unnoticed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::driver::BacklightDriver;
use crate::error::Result;
use crate::watcher::{SourceOpener, WatchToken};

/// Default poll interval between captures.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(250);

/// Shortest accepted poll interval.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

pub struct BacklightMonitor {
    driver: Arc<BacklightDriver>,
    opener: SourceOpener,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BacklightMonitor {
    /// `interval` below [`MIN_MONITOR_INTERVAL`] is raised to it.
    pub fn new(driver: Arc<BacklightDriver>, opener: SourceOpener, interval: Duration) -> Self {
        BacklightMonitor {
            driver,
            opener,
            interval: interval.max(MIN_MONITOR_INTERVAL),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the monitor thread. No-op while already running.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A previous thread may have ended on its own.
        if let Some(old) = self.handle.take() {
            let _ = old.join();
        }

        let driver = Arc::clone(&self.driver);
        let opener = Arc::clone(&self.opener);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name("thinklight-monitor".into())
            .spawn(move || run(&driver, &opener, interval, &running));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                log::debug!("monitor started ({} ms poll)", interval.as_millis());
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("monitor thread panicked");
            }
            log::debug!("monitor stopped");
        }
    }

    /// Whether the loop is live. Becomes `false` on its own if no change
    /// source could be opened.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for BacklightMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BacklightMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklightMonitor")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run(driver: &BacklightDriver, opener: &SourceOpener, interval: Duration, running: &AtomicBool) {
    let Some(source) = opener() else {
        log::debug!("change notification unavailable; monitor idle");
        running.store(false, Ordering::SeqCst);
        return;
    };
    let mut token = match WatchToken::capture(source) {
        Ok(token) => token,
        Err(e) => {
            log::debug!("could not read notification value: {e}");
            running.store(false, Ordering::SeqCst);
            return;
        }
    };
    if let Err(e) = token.arm() {
        driver.events().notify_exception(e);
    }

    let events = driver.events();
    while running.load(Ordering::SeqCst) {
        token.wait(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let capture = match token.recapture() {
            Ok(capture) => capture,
            Err(e) => {
                events.notify_exception(e);
                continue;
            }
        };
        if let Some(e) = capture.arm_error {
            events.notify_exception(e);
        }
        if capture.toggled {
            match driver.read_state() {
                Ok(level) => {
                    log::debug!("backlight changed to {level}");
                    events.notify_changed(level);
                }
                Err(e) => {
                    events.notify_exception(e);
                }
            }
        }
    }
}
