//! Level keeper: continuously forces the backlight to a target level.
//!
//! [`BacklightKeeper::assign`] reads the hardware level and rewrites it when
//! it differs from the target. It runs on two triggers: the keeper's own tick
//! thread, and every `changed` event from the backlight's monitor. Both go
//! through one operations lock, so assignments are totally ordered and a
//! burst of external changes produces at most one corrective write.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::backlight::Backlight;
use crate::error::{BacklightError, Result};
use crate::events::{HandlerId, Subscribers};
use crate::guard::{InstanceGuard, InstanceLock, SystemLock};
use crate::monitor::DEFAULT_MONITOR_INTERVAL;
use crate::protocol::KEEPER_INSTANCE_NAME;

/// Shortest accepted tick interval.
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Default tick interval.
pub const DEFAULT_LOOP_INTERVAL: Duration = Duration::from_millis(250);

/// Default pause between detecting a mismatch and rewriting.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

// ── Named levels ──

/// The three levels of a two-step keyboard backlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklightState {
    Off = 0,
    Dim = 1,
    Full = 2,
}

impl BacklightState {
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(BacklightState::Off),
            1 => Some(BacklightState::Dim),
            2 => Some(BacklightState::Full),
            _ => None,
        }
    }
}

impl From<BacklightState> for u8 {
    fn from(state: BacklightState) -> u8 {
        state.level()
    }
}

impl fmt::Display for BacklightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacklightState::Off => write!(f, "off"),
            BacklightState::Dim => write!(f, "dim"),
            BacklightState::Full => write!(f, "full"),
        }
    }
}

impl FromStr for BacklightState {
    type Err = BacklightError;

    /// Accepts `0`, `1`, `2` or the lowercase names.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(BacklightState::Off),
            "1" | "dim" => Ok(BacklightState::Dim),
            "2" | "full" => Ok(BacklightState::Full),
            other => Err(BacklightError::Config(format!(
                "invalid backlight state \"{other}\" (expected 0, 1 or 2)"
            ))),
        }
    }
}

// ── Options ──

/// Timing knobs for a keeper and the backlight it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperOptions {
    pub loop_interval: Duration,
    pub settle_delay: Duration,
    /// Poll interval of the monitor, used only when the keeper opens its own backlight.
    pub monitor_interval: Duration,
}

impl Default for KeeperOptions {
    fn default() -> Self {
        KeeperOptions {
            loop_interval: DEFAULT_LOOP_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}

/// What one [`BacklightKeeper::assign`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Hardware already at target; nothing written.
    InSync,
    /// Mismatch corrected.
    Rewritten,
    /// Mismatch found but the write was rejected.
    WriteFailed,
    /// The level could not be read.
    Failed,
}

// ── Keeper ──

struct KeeperShared {
    backlight: Arc<Backlight>,
    ops_lock: Mutex<()>,
    target: AtomicU8,
    loop_interval_ms: AtomicU64,
    settle_delay: Duration,
    active: AtomicBool,
    exit: (Mutex<bool>, Condvar),
    exceptions: Subscribers<Arc<BacklightError>>,
}

impl KeeperShared {
    fn ops(&self) -> MutexGuard<'_, ()> {
        self.ops_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_loop_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_LOOP_INTERVAL);
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.loop_interval_ms.store(ms, Ordering::SeqCst);
    }

    fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms.load(Ordering::SeqCst))
    }

    fn assign(&self) -> AssignOutcome {
        let _ops = self.ops();
        self.assign_locked()
    }

    /// Assign only while the keeper is running. `active` is re-checked
    /// under the ops lock so a notification queued behind `stop()` is dropped.
    fn assign_if_active(&self) -> Option<AssignOutcome> {
        let _ops = self.ops();
        if !self.active.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.assign_locked())
    }

    fn assign_locked(&self) -> AssignOutcome {
        let target = self.target.load(Ordering::SeqCst);
        match self.backlight.read_state() {
            Ok(level) if level == target => AssignOutcome::InSync,
            Ok(level) => {
                log::debug!("level {level} differs from target {target}");
                std::thread::sleep(self.settle_delay);
                if self.backlight.change_state(i32::from(target)) {
                    log::info!("backlight restored to {target}");
                    AssignOutcome::Rewritten
                } else {
                    AssignOutcome::WriteFailed
                }
            }
            Err(e) => {
                log::warn!("keeper could not read backlight: {e}");
                self.exceptions.dispatch(Arc::new(e));
                AssignOutcome::Failed
            }
        }
    }

    /// Sleep one tick. Returns `true` if exit was requested.
    fn wait_tick(&self) -> bool {
        let (lock, cvar) = &self.exit;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, self.loop_interval(), |exit| !*exit)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn set_exit(&self, exit: bool) {
        let (lock, cvar) = &self.exit;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = exit;
        cvar.notify_all();
    }
}

/// Keeps the backlight at a target level until stopped.
///
/// At most one keeper exists per machine ([`KEEPER_INSTANCE_NAME`]).
pub struct BacklightKeeper {
    shared: Arc<KeeperShared>,
    handle: Option<JoinHandle<()>>,
    changed_id: HandlerId,
    exception_id: HandlerId,
    _instance: InstanceGuard,
}

impl BacklightKeeper {
    /// Open the platform backlight and keep it at `target`.
    pub fn new(target: u8) -> Result<Self> {
        Self::open(target, KeeperOptions::default())
    }

    pub fn open(target: u8, options: KeeperOptions) -> Result<Self> {
        let backlight = Arc::new(Backlight::open_with_interval(options.monitor_interval)?);
        Self::with_backlight(backlight, target, &SystemLock, options)
    }

    /// Keep an existing backlight at `target` (clamped to its limit).
    pub fn with_backlight(
        backlight: Arc<Backlight>,
        target: u8,
        lock: &dyn InstanceLock,
        options: KeeperOptions,
    ) -> Result<Self> {
        let instance = lock.acquire(KEEPER_INSTANCE_NAME)?;
        let target = backlight.clamp(i32::from(target));
        let shared = Arc::new(KeeperShared {
            backlight,
            ops_lock: Mutex::new(()),
            target: AtomicU8::new(target),
            loop_interval_ms: AtomicU64::new(0),
            settle_delay: options.settle_delay,
            active: AtomicBool::new(false),
            exit: (Mutex::new(false), Condvar::new()),
            exceptions: Subscribers::new("keeper-exception"),
        });
        shared.store_loop_interval(options.loop_interval);

        let events = shared.backlight.events();
        let weak = Arc::downgrade(&shared);
        let changed_id = events.changed.subscribe(move |_| {
            if let Some(s) = weak.upgrade() {
                s.assign_if_active();
            }
        });
        let weak = Arc::downgrade(&shared);
        let exception_id = events.exception.subscribe(move |e| {
            if let Some(s) = weak.upgrade() {
                s.exceptions.dispatch(Arc::clone(e));
            }
        });

        log::debug!("keeper created, target {target}");
        Ok(BacklightKeeper {
            shared,
            handle: None,
            changed_id,
            exception_id,
            _instance: instance,
        })
    }

    /// Read the level and rewrite it if it differs from the target.
    pub fn assign(&self) -> AssignOutcome {
        self.shared.assign()
    }

    pub fn target(&self) -> u8 {
        self.shared.target.load(Ordering::SeqCst)
    }

    /// Change the target (clamped). Waits for an in-flight assignment.
    pub fn set_target(&self, level: i32) -> u8 {
        let _ops = self.shared.ops();
        let level = self.shared.backlight.clamp(level);
        self.shared.target.store(level, Ordering::SeqCst);
        log::debug!("keeper target set to {level}");
        level
    }

    pub fn loop_interval(&self) -> Duration {
        self.shared.loop_interval()
    }

    /// Values below [`MIN_LOOP_INTERVAL`] are raised to it.
    pub fn set_loop_interval(&self, interval: Duration) {
        self.shared.store_loop_interval(interval);
    }

    pub fn settle_delay(&self) -> Duration {
        self.shared.settle_delay
    }

    /// Enable change monitoring and start the tick thread.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.shared.set_exit(false);
        self.shared.backlight.start()?;
        self.shared.active.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("thinklight-keeper".into())
            .spawn(move || {
                while !shared.wait_tick() {
                    shared.assign();
                }
            });
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                log::info!("keeper started, target {}", self.target());
                Ok(())
            }
            Err(e) => {
                self.shared.active.store(false, Ordering::SeqCst);
                self.shared.backlight.stop();
                Err(e.into())
            }
        }
    }

    /// Stop the tick thread, wait for it and any in-flight assignment, then
    /// disable change monitoring. No hardware access follows once this returns.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.active.store(false, Ordering::SeqCst);
        drop(self.shared.ops());
        self.shared.set_exit(true);
        if handle.join().is_err() {
            log::warn!("keeper thread panicked");
        }
        self.shared.backlight.stop();
        log::info!("keeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Runtime errors from the keeper and from the backlight it drives.
    pub fn exceptions(&self) -> &Subscribers<Arc<BacklightError>> {
        &self.shared.exceptions
    }

    pub fn backlight(&self) -> &Arc<Backlight> {
        &self.shared.backlight
    }
}

impl Drop for BacklightKeeper {
    fn drop(&mut self) {
        self.stop();
        let events = self.shared.backlight.events();
        events.changed.unsubscribe(self.changed_id);
        events.exception.unsubscribe(self.exception_id);
    }
}

impl fmt::Debug for BacklightKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklightKeeper")
            .field("target", &self.target())
            .field("loop_interval", &self.loop_interval())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
