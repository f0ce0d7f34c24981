//! Integration tests: keeper convergence through the public API, using the
//! mock PM driver, scripted notification source and in-memory lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use thinklight_lib::device::mock::MockPmDevice;
use thinklight_lib::guard::memory::LocalLock;
use thinklight_lib::keeper::{AssignOutcome, KeeperOptions, MIN_LOOP_INTERVAL};
use thinklight_lib::protocol::{DRIVER_INSTANCE_NAME, KEEPER_INSTANCE_NAME};
use thinklight_lib::watcher::mock::ScriptedSource;
use thinklight_lib::{Backlight, BacklightError, BacklightKeeper, BacklightState};

const PATIENCE: Duration = Duration::from_secs(3);

fn options(settle_ms: u64) -> KeeperOptions {
    KeeperOptions {
        loop_interval: MIN_LOOP_INTERVAL,
        settle_delay: Duration::from_millis(settle_ms),
        monitor_interval: Duration::from_millis(20),
    }
}

fn backlight(dev: &Arc<MockPmDevice>, src: &ScriptedSource, lock: &LocalLock) -> Arc<Backlight> {
    Arc::new(
        Backlight::with_parts(
            Box::new(Arc::clone(dev)),
            lock,
            src.opener(),
            Duration::from_millis(20),
        )
        .expect("open backlight"),
    )
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

// ── Scenario: limit 2, level 0, target 2 ──

#[test]
fn assign_corrects_once_then_stays_quiet() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 0));
    let src = ScriptedSource::new(0);
    let keeper = BacklightKeeper::with_backlight(
        backlight(&dev, &src, &lock),
        BacklightState::Full.level(),
        &lock,
        options(5),
    )
    .unwrap();

    assert_eq!(keeper.assign(), AssignOutcome::Rewritten);
    assert_eq!(dev.level(), 2);
    for _ in 0..3 {
        assert_eq!(keeper.assign(), AssignOutcome::InSync);
    }
    assert_eq!(dev.write_count(), 1);

    dev.perturb(1);
    assert_eq!(keeper.assign(), AssignOutcome::Rewritten);
    assert_eq!(dev.write_count(), 2);
}

// ── Hotkey change while the keeper runs ──

#[test]
fn running_keeper_restores_hotkey_change_with_one_write() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 2));
    let src = ScriptedSource::new(0);
    let mut keeper =
        BacklightKeeper::with_backlight(backlight(&dev, &src, &lock), 2, &lock, options(30))
            .unwrap();
    keeper.start().unwrap();
    assert!(wait_until(|| src.arm_count() >= 1));

    // Fn+Space: hardware level drops and the PM service flips bit 17.
    dev.perturb(0);
    src.toggle_backlight_bit();

    assert!(wait_until(|| dev.level() == 2));
    // Let any queued tick or notification run against the corrected level.
    std::thread::sleep(MIN_LOOP_INTERVAL * 3);
    assert_eq!(dev.write_count(), 1);
    keeper.stop();
}

#[test]
fn concurrent_triggers_are_serialized() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 0));
    let src = ScriptedSource::new(0);
    let keeper = Arc::new(
        BacklightKeeper::with_backlight(backlight(&dev, &src, &lock), 2, &lock, options(100))
            .unwrap(),
    );

    let outcomes: Vec<_> = (0..2)
        .map(|_| {
            let k = Arc::clone(&keeper);
            std::thread::spawn(move || k.assign())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert!(outcomes.contains(&AssignOutcome::Rewritten));
    assert!(outcomes.contains(&AssignOutcome::InSync));
    assert_eq!(dev.write_count(), 1);
}

// ── Failure reporting ──

#[test]
fn rejected_write_reports_exception_and_keeps_target() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 0));
    let src = ScriptedSource::new(0);
    let keeper =
        BacklightKeeper::with_backlight(backlight(&dev, &src, &lock), 2, &lock, options(5))
            .unwrap();
    let (tx, rx) = mpsc::channel();
    keeper.exceptions().subscribe(move |e| {
        let _ = tx.send(matches!(**e, BacklightError::DriverAccess(_)));
    });
    dev.set_echo_mismatch(true);

    assert_eq!(keeper.assign(), AssignOutcome::WriteFailed);
    assert!(rx.recv_timeout(PATIENCE).unwrap());
    assert_eq!(keeper.target(), 2);
    assert_eq!(keeper.backlight().state(), 0);
}

#[test]
fn errors_never_stop_the_keeper() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 0));
    let src = ScriptedSource::new(0);
    let mut keeper =
        BacklightKeeper::with_backlight(backlight(&dev, &src, &lock), 2, &lock, options(5))
            .unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    keeper.exceptions().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    dev.set_not_ready(true);
    keeper.start().unwrap();
    assert!(wait_until(|| seen.load(Ordering::SeqCst) >= 2));

    dev.set_not_ready(false);
    assert!(wait_until(|| dev.level() == 2));
    assert!(keeper.is_running());
    keeper.stop();
}

// ── Exclusivity ──

#[test]
fn second_driver_and_keeper_are_rejected() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 0));
    let src = ScriptedSource::new(0);
    let bl = backlight(&dev, &src, &lock);
    assert!(lock.is_held(DRIVER_INSTANCE_NAME));

    let second = Backlight::with_parts(
        Box::new(Arc::clone(&dev)),
        &lock,
        src.opener(),
        Duration::from_millis(20),
    );
    assert!(matches!(second, Err(BacklightError::AlreadyRunning(_))));

    let keeper = BacklightKeeper::with_backlight(Arc::clone(&bl), 2, &lock, options(5)).unwrap();
    assert!(lock.is_held(KEEPER_INSTANCE_NAME));
    let again = BacklightKeeper::with_backlight(Arc::clone(&bl), 2, &lock, options(5));
    assert!(matches!(again, Err(BacklightError::AlreadyRunning(_))));

    drop(keeper);
    assert!(!lock.is_held(KEEPER_INSTANCE_NAME));
    drop(bl);
    assert!(!lock.is_held(DRIVER_INSTANCE_NAME));
}

// ── Retargeting ──

#[test]
fn new_target_is_picked_up_by_next_tick() {
    let lock = LocalLock::new();
    let dev = Arc::new(MockPmDevice::new(2, 2));
    let src = ScriptedSource::new(0);
    let mut keeper =
        BacklightKeeper::with_backlight(backlight(&dev, &src, &lock), 2, &lock, options(5))
            .unwrap();
    keeper.start().unwrap();

    keeper.set_target(i32::from(BacklightState::Dim.level()));
    assert!(wait_until(|| dev.level() == 1));
    keeper.stop();
    assert_eq!(keeper.target(), 1);
}
