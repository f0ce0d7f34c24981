//! thinklight service: keeps the keyboard backlight at a fixed level.
//!
//! Usage: `thinklight <0|1|2>` (`off`, `dim` and `full` are accepted too).
//! Runs until Ctrl+C or console close, logging to the file at
//! `Config::log_path()`.
//!
//! Without an argument the level comes from `target_level` in the config
//! file, and from the hardware maximum when that is unset. An invalid or
//! extra argument always selects the hardware maximum. Both cases are logged
//! as errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thinklight_lib::config::Config;
use thinklight_lib::protocol::MAX_FIELD_LEVEL;
use thinklight_lib::{BacklightError, BacklightKeeper, BacklightState};

/// Shared shutdown flag: set by the console control handler.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[cfg(windows)]
unsafe extern "system" fn ctrl_handler(_ctrl_type: u32) -> windows::core::BOOL {
    RUNNING.store(false, Ordering::SeqCst);
    windows::core::BOOL(1)
}

/// Initialize the service logger, directing output to a log file.
///
/// Falls back to stderr if the log file can't be opened.
fn init_service_logger() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_target(false);

    if let Some(log_path) = Config::log_path() {
        if let Some(dir) = log_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Ok(file) = std::fs::File::create(&log_path) {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }

    builder.init();
}

/// Parse the single target argument.
///
/// `Ok(None)` when no argument was given; `Err` for anything else that is not
/// exactly one of `0`, `1`, `2`.
fn parse_target_arg(args: &[String]) -> Result<Option<BacklightState>, String> {
    match args {
        [] => Ok(None),
        [arg] => arg
            .parse::<BacklightState>()
            .map(Some)
            .map_err(|e| e.to_string()),
        _ => Err(format!("expected one argument, got {}", args.len())),
    }
}

/// Pick the start-up target: the argument, else the configured level.
/// Missing or bad input is reported as a diagnostic string.
fn resolve_target(args: &[String], config: &Config) -> (u8, Option<String>) {
    match parse_target_arg(args) {
        Ok(Some(state)) => (state.level(), None),
        Ok(None) => (
            config.initial_target(),
            Some("no target level given (expected 0, 1 or 2)".to_string()),
        ),
        Err(e) => (MAX_FIELD_LEVEL, Some(e)),
    }
}

fn run(target: u8, config: &Config) -> Result<(), BacklightError> {
    let mut keeper = BacklightKeeper::open(target, config.keeper_options())?;
    keeper
        .exceptions()
        .subscribe(|e| log::error!("keeper: {e}"));
    keeper.start()?;
    log::info!(
        "service running; keeping backlight at {} (limit {})",
        keeper.target(),
        keeper.backlight().limit()
    );

    while RUNNING.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    keeper.stop();
    log::info!("service stopped, goodbye");
    Ok(())
}

fn main() {
    init_service_logger();

    #[cfg(windows)]
    unsafe {
        let _ = windows::Win32::System::Console::SetConsoleCtrlHandler(Some(ctrl_handler), true);
    }

    #[cfg(not(windows))]
    {
        ctrlc::set_handler(move || {
            RUNNING.store(false, Ordering::SeqCst);
        })
        .ok();
    }

    let (config, warnings) = Config::load_with_warnings();
    for w in &warnings {
        log::warn!("{w}");
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            log::warn!("{e}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (target, diagnostic) = resolve_target(&args, &config);
    if let Some(msg) = diagnostic {
        log::error!("{msg}; defaulting to level {target} (clamped to the hardware maximum)");
    }

    if let Err(e) = run(target, &config) {
        log::error!("could not start: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
