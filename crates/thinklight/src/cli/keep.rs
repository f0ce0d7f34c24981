//! `keep` subcommand: run a keeper in the foreground.

use std::path::Path;
use std::time::Duration;

use super::{BacklightKeeper, Result, level_label, load_config, wait_while_running};

pub(super) fn cmd_keep(
    level: Option<u8>,
    seconds: Option<u64>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path);
    let target = level.unwrap_or_else(|| config.initial_target());

    let mut keeper = BacklightKeeper::open(target, config.keeper_options())?;
    keeper.exceptions().subscribe(|e| eprintln!("  error: {e}"));
    keeper.start()?;

    match seconds {
        Some(s) => println!(
            "Keeping backlight at {} for {s}s. Press Ctrl+C to stop early.",
            level_label(keeper.target())
        ),
        None => println!(
            "Keeping backlight at {}. Press Ctrl+C to stop.",
            level_label(keeper.target())
        ),
    }

    wait_while_running(seconds.map(Duration::from_secs));

    keeper.stop();
    println!("Stopped.");
    Ok(())
}
