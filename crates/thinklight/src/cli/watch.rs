//! `watch` subcommand: print backlight changes until Ctrl+C.

use std::path::Path;

use super::{Backlight, Result, WatchEvent, level_label, load_config, wait_while_running};

fn emit(event: &WatchEvent, json: bool) {
    if json {
        // One object per line so the output can be piped.
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        WatchEvent::Changed { level } => println!("  changed -> {}", level_label(*level)),
        WatchEvent::Exception { message } => eprintln!("  error: {message}"),
    }
}

pub(super) fn cmd_watch(json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let backlight = Backlight::open_with_interval(config.keeper_options().monitor_interval)?;

    backlight.events().changed.subscribe(move |level| {
        emit(&WatchEvent::Changed { level: *level }, json);
    });
    backlight.events().exception.subscribe(move |e| {
        emit(
            &WatchEvent::Exception {
                message: e.to_string(),
            },
            json,
        );
    });

    backlight.start()?;
    if !json {
        println!(
            "Watching backlight (level {}, limit {}). Press Ctrl+C to stop.",
            backlight.state(),
            backlight.limit()
        );
    }

    wait_while_running(None);

    if !backlight.is_enabled() {
        log::warn!("change notification is unavailable; no changes could be observed");
    }
    backlight.stop();
    Ok(())
}
