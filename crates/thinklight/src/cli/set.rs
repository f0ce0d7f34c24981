//! `set` subcommand: write a level once.

use std::sync::mpsc;
use std::time::Duration;

use super::{Backlight, BacklightError, Result, SetOutput, level_label, print_json};

pub(super) fn cmd_set(level: u8, json: bool) -> Result<()> {
    let backlight = Backlight::open()?;
    let applied = backlight.clamp(i32::from(level));

    let (tx, rx) = mpsc::channel();
    backlight.events().exception.subscribe(move |e| {
        let _ = tx.send(e.to_string());
    });

    let success = backlight.change_state(i32::from(level));
    let error = if success {
        None
    } else {
        Some(
            rx.recv_timeout(Duration::from_secs(1))
                .unwrap_or_else(|_| "write rejected by driver".to_string()),
        )
    };

    if json {
        print_json(&SetOutput {
            requested: level,
            applied,
            success,
            error: error.clone(),
        })?;
    } else if success {
        if applied != level {
            println!(
                "Level {level} exceeds the limit; clamped to {}",
                backlight.limit()
            );
        }
        println!("Backlight set to {}", level_label(applied));
    }

    match error {
        Some(e) => Err(BacklightError::DriverAccess(format!(
            "could not set level {applied}: {e}"
        ))),
        None => Ok(()),
    }
}
