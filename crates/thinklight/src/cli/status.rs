//! `status` subcommand: show the current backlight level and limit.

use super::{Backlight, BacklightState, Result, StatusOutput, kv, kv_width, level_label, print_json};

pub(super) fn cmd_status(json: bool) -> Result<()> {
    let backlight = Backlight::open()?;
    let word = backlight.driver().read_word()?;
    let level = word.level;

    if json {
        return print_json(&StatusOutput {
            version: env!("CARGO_PKG_VERSION").to_string(),
            level,
            limit: word.limit,
            state: BacklightState::from_level(level),
            raw: format!("0x{:08X}", word.raw),
            capability: word.capability,
        });
    }

    let w = kv_width(&["Version:", "Level:", "Limit:", "Raw status:", "Capability:"], &[]);
    kv("Version:", env!("CARGO_PKG_VERSION"), w);
    kv("Level:", level_label(level), w);
    kv("Limit:", level_label(word.limit), w);
    kv("Raw status:", format_args!("0x{:08X}", word.raw), w);
    kv("Capability:", if word.capability { "yes" } else { "no" }, w);
    Ok(())
}
