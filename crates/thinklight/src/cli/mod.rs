//! CLI subcommands: backlight status, level control, change watching, keeping.

mod config_cmd;
mod keep;
mod set;
mod status;
mod watch;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use thinklight_lib::config::Config;
pub(super) use thinklight_lib::error::{BacklightError, Result};
pub(super) use thinklight_lib::protocol::MAX_FIELD_LEVEL;
pub(super) use thinklight_lib::{Backlight, BacklightKeeper, BacklightState};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{key:<width$}{value}", width = w);
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Human label for a level: `2 (full)` for named levels, the number otherwise.
pub(super) fn level_label(level: u8) -> String {
    match BacklightState::from_level(level) {
        Some(state) => format!("{level} ({state})"),
        None => level.to_string(),
    }
}

pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| BacklightError::Config(format!("JSON serialization failed: {e}")))?;
    println!("{json_str}");
    Ok(())
}

/// Load config from `custom_path` or the default location, logging parse
/// and validation warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    let (config, warnings) = match custom_path {
        Some(p) => Config::load_from(p),
        None => Config::load_with_warnings(),
    };
    for w in &warnings {
        log::warn!("{w}");
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            log::warn!("{e}");
        }
    }
    config
}

/// Sleep until Ctrl+C, or until `limit` elapses if given.
pub(super) fn wait_while_running(limit: Option<Duration>) {
    let deadline = limit.map(|d| Instant::now() + d);
    while RUNNING.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct StatusOutput {
    pub version: String,
    pub level: u8,
    pub limit: u8,
    pub state: Option<BacklightState>,
    pub raw: String,
    pub capability: bool,
}

#[derive(Serialize)]
pub(super) struct SetOutput {
    pub requested: u8,
    pub applied: u8,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub(super) enum WatchEvent {
    Changed { level: u8 },
    Exception { message: String },
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub log_file: Option<String>,
    pub settings: Config,
    pub problems: Vec<String>,
}

fn parse_level(s: &str) -> std::result::Result<u8, String> {
    let level: u8 = s
        .trim()
        .parse()
        .map_err(|_| format!("\"{s}\" is not a level (expected 0-{MAX_FIELD_LEVEL})"))?;
    if level > MAX_FIELD_LEVEL {
        return Err(format!("level {level} is out of range 0-{MAX_FIELD_LEVEL}"));
    }
    Ok(level)
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the current backlight level and limit
    Status,

    /// Set the backlight level once (clamped to the hardware limit)
    Set {
        /// Target level (0 = off, 1 = dim, 2 = full)
        #[arg(value_parser = parse_level)]
        level: u8,
    },

    /// Print backlight changes (e.g. Fn+Space) until Ctrl+C
    Watch,

    /// Keep the backlight at a level, restoring it after external changes
    Keep {
        /// Level to enforce (default: from config, else the hardware maximum)
        #[arg(value_parser = parse_level)]
        level: Option<u8>,
        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Show current configuration and file paths
    Config,
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Status => status::cmd_status(json),
        Command::Set { level } => set::cmd_set(level, json),
        Command::Watch => watch::cmd_watch(json, config_path),
        Command::Keep { level, seconds } => {
            if json {
                warn_json_unsupported("keep");
            }
            keep::cmd_keep(level, seconds, config_path)
        }
        Command::Config => config_cmd::cmd_config(json, config_path),
    }
}


#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn parse_level_accepts_field_range() {
        assert_eq!(parse_level("0"), Ok(0));
        assert_eq!(parse_level(" 2 "), Ok(2));
        assert_eq!(parse_level("15"), Ok(15));
    }

    #[test]
    fn parse_level_rejects_out_of_range() {
        assert!(parse_level("16").unwrap_err().contains("out of range"));
        assert!(parse_level("-1").is_err());
        assert!(parse_level("full").is_err());
    }
}

#[cfg(test)]
mod json_struct_tests {
    use super::*;

    #[test]
    fn status_output_has_expected_fields() {
        let output = StatusOutput {
            version: "0.1.0".into(),
            level: 1,
            limit: 2,
            state: Some(BacklightState::Dim),
            raw: "0x00050201".into(),
            capability: false,
        };
        let json = serde_json::to_value(&output).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 6, "StatusOutput should have 6 fields");
        assert_eq!(obj["state"], "dim");
    }

    #[test]
    fn watch_events_are_tagged() {
        let changed = serde_json::to_value(WatchEvent::Changed { level: 2 }).unwrap();
        assert_eq!(changed["event"], "changed");
        assert_eq!(changed["level"], 2);

        let exception = serde_json::to_value(WatchEvent::Exception {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(exception["event"], "exception");
        assert_eq!(exception["message"], "boom");
    }

    #[test]
    fn set_output_null_error_on_success() {
        let output = SetOutput {
            requested: 5,
            applied: 2,
            success: true,
            error: None,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert!(json["error"].is_null());
        assert_eq!(json["applied"], 2);
    }
}
