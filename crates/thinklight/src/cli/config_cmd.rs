//! `config` subcommand: show current configuration and file paths.

use std::path::Path;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width, level_label, print_json};

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let log_path = Config::log_path();
    let problems: Vec<String> = match config.validate() {
        Ok(()) => vec![],
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            log_file: log_path.as_ref().map(|p| p.display().to_string()),
            settings: config,
            problems,
        });
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:", "Log file:"],
        &[
            "target_level:",
            "loop_interval_ms:",
            "monitor_interval_ms:",
            "settle_delay_ms:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    match &log_path {
        Some(p) => kv("Log file:", p.display(), w),
        None => kv("Log file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    let target = match config.target_level {
        Some(level) => level_label(level),
        None => "(hardware maximum)".to_string(),
    };
    kv_indent("target_level:", target, w);
    kv_indent("loop_interval_ms:", config.loop_interval_ms, w);
    kv_indent("monitor_interval_ms:", config.monitor_interval_ms, w);
    kv_indent("settle_delay_ms:", config.settle_delay_ms, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
