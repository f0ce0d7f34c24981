//! Start-up configuration: TOML-based, platform-aware paths.
//!
//! Only defaults for a fresh start live here. The keeper's target is not
//! written back when it changes at runtime.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keeper::{KeeperOptions, MIN_LOOP_INTERVAL};
use crate::protocol::MAX_FIELD_LEVEL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Level the keeper enforces when no argument is given. `None` means the
    /// hardware limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_level: Option<u8>,

    /// Keeper tick interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub loop_interval_ms: u64,

    /// Monitor poll interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Pause before rewriting a mismatched level, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub settle_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_level: None,
            loop_interval_ms: default_interval_ms(),
            monitor_interval_ms: default_interval_ms(),
            settle_delay_ms: default_interval_ms(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `target_level` does not fit the 4-bit level field.
    TargetOutOfRange(u8),
    /// An interval is below the 100 ms floor.
    IntervalTooShort { field: &'static str, ms: u64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TargetOutOfRange(level) => {
                write!(f, "Invalid target_level {level}: must be 0-{MAX_FIELD_LEVEL}")
            }
            ValidationError::IntervalTooShort { field, ms } => write!(
                f,
                "Invalid {field}: {ms} ms is below the {} ms minimum",
                MIN_LOOP_INTERVAL.as_millis()
            ),
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        #[cfg(windows)]
        {
            dirs::config_dir().map(|p| p.join("Thinklight"))
        }
        #[cfg(not(windows))]
        {
            dirs::config_dir().map(|p| p.join("thinklight"))
        }
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Full path to the log file (service).
    pub fn log_path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("thinklight.log"))
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all problems found.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(level) = self.target_level
            && level > MAX_FIELD_LEVEL
        {
            errors.push(ValidationError::TargetOutOfRange(level));
        }

        let floor = u64::try_from(MIN_LOOP_INTERVAL.as_millis()).unwrap_or(u64::MAX);
        for (field, ms) in [
            ("loop_interval_ms", self.loop_interval_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
        ] {
            if ms < floor {
                errors.push(ValidationError::IntervalTooShort { field, ms });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Level to enforce at start-up; the keeper clamps it to the hardware limit.
    pub fn initial_target(&self) -> u8 {
        self.target_level.unwrap_or(MAX_FIELD_LEVEL)
    }

    /// Timing for a keeper built from this config.
    pub fn keeper_options(&self) -> KeeperOptions {
        KeeperOptions {
            loop_interval: Duration::from_millis(self.loop_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.target_level, None);
        assert_eq!(c.loop_interval_ms, 250);
        assert_eq!(c.monitor_interval_ms, 250);
        assert_eq!(c.settle_delay_ms, 250);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn serialize_roundtrip() {
        let c = Config {
            target_level: Some(1),
            loop_interval_ms: 500,
            ..Config::default()
        };
        let toml_str = toml::to_string_pretty(&c).unwrap();
        let c2: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(c2, c);
    }

    #[test]
    fn none_target_is_omitted() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(!toml_str.contains("target_level"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: Config = toml::from_str("target_level = 0").unwrap();
        assert_eq!(c.target_level, Some(0));
        // Missing fields get defaults
        assert_eq!(c.loop_interval_ms, 250);
        assert_eq!(c.settle_delay_ms, 250);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn wrong_type_toml_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("loop_interval_ms = \"fast\"");
        assert!(result.is_err());
    }

    #[test]
    fn load_from_missing_file_gives_defaults_without_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (c, warnings) = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(c, Config::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn load_from_malformed_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is { not valid toml").unwrap();
        let (c, warnings) = Config::load_from(&path);
        assert_eq!(c, Config::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("config parse error"));
    }

    #[test]
    fn config_path_ends_with_toml() {
        let path = Config::path().unwrap();
        assert_eq!(path.file_name().unwrap(), "config.toml");
    }

    #[test]
    fn log_path_is_in_config_dir() {
        let log = Config::log_path().unwrap();
        let dir = Config::dir().unwrap();
        assert_eq!(log.parent().unwrap(), dir);
        assert_eq!(log.file_name().unwrap(), "thinklight.log");
    }

    #[test]
    fn validate_target_out_of_range() {
        let c = Config {
            target_level: Some(16),
            ..Config::default()
        };
        assert_eq!(
            c.validate().unwrap_err(),
            vec![ValidationError::TargetOutOfRange(16)]
        );
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let c = Config {
            target_level: Some(99),
            loop_interval_ms: 50,
            monitor_interval_ms: 0,
            settle_delay_ms: 0,
        };
        let errors = c.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::IntervalTooShort {
            field: "loop_interval_ms",
            ms: 50
        }));
        assert!(errors.contains(&ValidationError::IntervalTooShort {
            field: "monitor_interval_ms",
            ms: 0
        }));
    }

    #[test]
    fn settle_delay_may_be_zero() {
        let c = Config {
            settle_delay_ms: 0,
            ..Config::default()
        };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validation_error_display() {
        assert_eq!(
            ValidationError::TargetOutOfRange(20).to_string(),
            "Invalid target_level 20: must be 0-15"
        );
        assert_eq!(
            ValidationError::IntervalTooShort {
                field: "loop_interval_ms",
                ms: 10
            }
            .to_string(),
            "Invalid loop_interval_ms: 10 ms is below the 100 ms minimum"
        );
    }

    #[test]
    fn initial_target_defaults_to_field_max() {
        assert_eq!(Config::default().initial_target(), MAX_FIELD_LEVEL);
        let c = Config {
            target_level: Some(1),
            ..Config::default()
        };
        assert_eq!(c.initial_target(), 1);
    }

    #[test]
    fn keeper_options_follow_fields() {
        let c = Config {
            loop_interval_ms: 300,
            monitor_interval_ms: 200,
            settle_delay_ms: 50,
            ..Config::default()
        };
        let o = c.keeper_options();
        assert_eq!(o.loop_interval, Duration::from_millis(300));
        assert_eq!(o.monitor_interval, Duration::from_millis(200));
        assert_eq!(o.settle_delay, Duration::from_millis(50));
    }
}
