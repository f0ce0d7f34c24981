//! thinklight: keyboard backlight control and level keeping for ThinkPad
//! power-management drivers.

pub mod backlight;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod events;
pub mod guard;
pub mod keeper;
pub mod monitor;
pub mod protocol;
pub mod watcher;

pub use backlight::Backlight;
pub use error::BacklightError;
pub use keeper::{BacklightKeeper, BacklightState};
