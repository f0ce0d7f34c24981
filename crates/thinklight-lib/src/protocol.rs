//! Protocol constants and status-word codec for the IBM/Lenovo PM driver.
//!
//! The power-management driver exposes the keyboard backlight as a single
//! packed 32-bit status word, read with [`IOCTL_QUERY_STATUS`] and written
//! with [`IOCTL_SET_STATUS`]. Both requests carry a 4-byte little-endian
//! payload and return 4 bytes.
//!
//! ## Status word layout
//!
//! ```text
//!  31      22 21  20 19 18 17 16 15   12 11    8 7     4 3     0
//! +----------+---+-----+--+--+--+-------+-------+-------+-------+
//! |          |CAP|     |R1|  |R0|       | limit | keep  | level |
//! +----------+---+-----+--+--+--+-------+-------+-------+-------+
//! ```
//!
//! - `R0`/`R1` (bits 16 and 18): both must be set or the reading is a fault.
//! - `level` (bits 0-3): current brightness step.
//! - `limit` (bits 8-11): maximum brightness step.
//! - `keep` (bits 4-7): copied verbatim into write payloads.
//! - `CAP` (bit 21): when set, write payloads carry `0x100`.

use serde::Serialize;

// ── Driver surface ──

/// Device path of the power-management driver.
pub const DEVICE_PATH: &str = r"\\.\IBMPmDrv";

/// Query request: input ignored, output is the packed status word.
pub const IOCTL_QUERY_STATUS: u32 = 0x0022_2680;

/// Set request: input is the composed write payload, echoed back on success.
pub const IOCTL_SET_STATUS: u32 = 0x0022_2684;

// ── Status word fields ──

/// Both ready flags (bits 16 and 18).
pub const STATUS_READY_MASK: u32 = 0x0005_0000;

/// Current level, low nibble.
pub const STATUS_LEVEL_MASK: u32 = 0x0000_000F;

/// Shift of the level-limit nibble.
pub const STATUS_LIMIT_SHIFT: u32 = 8;

/// Bits copied unchanged from the current status into a write payload.
pub const STATUS_PRESERVED_MASK: u32 = 0x0000_00F0;

/// Hardware capability flag that changes how writes are composed.
pub const STATUS_CAPABILITY_FLAG: u32 = 0x0020_0000;

/// Payload bit set on writes when [`STATUS_CAPABILITY_FLAG`] is present.
pub const WRITE_CAPABILITY_FLAG: u32 = 0x0000_0100;

/// Highest level representable in the 4-bit field.
pub const MAX_FIELD_LEVEL: u8 = 0xF;

// ── Change notification ──

/// Registry key (under HKLM) whose default value the PM service rewrites
/// whenever hardware state changes.
pub const NOTIFY_SUBKEY: &str =
    r"SYSTEM\CurrentControlSet\Services\IBMPMSVC\Parameters\Notification";

/// Bit of the notification value that flips on backlight changes.
pub const NOTIFY_BACKLIGHT_BIT: u32 = 17;

// ── Exclusivity ──

/// System-wide name guarding exclusive driver access.
pub const DRIVER_INSTANCE_NAME: &str = "ThinklightDriverInstance";

/// System-wide name guarding the single level keeper.
pub const KEEPER_INSTANCE_NAME: &str = "ThinklightKeeperInstance";

/// A decoded status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusWord {
    /// The raw 32-bit value returned by the driver.
    pub raw: u32,
    /// Both ready flags set; only then are the other fields meaningful.
    pub ready: bool,
    /// Current brightness step.
    pub level: u8,
    /// Maximum brightness step.
    pub limit: u8,
    /// Capability flag (bit 21).
    pub capability: bool,
}

impl StatusWord {
    /// Unpack a raw status word.
    pub fn decode(raw: u32) -> Self {
        StatusWord {
            raw,
            ready: raw & STATUS_READY_MASK == STATUS_READY_MASK,
            level: (raw & STATUS_LEVEL_MASK) as u8,
            limit: ((raw >> STATUS_LIMIT_SHIFT) & STATUS_LEVEL_MASK) as u8,
            capability: raw & STATUS_CAPABILITY_FLAG != 0,
        }
    }

    /// Compose the write payload that sets `level` starting from this status.
    pub fn encode_write(&self, level: u8) -> u32 {
        encode(self.raw, level)
    }
}

/// Compose a write payload from the current raw status and a new level.
///
/// Levels above 15 are truncated to the 4-bit field.
pub fn encode(current_raw: u32, level: u8) -> u32 {
    let capability = if current_raw & STATUS_CAPABILITY_FLAG != 0 {
        WRITE_CAPABILITY_FLAG
    } else {
        0
    };
    capability | (current_raw & STATUS_PRESERVED_MASK) | (u32::from(level) & STATUS_LEVEL_MASK)
}

/// Whether two successive notification values indicate a backlight change.
///
/// Bit 17 must differ and nothing above it; lower bits are ignored.
pub fn backlight_bit_toggled(old: u32, new: u32) -> bool {
    (old ^ new) >> NOTIFY_BACKLIGHT_BIT == 1
}
