//! Camera capability record.
//!
//! Everything the capture core needs to validate a geometry comes from here:
//! sensor extent, allowed pixel depths, the binning table, reference row
//! limits, dummy pixel counts and the metadata prefix size.

use serde::Serialize;

/// Hard maximum of reference rows any frame may carry.
pub const REFERENCE_ROW_MAX: u32 = 4094;

/// Gain table values are reported multiplied by this factor.
pub const GAIN_SCALE_FACTOR: u32 = 1000;

/// Fallback pixel depth when the capability mask is empty.
pub const DEFAULT_PIXEL_DEPTH: u32 = 12;

// =============================================================================
// Device Type
// =============================================================================

/// Camera model family, decoded from the capability device type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    /// GSENSE 400 sensor
    Gsense400,
    /// GSENSE 2020 sensor
    Gsense2020,
    /// GSENSE 4040 sensor
    Gsense4040,
    /// GSENSE 6060 sensor
    Gsense6060,
    /// Kodak 47051 CCD
    Kodak47051,
    /// Kodak 29050 CCD
    Kodak29050,
    /// DC230 42 mm
    Dc230_42,
    /// DC230 84 mm
    Dc230_84,
    /// DC4320
    Dc4320,
    /// Anything the table does not know about
    Unknown(u32),
}

impl DeviceType {
    /// Decode the raw type code.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0100_0400 => DeviceType::Gsense400,
            0x0100_2020 => DeviceType::Gsense2020,
            0x0100_4040 => DeviceType::Gsense4040,
            0x0100_6060 => DeviceType::Gsense6060,
            0x0204_7051 => DeviceType::Kodak47051,
            0x0202_9050 => DeviceType::Kodak29050,
            0x0302_3042 => DeviceType::Dc230_42,
            0x0302_3084 => DeviceType::Dc230_84,
            0x0300_4320 => DeviceType::Dc4320,
            other => DeviceType::Unknown(other),
        }
    }

    /// The raw type code.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            DeviceType::Gsense400 => 0x0100_0400,
            DeviceType::Gsense2020 => 0x0100_2020,
            DeviceType::Gsense4040 => 0x0100_4040,
            DeviceType::Gsense6060 => 0x0100_6060,
            DeviceType::Kodak47051 => 0x0204_7051,
            DeviceType::Kodak29050 => 0x0202_9050,
            DeviceType::Dc230_42 => 0x0302_3042,
            DeviceType::Dc230_84 => 0x0302_3084,
            DeviceType::Dc4320 => 0x0300_4320,
            DeviceType::Unknown(code) => code,
        }
    }

    /// True for the GSENSE family, which supports dual-gain HDR readout.
    #[must_use]
    pub fn is_gsense(self) -> bool {
        matches!(
            self,
            DeviceType::Gsense400
                | DeviceType::Gsense2020
                | DeviceType::Gsense4040
                | DeviceType::Gsense6060
        )
    }
}

// =============================================================================
// Binning Table
// =============================================================================

const RANGE_FLAG: u32 = 0x8000;
const VALUE_MASK: u32 = 0x7FFF;

/// Supported binning pairs.
///
/// Each entry packs the horizontal factor in the upper 16 bits and the
/// vertical factor in the lower 16 bits. When bit 15 of a half is set, every
/// value from 1 up to the masked value is allowed in that direction, so
/// `0x8800_8800` allows 1..=2048 both ways. 1:1 binning is always allowed and
/// an empty table means 1:1 only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinningTable {
    entries: Vec<u32>,
}

impl BinningTable {
    /// Table from raw entries.
    #[must_use]
    pub fn new(entries: Vec<u32>) -> Self {
        Self { entries }
    }

    /// Table that only allows 1:1.
    #[must_use]
    pub fn one_to_one() -> Self {
        Self::default()
    }

    /// Pack a horizontal and vertical half into one entry.
    #[must_use]
    pub fn entry(horizontal: u16, vertical: u16) -> u32 {
        (u32::from(horizontal) << 16) | u32::from(vertical)
    }

    /// Raw entries as reported by the camera.
    #[must_use]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Whether the (horizontal, vertical) pair is permitted.
    #[must_use]
    pub fn allows(&self, horizontal: u32, vertical: u32) -> bool {
        if horizontal == 1 && vertical == 1 {
            return true;
        }
        self.entries.iter().any(|&entry| {
            half_allows(entry >> 16, horizontal) && half_allows(entry & 0xFFFF, vertical)
        })
    }
}

fn half_allows(half: u32, value: u32) -> bool {
    if half & RANGE_FLAG != 0 {
        (1..=half & VALUE_MASK).contains(&value)
    } else {
        half == value
    }
}

// =============================================================================
// Pixel Depths
// =============================================================================

/// Bitmask of allowed pixel depths: bit `k` set means depth `k + 1` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelDepths(pub u32);

impl PixelDepths {
    /// Mask allowing exactly the listed depths.
    #[must_use]
    pub fn from_depths(depths: &[u32]) -> Self {
        Self(
            depths
                .iter()
                .filter(|&&d| (1..=32).contains(&d))
                .fold(0, |mask, d| mask | (1 << (d - 1))),
        )
    }

    /// Whether `depth` bits per pixel is allowed.
    #[must_use]
    pub fn allows(self, depth: u32) -> bool {
        (1..=32).contains(&depth) && self.0 & (1 << (depth - 1)) != 0
    }

    /// Highest allowed depth, or [`DEFAULT_PIXEL_DEPTH`] for an empty mask.
    #[must_use]
    pub fn max_depth(self) -> u32 {
        if self.0 == 0 {
            DEFAULT_PIXEL_DEPTH
        } else {
            32 - self.0.leading_zeros()
        }
    }
}

// =============================================================================
// Dummy Pixels
// =============================================================================

/// Dummy pixel counts surrounding a padded row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DummyPixels {
    /// Pixels before the row data
    pub pre_row: u16,
    /// Pixels after the row data
    pub post_row: u16,
}

impl DummyPixels {
    /// Decode the packed capability word (upper 16 bits pre-row, lower post-row).
    #[must_use]
    pub fn from_packed(packed: u32) -> Self {
        Self {
            pre_row: (packed >> 16) as u16,
            post_row: (packed & 0xFFFF) as u16,
        }
    }

    /// Total dummy pixels in one padded row.
    #[must_use]
    pub fn per_row(self) -> u32 {
        u32::from(self.pre_row) + u32::from(self.post_row)
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// What a connected camera can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Camera model family
    pub device_type: DeviceType,
    /// Sensor width in pixels
    pub max_width: u32,
    /// Sensor height in pixels
    pub max_height: u32,
    /// Allowed pixel depths
    pub pixel_depths: PixelDepths,
    /// Allowed binning pairs
    pub binning_table: BinningTable,
    /// Maximum black level adjustment value
    pub black_level_max: u32,
    /// Maximum black sun adjustment value
    pub black_sun_max: u32,
    /// Entries in the low gain table
    pub low_gain_entries: u32,
    /// Entries in the high gain table
    pub high_gain_entries: u32,
    /// Row scan time in nanoseconds
    pub row_scan_time_ns: u32,
    /// Dummy pixels added to padded rows
    pub dummy_pixels: DummyPixels,
    /// Whether horizontal scan direction can be inverted
    pub horizontal_scan_invertible: bool,
    /// Whether vertical scan direction can be inverted
    pub vertical_scan_invertible: bool,
    /// Non-volatile user storage in bytes
    pub nv_storage_bytes: u32,
    /// Pre-frame reference rows, a hard limit
    pub pre_frame_reference_rows: u32,
    /// Post-frame reference rows nominally available; more may be requested
    pub post_frame_reference_rows: u32,
    /// Bytes of metadata prefixed to every frame
    pub metadata_size: u32,
}

impl Capabilities {
    /// Highest pixel depth the camera supports.
    #[must_use]
    pub fn max_pixel_depth(&self) -> u32 {
        self.pixel_depths.max_depth()
    }
}
