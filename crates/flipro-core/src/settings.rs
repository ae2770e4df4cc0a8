//! Session settings that feed frame geometry and capture timing.

use crate::capabilities::Capabilities;
use crate::text::ModeName;
use serde::Serialize;
use std::time::Duration;

/// Region of the sensor read out for each frame, in unbinned sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageArea {
    /// Start column
    pub col_offset: u32,
    /// Start row
    pub row_offset: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ImageArea {
    /// Area anchored at the sensor origin.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            col_offset: 0,
            row_offset: 0,
            width,
            height,
        }
    }

    /// Same size, shifted to the given offset.
    #[must_use]
    pub fn at(mut self, col_offset: u32, row_offset: u32) -> Self {
        self.col_offset = col_offset;
        self.row_offset = row_offset;
        self
    }
}

/// Horizontal and vertical binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Binning {
    /// Horizontal factor
    pub horizontal: u32,
    /// Vertical factor
    pub vertical: u32,
}

impl Binning {
    /// Binning factors.
    #[must_use]
    pub fn new(horizontal: u32, vertical: u32) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Pixel depth and LSB position within each sample container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelConfig {
    /// Bits per pixel
    pub depth: u32,
    /// Bit position of the pixel LSB inside its container
    pub lsb_offset: u32,
}

impl PixelConfig {
    /// Pixel configuration with a zero LSB offset.
    #[must_use]
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            lsb_offset: 0,
        }
    }
}

/// Correlated multiple sampling: samples taken per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SamplesPerPixel {
    /// Single sample
    #[default]
    One,
    /// Two samples
    Two,
    /// Four samples
    Four,
}

impl SamplesPerPixel {
    /// Sample count.
    #[must_use]
    pub fn count(self) -> u32 {
        match self {
            SamplesPerPixel::One => 1,
            SamplesPerPixel::Two => 2,
            SamplesPerPixel::Four => 4,
        }
    }

    /// Parse a sample count.
    #[must_use]
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(SamplesPerPixel::One),
            2 => Some(SamplesPerPixel::Two),
            4 => Some(SamplesPerPixel::Four),
            _ => None,
        }
    }
}

/// External trigger polarity and meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerType {
    /// Exposure starts on a falling edge
    FallingEdge,
    /// Exposure starts on a rising edge
    RisingEdge,
    /// Exposure lasts while the input is low
    ExposeActiveLow,
    /// Exposure lasts while the input is high
    ExposeActiveHigh,
}

/// How exposures are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TriggerMode {
    /// Exposures start on `CaptureStart`
    #[default]
    Software,
    /// Exposures start on the hardware trigger input
    External(TriggerType),
}

impl TriggerMode {
    /// True when frames arrive on a hardware trigger.
    #[must_use]
    pub fn is_external(self) -> bool {
        matches!(self, TriggerMode::External(_))
    }
}

/// Frame content selector, mostly for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FrameType {
    /// Regular exposure
    #[default]
    Normal,
    /// Shutter closed
    Dark,
    /// Zero-length exposure
    Bias,
    /// Light flash frame
    LightFlash,
    /// Dark flash frame
    DarkFlash,
}

/// A named readout mode. HDR is a property of the mode, not a separate switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorMode {
    /// Index the camera uses for this mode
    pub index: u32,
    /// Display name
    pub name: ModeName,
    /// Whether the mode reads out both gain channels
    pub hdr: bool,
}

/// Exposure time and inter-frame delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExposureSettings {
    /// Integration time
    pub exposure: Duration,
    /// Delay between consecutive exposures
    pub frame_delay: Duration,
}

impl ExposureSettings {
    /// Exposure with no inter-frame delay.
    #[must_use]
    pub fn new(exposure: Duration) -> Self {
        Self {
            exposure,
            frame_delay: Duration::ZERO,
        }
    }

    /// Time from one frame to the next.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        self.exposure + self.frame_delay
    }
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Everything a session can configure that affects frame layout or timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSettings {
    /// Readout area
    pub area: ImageArea,
    /// Binning factors
    pub binning: Binning,
    /// Pixel depth and LSB offset
    pub pixel: PixelConfig,
    /// Reference rows before the image
    pub pre_reference_rows: u32,
    /// Reference rows after the image
    pub post_reference_rows: u32,
    /// Dummy pixels on padded rows
    pub dummy_pixels: bool,
    /// Whether image rows are produced at all
    pub image_data: bool,
    /// Whether both gain channels are read out
    pub hdr: bool,
    /// Samples per pixel
    pub samples_per_pixel: SamplesPerPixel,
    /// Software or hardware triggered exposures
    pub trigger: TriggerMode,
    /// Exposure timing
    pub exposure: ExposureSettings,
    /// Frame content selector
    pub frame_type: FrameType,
}

impl SessionSettings {
    /// Full-sensor, unbinned, maximum depth defaults for a camera.
    #[must_use]
    pub fn for_capabilities(caps: &Capabilities) -> Self {
        Self {
            area: ImageArea::new(caps.max_width, caps.max_height),
            binning: Binning::default(),
            pixel: PixelConfig::new(caps.max_pixel_depth()),
            pre_reference_rows: 0,
            post_reference_rows: 0,
            dummy_pixels: false,
            image_data: true,
            hdr: false,
            samples_per_pixel: SamplesPerPixel::One,
            trigger: TriggerMode::Software,
            exposure: ExposureSettings::default(),
            frame_type: FrameType::Normal,
        }
    }
}
