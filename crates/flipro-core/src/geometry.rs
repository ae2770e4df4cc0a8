//! Frame geometry: expected raw frame size and layout.
//!
//! A raw frame is laid out as
//!
//! ```text
//! [metadata][channel 0][channel 1, HDR only]
//! ```
//!
//! and every channel block is one packed sample stream:
//!
//! ```text
//! pre reference rows | image rows | post reference rows
//! ```
//!
//! Reference rows are as wide as the binned image. When dummy pixels are
//! enabled every other image row, starting with the second, carries the
//! capability's pre-row dummy pixels before its samples and the post-row dummy
//! pixels after them. With correlated multiple sampling each sensor pixel
//! (image or reference) carries `samples_per_pixel` consecutive samples.
//! Metadata appears once; HDR doubles only the channel payload.
//!
//! [`FrameGeometry::compute`] is a pure function of the session settings and
//! the camera capabilities. It must be recomputed whenever any input changes.

use crate::capabilities::{Capabilities, DummyPixels, REFERENCE_ROW_MAX};
use crate::error::GeometryError;
use crate::settings::SessionSettings;
use serde::Serialize;
use std::ops::Range;

// =============================================================================
// Wire Conversions
// =============================================================================

/// Bytes needed for `pixels` 12-bit pixels: `ceil(pixels * 1.5)`.
#[must_use]
pub const fn pixels_to_frame_bytes(pixels: u64) -> u64 {
    if pixels & 1 == 1 {
        ((pixels * 3) >> 1) + 1
    } else {
        (pixels * 3) >> 1
    }
}

/// 12-bit pixels held by `bytes` bytes.
///
/// Truncates: for an odd pixel count the round trip through
/// [`pixels_to_frame_bytes`] is not the identity.
#[must_use]
pub const fn frame_bytes_to_pixels(bytes: u64) -> u64 {
    (bytes << 1) / 3
}

/// Bytes needed for a `width` x `height` 12-bit image.
#[must_use]
pub const fn dimensions_to_frame_bytes(width: u64, height: u64) -> u64 {
    pixels_to_frame_bytes(width * height)
}

// =============================================================================
// Sample Encoding
// =============================================================================

/// How samples are stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleEncoding {
    /// One byte per sample (depth up to 8)
    Byte,
    /// Two samples in three bytes (depth 12)
    Packed12,
    /// Two bytes per sample, little endian
    Word,
}

impl SampleEncoding {
    /// Encoding used for a pixel depth.
    #[must_use]
    pub fn for_depth(depth: u32) -> Self {
        match depth {
            0..=8 => SampleEncoding::Byte,
            12 => SampleEncoding::Packed12,
            _ => SampleEncoding::Word,
        }
    }

    /// Bits available to one sample.
    #[must_use]
    pub fn container_bits(self) -> u32 {
        match self {
            SampleEncoding::Byte => 8,
            SampleEncoding::Packed12 => 12,
            SampleEncoding::Word => 16,
        }
    }

    /// Wire bytes for a stream of `samples` samples.
    #[must_use]
    pub fn bytes_for(self, samples: u64) -> Option<u64> {
        match self {
            SampleEncoding::Byte => Some(samples),
            SampleEncoding::Packed12 => samples.checked_mul(3).map(|_| pixels_to_frame_bytes(samples)),
            SampleEncoding::Word => samples.checked_mul(2),
        }
    }
}

// =============================================================================
// Frame Geometry
// =============================================================================

/// Sample counts of one channel block, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleBreakdown {
    /// Image pixel samples
    pub image: u64,
    /// Reference row samples (pre and post)
    pub reference: u64,
    /// Dummy pixel samples
    pub dummy: u64,
}

impl SampleBreakdown {
    /// All samples in the block.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.image + self.reference + self.dummy
    }
}

/// Immutable snapshot of the frame layout a capture will produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameGeometry {
    col_offset: u32,
    row_offset: u32,
    area_width: u32,
    area_height: u32,
    bin_x: u32,
    bin_y: u32,
    width: u32,
    height: u32,
    pre_reference_rows: u32,
    post_reference_rows: u32,
    dummy: DummyPixels,
    pixel_depth: u32,
    lsb_offset: u32,
    encoding: SampleEncoding,
    hdr: bool,
    samples_per_pixel: u32,
    image_data: bool,
    metadata_bytes: usize,
    breakdown: SampleBreakdown,
    channel_bytes: usize,
    total_bytes: usize,
}

impl FrameGeometry {
    /// Validate `settings` against `caps` and compute the frame layout.
    pub fn compute(settings: &SessionSettings, caps: &Capabilities) -> Result<Self, GeometryError> {
        let area = settings.area;
        if area.width == 0 || area.height == 0 {
            return Err(GeometryError::EmptyArea {
                width: area.width,
                height: area.height,
            });
        }
        let fits_h = area.col_offset.checked_add(area.width).is_some_and(|end| end <= caps.max_width);
        let fits_v = area.row_offset.checked_add(area.height).is_some_and(|end| end <= caps.max_height);
        if !fits_h || !fits_v {
            return Err(GeometryError::AreaOutOfBounds {
                col_offset: area.col_offset,
                row_offset: area.row_offset,
                width: area.width,
                height: area.height,
                max_width: caps.max_width,
                max_height: caps.max_height,
            });
        }

        let binning = settings.binning;
        if binning.horizontal == 0
            || binning.vertical == 0
            || !caps.binning_table.allows(binning.horizontal, binning.vertical)
        {
            return Err(GeometryError::UnsupportedBinning {
                horizontal: binning.horizontal,
                vertical: binning.vertical,
            });
        }
        let width = area.width / binning.horizontal;
        let height = area.height / binning.vertical;
        if width == 0 || height == 0 {
            return Err(GeometryError::BinnedAreaEmpty {
                horizontal: binning.horizontal,
                vertical: binning.vertical,
                width: area.width,
                height: area.height,
            });
        }

        let pixel = settings.pixel;
        if !caps.pixel_depths.allows(pixel.depth) {
            return Err(GeometryError::UnsupportedPixelDepth {
                depth: pixel.depth,
                mask: caps.pixel_depths.0,
            });
        }
        let encoding = SampleEncoding::for_depth(pixel.depth);
        let used_bits = pixel.depth.checked_add(pixel.lsb_offset);
        if !used_bits.is_some_and(|bits| bits <= encoding.container_bits()) {
            return Err(GeometryError::InvalidLsbOffset {
                lsb_offset: pixel.lsb_offset,
                depth: pixel.depth,
                container_bits: encoding.container_bits(),
            });
        }

        if settings.pre_reference_rows > caps.pre_frame_reference_rows {
            return Err(GeometryError::TooManyPreReferenceRows {
                requested: settings.pre_reference_rows,
                max: caps.pre_frame_reference_rows,
            });
        }
        let reference_rows = settings
            .pre_reference_rows
            .checked_add(settings.post_reference_rows)
            .filter(|&rows| rows <= REFERENCE_ROW_MAX)
            .ok_or(GeometryError::TooManyPostReferenceRows {
                requested: settings.post_reference_rows,
                max: REFERENCE_ROW_MAX.saturating_sub(settings.pre_reference_rows),
            })?;

        let dummy = if settings.dummy_pixels && settings.image_data {
            caps.dummy_pixels
        } else {
            DummyPixels::default()
        };
        let spp = u64::from(settings.samples_per_pixel.count());
        let w = u64::from(width);
        let h = u64::from(height);
        let reference_rows = u64::from(reference_rows);

        let breakdown = SampleBreakdown {
            image: if settings.image_data { w * h * spp } else { 0 },
            reference: reference_rows * w * spp,
            dummy: if settings.image_data {
                (h / 2) * u64::from(dummy.per_row())
            } else {
                0
            },
        };

        let channel_bytes = encoding
            .bytes_for(breakdown.total())
            .ok_or(GeometryError::Overflow { detail: "channel payload" })?;
        let channels: u64 = if settings.hdr { 2 } else { 1 };
        let total = channel_bytes
            .checked_mul(channels)
            .and_then(|payload| payload.checked_add(u64::from(caps.metadata_size)))
            .ok_or(GeometryError::Overflow { detail: "frame total" })?;

        Ok(Self {
            col_offset: area.col_offset,
            row_offset: area.row_offset,
            area_width: area.width,
            area_height: area.height,
            bin_x: binning.horizontal,
            bin_y: binning.vertical,
            width,
            height,
            pre_reference_rows: settings.pre_reference_rows,
            post_reference_rows: settings.post_reference_rows,
            dummy,
            pixel_depth: pixel.depth,
            lsb_offset: pixel.lsb_offset,
            encoding,
            hdr: settings.hdr,
            samples_per_pixel: settings.samples_per_pixel.count(),
            image_data: settings.image_data,
            metadata_bytes: to_usize(u64::from(caps.metadata_size), "metadata")?,
            breakdown,
            channel_bytes: to_usize(channel_bytes, "channel payload")?,
            total_bytes: to_usize(total, "frame total")?,
        })
    }

    /// Exact size of a raw frame in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Size of the metadata prefix.
    #[must_use]
    pub fn metadata_bytes(&self) -> usize {
        self.metadata_bytes
    }

    /// Size of one channel block.
    #[must_use]
    pub fn channel_bytes(&self) -> usize {
        self.channel_bytes
    }

    /// 1 for LDR frames, 2 for HDR frames.
    #[must_use]
    pub fn channels(&self) -> usize {
        if self.hdr {
            2
        } else {
            1
        }
    }

    /// Byte range of the metadata prefix.
    #[must_use]
    pub fn metadata_range(&self) -> Range<usize> {
        0..self.metadata_bytes
    }

    /// Byte range of channel block `index`, if the frame has that channel.
    #[must_use]
    pub fn channel_range(&self, index: usize) -> Option<Range<usize>> {
        (index < self.channels()).then(|| {
            let start = self.metadata_bytes + index * self.channel_bytes;
            start..start + self.channel_bytes
        })
    }

    /// Sample counts within one channel block.
    #[must_use]
    pub fn breakdown(&self) -> SampleBreakdown {
        self.breakdown
    }

    /// Output columns after binning.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Output rows after binning.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels in one decoded plane; zero when image data is disabled.
    #[must_use]
    pub fn plane_pixels(&self) -> usize {
        if self.image_data {
            self.width as usize * self.height as usize
        } else {
            0
        }
    }

    /// Readout offset on the sensor as (column, row).
    #[must_use]
    pub fn offset(&self) -> (u32, u32) {
        (self.col_offset, self.row_offset)
    }

    /// Readout area in unbinned sensor pixels as (width, height).
    #[must_use]
    pub fn area(&self) -> (u32, u32) {
        (self.area_width, self.area_height)
    }

    /// Binning as (horizontal, vertical).
    #[must_use]
    pub fn binning(&self) -> (u32, u32) {
        (self.bin_x, self.bin_y)
    }

    /// Reference rows as (pre, post).
    #[must_use]
    pub fn reference_rows(&self) -> (u32, u32) {
        (self.pre_reference_rows, self.post_reference_rows)
    }

    /// Dummy pixels on each padded row; zero when disabled.
    #[must_use]
    pub fn dummy_pixels(&self) -> DummyPixels {
        self.dummy
    }

    /// Bits per pixel.
    #[must_use]
    pub fn pixel_depth(&self) -> u32 {
        self.pixel_depth
    }

    /// Bit position of the pixel LSB inside its container.
    #[must_use]
    pub fn lsb_offset(&self) -> u32 {
        self.lsb_offset
    }

    /// Wire encoding of each sample.
    #[must_use]
    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Whether both gain channels are present.
    #[must_use]
    pub fn hdr(&self) -> bool {
        self.hdr
    }

    /// Samples per pixel.
    #[must_use]
    pub fn samples_per_pixel(&self) -> u32 {
        self.samples_per_pixel
    }

    /// Whether image rows are present.
    #[must_use]
    pub fn image_data(&self) -> bool {
        self.image_data
    }

    /// Index, within a channel block, of the first sample of output pixel (`row`, `col`).
    #[must_use]
    pub fn pixel_sample_index(&self, row: u32, col: u32) -> u64 {
        let spp = u64::from(self.samples_per_pixel);
        let w = u64::from(self.width);
        let row = u64::from(row);
        let pre_refs = u64::from(self.pre_reference_rows) * w * spp;
        let padded_before = (row / 2) * u64::from(self.dummy.per_row());
        let lead = if row % 2 == 1 {
            u64::from(self.dummy.pre_row)
        } else {
            0
        };
        pre_refs + row * w * spp + padded_before + lead + u64::from(col) * spp
    }
}

fn to_usize(value: u64, detail: &'static str) -> Result<usize, GeometryError> {
    usize::try_from(value).map_err(|_| GeometryError::Overflow { detail })
}
