//! Raw frame to 16-bit image planes.
//!
//! An [`ImageUnpacker`] decodes a raw frame into the planes a caller asks for
//! and keeps every plane, histogram and metadata buffer in pools between
//! calls. Buffers live in the caller's [`UnpackedImageSet`] while in use and
//! go back to the pool when a plane is no longer requested or the set is
//! freed. Only a change in the required size causes a reallocation.
//!
//! In LDR frames the single channel fills every requested plane. In HDR frames
//! the channel blocks are assigned to the low and high planes per the model
//! profile, and the merged plane combines them through its merge policy.

pub mod packing;

use crate::error::UnpackError;
use crate::merge::{ChannelOrder, ModelProfile};
use crate::stats::{self, StatsRequest, UnpackedStats};
use flipro_core::geometry::SampleEncoding;
use flipro_core::{FrameGeometry, LogContext};
use flipro_pool::{BufferPool, PoolMetrics, TrackedBuffer};
use packing::{decode_sample, depth_mask};
use std::fmt;
use tracing::{debug, trace};

/// Bit depth of the merged plane.
pub const MERGED_PLANE_DEPTH: u32 = 16;

/// One decoded image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneKind {
    /// Low gain channel
    Low,
    /// High gain channel
    High,
    /// Combination of both channels
    Merged,
}

impl PlaneKind {
    /// Every plane, in storage order.
    pub const ALL: [PlaneKind; 3] = [PlaneKind::Low, PlaneKind::High, PlaneKind::Merged];

    fn flag(self) -> u16 {
        match self {
            PlaneKind::Low => 0x1,
            PlaneKind::High => 0x2,
            PlaneKind::Merged => 0x4,
        }
    }
}

impl fmt::Display for PlaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaneKind::Low => "low",
            PlaneKind::High => "high",
            PlaneKind::Merged => "merged",
        };
        write!(f, "{}", label)
    }
}

/// Which outputs an unpack call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneRequest {
    /// Low gain plane
    pub low: bool,
    /// High gain plane
    pub high: bool,
    /// Merged plane
    pub merged: bool,
    /// Processed metadata header
    pub metadata: bool,
}

impl PlaneRequest {
    /// Nothing.
    pub const NONE: Self = Self {
        low: false,
        high: false,
        merged: false,
        metadata: false,
    };

    /// Every plane and the metadata.
    pub const ALL: Self = Self {
        low: true,
        high: true,
        merged: true,
        metadata: true,
    };

    /// A single plane.
    #[must_use]
    pub fn only(kind: PlaneKind) -> Self {
        Self::NONE.with(kind)
    }

    /// Add a plane.
    #[must_use]
    pub fn with(mut self, kind: PlaneKind) -> Self {
        match kind {
            PlaneKind::Low => self.low = true,
            PlaneKind::High => self.high = true,
            PlaneKind::Merged => self.merged = true,
        }
        self
    }

    /// Add the metadata header.
    #[must_use]
    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    /// Whether `kind` is requested.
    #[must_use]
    pub fn wants(&self, kind: PlaneKind) -> bool {
        match kind {
            PlaneKind::Low => self.low,
            PlaneKind::High => self.high,
            PlaneKind::Merged => self.merged,
        }
    }
}

// =============================================================================
// Processed Metadata
// =============================================================================

/// Magic opening every processed metadata block.
pub const PROCESSED_METADATA_MAGIC: [u8; 4] = *b"FPUM";

/// Current processed metadata layout version.
pub const PROCESSED_METADATA_VERSION: u16 = 1;

/// Size of the processed metadata block.
pub const PROCESSED_METADATA_LEN: usize = 32;

const FLAG_HDR: u16 = 0x8;

/// Description of an unpacked frame, as opposed to the raw sensor metadata.
///
/// Encoded little endian:
///
/// ```text
///  0  magic "FPUM"        16  sample bits (u16)     26  raw metadata len (u32)
///  4  version (u16)       18  binning x (u16)       30  source pixel depth (u16)
///  6  plane flags (u16)   20  binning y (u16)
///  8  width (u32)         22  pre reference rows (u16)
/// 12  height (u32)        24  post reference rows (u16)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedMetadata {
    /// Planes present: bit 0 low, bit 1 high, bit 2 merged, bit 3 HDR source
    pub plane_flags: u16,
    /// Plane width
    pub width: u32,
    /// Plane height
    pub height: u32,
    /// Bits per plane sample
    pub sample_bits: u16,
    /// Horizontal binning
    pub bin_x: u16,
    /// Vertical binning
    pub bin_y: u16,
    /// Pre reference rows in the source frame
    pub pre_reference_rows: u16,
    /// Post reference rows in the source frame
    pub post_reference_rows: u16,
    /// Length of the raw sensor metadata prefix
    pub raw_metadata_len: u32,
    /// Pixel depth of the source frame
    pub pixel_depth: u16,
}

impl ProcessedMetadata {
    fn describe(geometry: &FrameGeometry, request: PlaneRequest) -> Self {
        let narrow = |value: u32| u16::try_from(value).unwrap_or(u16::MAX);
        let mut plane_flags = PlaneKind::ALL
            .iter()
            .filter(|kind| request.wants(**kind))
            .fold(0, |flags, kind| flags | kind.flag());
        if geometry.hdr() {
            plane_flags |= FLAG_HDR;
        }
        let (bin_x, bin_y) = geometry.binning();
        let (pre, post) = geometry.reference_rows();
        Self {
            plane_flags,
            width: geometry.width(),
            height: geometry.height(),
            sample_bits: 16,
            bin_x: narrow(bin_x),
            bin_y: narrow(bin_y),
            pre_reference_rows: narrow(pre),
            post_reference_rows: narrow(post),
            raw_metadata_len: u32::try_from(geometry.metadata_bytes()).unwrap_or(u32::MAX),
            pixel_depth: narrow(geometry.pixel_depth()),
        }
    }

    /// Whether the flags mark `kind` as present.
    #[must_use]
    pub fn has_plane(&self, kind: PlaneKind) -> bool {
        self.plane_flags & kind.flag() != 0
    }

    /// Whether the source frame was HDR.
    #[must_use]
    pub fn hdr(&self) -> bool {
        self.plane_flags & FLAG_HDR != 0
    }

    /// Wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; PROCESSED_METADATA_LEN] {
        let mut out = [0u8; PROCESSED_METADATA_LEN];
        out[0..4].copy_from_slice(&PROCESSED_METADATA_MAGIC);
        out[4..6].copy_from_slice(&PROCESSED_METADATA_VERSION.to_le_bytes());
        out[6..8].copy_from_slice(&self.plane_flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out[16..18].copy_from_slice(&self.sample_bits.to_le_bytes());
        out[18..20].copy_from_slice(&self.bin_x.to_le_bytes());
        out[20..22].copy_from_slice(&self.bin_y.to_le_bytes());
        out[22..24].copy_from_slice(&self.pre_reference_rows.to_le_bytes());
        out[24..26].copy_from_slice(&self.post_reference_rows.to_le_bytes());
        out[26..30].copy_from_slice(&self.raw_metadata_len.to_le_bytes());
        out[30..32].copy_from_slice(&self.pixel_depth.to_le_bytes());
        out
    }

    /// Parse a block produced by [`ProcessedMetadata::encode`].
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..PROCESSED_METADATA_LEN)?;
        if bytes[0..4] != PROCESSED_METADATA_MAGIC {
            return None;
        }
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        if u16_at(4) != PROCESSED_METADATA_VERSION {
            return None;
        }
        Some(Self {
            plane_flags: u16_at(6),
            width: u32_at(8),
            height: u32_at(12),
            sample_bits: u16_at(16),
            bin_x: u16_at(18),
            bin_y: u16_at(20),
            pre_reference_rows: u16_at(22),
            post_reference_rows: u16_at(24),
            raw_metadata_len: u32_at(26),
            pixel_depth: u16_at(30),
        })
    }
}

// =============================================================================
// Unpacked Image Set
// =============================================================================

/// Decoded planes of one frame. A plane is present iff it was requested.
#[derive(Debug, Default)]
pub struct UnpackedImageSet {
    metadata: Option<TrackedBuffer<u8>>,
    low: Option<TrackedBuffer<u16>>,
    high: Option<TrackedBuffer<u16>>,
    merged: Option<TrackedBuffer<u16>>,
    width: u32,
    height: u32,
    pixel_depth: u32,
}

impl UnpackedImageSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples of a plane, row major.
    #[must_use]
    pub fn plane(&self, kind: PlaneKind) -> Option<&[u16]> {
        self.plane_buffer(kind).map(TrackedBuffer::as_slice)
    }

    /// The buffer behind a plane, for capacity and identity checks.
    #[must_use]
    pub fn plane_buffer(&self, kind: PlaneKind) -> Option<&TrackedBuffer<u16>> {
        match kind {
            PlaneKind::Low => self.low.as_ref(),
            PlaneKind::High => self.high.as_ref(),
            PlaneKind::Merged => self.merged.as_ref(),
        }
    }

    /// Processed metadata bytes, if requested.
    #[must_use]
    pub fn metadata(&self) -> Option<&[u8]> {
        self.metadata.as_ref().map(TrackedBuffer::as_slice)
    }

    /// Parsed processed metadata, if requested.
    #[must_use]
    pub fn processed_metadata(&self) -> Option<ProcessedMetadata> {
        self.metadata().and_then(ProcessedMetadata::parse)
    }

    /// Plane width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Plane height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Meaningful bits per sample in a plane.
    #[must_use]
    pub fn plane_depth(&self, kind: PlaneKind) -> u32 {
        match kind {
            PlaneKind::Merged => MERGED_PLANE_DEPTH,
            PlaneKind::Low | PlaneKind::High => self.pixel_depth,
        }
    }

    /// Whether no buffer is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.low.is_none() && self.high.is_none() && self.merged.is_none()
    }

    fn slot_mut(&mut self, kind: PlaneKind) -> &mut Option<TrackedBuffer<u16>> {
        match kind {
            PlaneKind::Low => &mut self.low,
            PlaneKind::High => &mut self.high,
            PlaneKind::Merged => &mut self.merged,
        }
    }
}

// =============================================================================
// Decoder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MetadataTag;

struct ChannelDecoder<'a> {
    block: &'a [u8],
    encoding: SampleEncoding,
    lsb_offset: u32,
    mask: u16,
    spp: usize,
}

impl<'a> ChannelDecoder<'a> {
    fn new(block: &'a [u8], geometry: &FrameGeometry) -> Self {
        Self {
            block,
            encoding: geometry.encoding(),
            lsb_offset: geometry.lsb_offset(),
            mask: depth_mask(geometry.pixel_depth()),
            spp: geometry.samples_per_pixel() as usize,
        }
    }

    /// Pixel whose first sample sits at `first`; multiple samples are averaged.
    #[inline]
    fn pixel(&self, first: usize) -> u16 {
        let sample = |i| decode_sample(self.block, self.encoding, i, self.lsb_offset, self.mask);
        if self.spp == 1 {
            return sample(first);
        }
        let sum: u32 = (first..first + self.spp).map(|i| u32::from(sample(i))).sum();
        let spp = self.spp as u32;
        ((sum + spp / 2) / spp) as u16
    }
}

/// Visit every output pixel as (plane index, first sample index).
fn for_each_pixel(geometry: &FrameGeometry, out: &mut [u16], mut f: impl FnMut(usize) -> u16) {
    let width = geometry.width() as usize;
    if width == 0 {
        return;
    }
    let spp = geometry.samples_per_pixel() as usize;
    for (row, line) in out.chunks_exact_mut(width).enumerate() {
        let start = geometry.pixel_sample_index(row as u32, 0) as usize;
        for (col, value) in line.iter_mut().enumerate() {
            *value = f(start + col * spp);
        }
    }
}

fn channel_block<'a>(raw: &'a [u8], geometry: &FrameGeometry, index: usize) -> &'a [u8] {
    geometry
        .channel_range(index)
        .and_then(|range| raw.get(range))
        .unwrap_or_default()
}

// =============================================================================
// Image Unpacker
// =============================================================================

/// Decodes raw frames into pooled planes and computes their statistics.
#[derive(Debug)]
pub struct ImageUnpacker {
    planes: BufferPool<PlaneKind, u16>,
    histograms: BufferPool<PlaneKind, u64>,
    metadata: BufferPool<MetadataTag, u8>,
    profile: ModelProfile,
    log: LogContext,
}

impl ImageUnpacker {
    /// Unpacker for a camera model.
    #[must_use]
    pub fn new(profile: ModelProfile, log: LogContext) -> Self {
        Self {
            planes: BufferPool::new(),
            histograms: BufferPool::new(),
            metadata: BufferPool::new(),
            profile,
            log,
        }
    }

    /// Current model profile.
    #[must_use]
    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Replace the model profile.
    pub fn set_profile(&mut self, profile: ModelProfile) {
        self.profile = profile;
    }

    /// Decode `raw` into the planes named by `request`.
    ///
    /// Planes not requested are released from `set` back to the pool. On a
    /// sizing failure the failed plane is absent from `set` and the error is
    /// returned; `raw` is never modified.
    pub fn unpack(
        &mut self,
        raw: &[u8],
        geometry: &FrameGeometry,
        request: PlaneRequest,
        set: &mut UnpackedImageSet,
    ) -> Result<(), UnpackError> {
        let _log = self.log.enter();

        let required = geometry.total_bytes();
        if raw.len() < required {
            return Err(UnpackError::RawTooShort {
                required,
                provided: raw.len(),
            });
        }

        set.width = geometry.width();
        set.height = geometry.height();
        set.pixel_depth = geometry.pixel_depth();

        self.prepare_metadata(request.metadata, set)?;
        if let Some(buffer) = set.metadata.as_mut() {
            buffer
                .as_mut_slice()
                .copy_from_slice(&ProcessedMetadata::describe(geometry, request).encode());
        }

        let pixels = geometry.plane_pixels();
        for kind in PlaneKind::ALL {
            self.prepare_plane(kind, request.wants(kind), pixels, set)?;
        }

        let (low_index, high_index) = match (geometry.hdr(), self.profile.channel_order) {
            (false, _) => (0, 0),
            (true, ChannelOrder::LowThenHigh) => (0, 1),
            (true, ChannelOrder::HighThenLow) => (1, 0),
        };
        let low = ChannelDecoder::new(channel_block(raw, geometry, low_index), geometry);
        let high = ChannelDecoder::new(channel_block(raw, geometry, high_index), geometry);

        if let Some(plane) = set.low.as_mut() {
            for_each_pixel(geometry, plane.as_mut_slice(), |i| low.pixel(i));
        }
        if let Some(plane) = set.high.as_mut() {
            for_each_pixel(geometry, plane.as_mut_slice(), |i| high.pixel(i));
        }
        if let Some(plane) = set.merged.as_mut() {
            if geometry.hdr() {
                let depth = geometry.pixel_depth();
                let policy = &self.profile.merge;
                for_each_pixel(geometry, plane.as_mut_slice(), |i| {
                    policy.merge(low.pixel(i), high.pixel(i), depth)
                });
            } else {
                for_each_pixel(geometry, plane.as_mut_slice(), |i| low.pixel(i));
            }
        }

        trace!(
            width = geometry.width(),
            height = geometry.height(),
            hdr = geometry.hdr(),
            low = request.low,
            high = request.high,
            merged = request.merged,
            "frame unpacked"
        );
        Ok(())
    }

    /// Compute statistics for the planes named in `request`.
    ///
    /// Histograms are pooled the same way as planes. A requested plane that
    /// `set` does not hold is an error.
    pub fn statistics(
        &mut self,
        set: &UnpackedImageSet,
        request: &StatsRequest,
        out: &mut UnpackedStats,
    ) -> Result<(), UnpackError> {
        let _log = self.log.enter();
        request.validate()?;

        for kind in PlaneKind::ALL {
            if !request.planes.wants(kind) {
                if let Some(previous) = out.slot_mut(kind).take() {
                    self.histograms.release(kind, previous.into_histogram());
                }
                continue;
            }
            let plane = set.plane(kind).ok_or(UnpackError::PlaneMissing(kind))?;
            let buckets = 1usize << set.plane_depth(kind);

            let mut histogram = match out.slot_mut(kind).take() {
                Some(previous) => previous.into_histogram(),
                None => self.histograms.acquire(kind, buckets)?,
            };
            if let Err(err) = self.histograms.resize(&mut histogram, buckets) {
                self.histograms.release(kind, histogram);
                return Err(err.into());
            }

            *out.slot_mut(kind) = Some(stats::compute(
                plane,
                set.width(),
                request.lower_cutoff,
                request.upper_cutoff,
                histogram,
            ));
        }
        Ok(())
    }

    /// Return every buffer in `set` and `stats` to the pools.
    pub fn free(&mut self, set: &mut UnpackedImageSet, stats: &mut UnpackedStats) {
        if let Some(buffer) = set.metadata.take() {
            self.metadata.release(MetadataTag, buffer);
        }
        for kind in PlaneKind::ALL {
            if let Some(buffer) = set.slot_mut(kind).take() {
                self.planes.release(kind, buffer);
            }
            if let Some(previous) = stats.slot_mut(kind).take() {
                self.histograms.release(kind, previous.into_histogram());
            }
        }
    }

    /// Drop every pooled buffer back to the system.
    pub fn clear(&mut self) {
        let _log = self.log.enter();
        self.planes.clear();
        self.histograms.clear();
        self.metadata.clear();
        debug!("unpack pools cleared");
    }

    /// Reuse counters of the plane pool.
    #[must_use]
    pub fn plane_metrics(&self) -> PoolMetrics {
        self.planes.metrics()
    }

    /// Reuse counters of the histogram pool.
    #[must_use]
    pub fn histogram_metrics(&self) -> PoolMetrics {
        self.histograms.metrics()
    }

    fn prepare_metadata(&mut self, wanted: bool, set: &mut UnpackedImageSet) -> Result<(), UnpackError> {
        if !wanted {
            if let Some(buffer) = set.metadata.take() {
                self.metadata.release(MetadataTag, buffer);
            }
            return Ok(());
        }
        if set.metadata.is_none() {
            set.metadata = Some(self.metadata.acquire(MetadataTag, PROCESSED_METADATA_LEN)?);
        }
        Ok(())
    }

    fn prepare_plane(
        &mut self,
        kind: PlaneKind,
        wanted: bool,
        pixels: usize,
        set: &mut UnpackedImageSet,
    ) -> Result<(), UnpackError> {
        let slot = set.slot_mut(kind);
        if !wanted {
            if let Some(buffer) = slot.take() {
                self.planes.release(kind, buffer);
            }
            return Ok(());
        }
        let buffer = match slot.take() {
            Some(mut buffer) => match self.planes.resize(&mut buffer, pixels) {
                Ok(_) => buffer,
                Err(err) => {
                    self.planes.release(kind, buffer);
                    return Err(err.into());
                }
            },
            None => self.planes.acquire(kind, pixels)?,
        };
        *slot = Some(buffer);
        Ok(())
    }
}

impl Default for ImageUnpacker {
    fn default() -> Self {
        Self::new(ModelProfile::default(), LogContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::HighPreferredMerge;
    use flipro_core::capabilities::{BinningTable, Capabilities, DeviceType, DummyPixels, PixelDepths};
    use flipro_core::settings::{ImageArea, PixelConfig, SessionSettings};

    fn caps() -> Capabilities {
        Capabilities {
            device_type: DeviceType::Gsense400,
            max_width: 64,
            max_height: 64,
            pixel_depths: PixelDepths::from_depths(&[8, 12, 16]),
            binning_table: BinningTable::one_to_one(),
            black_level_max: 0,
            black_sun_max: 0,
            low_gain_entries: 0,
            high_gain_entries: 0,
            row_scan_time_ns: 0,
            dummy_pixels: DummyPixels {
                pre_row: 2,
                post_row: 1,
            },
            horizontal_scan_invertible: false,
            vertical_scan_invertible: false,
            nv_storage_bytes: 0,
            pre_frame_reference_rows: 4,
            post_frame_reference_rows: 4,
            metadata_size: 8,
        }
    }

    fn geometry(width: u32, height: u32, depth: u32, hdr: bool) -> FrameGeometry {
        let mut settings = SessionSettings::for_capabilities(&caps());
        settings.area = ImageArea::new(width, height);
        settings.pixel = PixelConfig::new(depth);
        settings.hdr = hdr;
        FrameGeometry::compute(&settings, &caps()).unwrap()
    }

    fn raw_frame(geometry: &FrameGeometry, channels: &[Vec<u16>]) -> Vec<u8> {
        let mut raw = vec![0xEE; geometry.metadata_bytes()];
        for samples in channels {
            packing::pack_samples(samples, geometry.encoding(), geometry.pixel_depth(), 0, &mut raw);
        }
        assert_eq!(raw.len(), geometry.total_bytes());
        raw
    }

    #[test]
    fn test_ldr_fills_every_requested_plane() {
        let g = geometry(4, 2, 12, false);
        let raw = raw_frame(&g, &[vec![1, 2, 3, 4, 5, 6, 7, 4095]]);
        let mut unpacker = ImageUnpacker::default();
        let mut set = UnpackedImageSet::new();
        unpacker.unpack(&raw, &g, PlaneRequest::ALL, &mut set).unwrap();

        let expected = [1, 2, 3, 4, 5, 6, 7, 4095];
        assert_eq!(set.plane(PlaneKind::Low), Some(&expected[..]));
        assert_eq!(set.plane(PlaneKind::High), Some(&expected[..]));
        assert_eq!(set.plane(PlaneKind::Merged), Some(&expected[..]));
    }

    #[test]
    fn test_hdr_channels_and_merge() {
        let g = geometry(2, 1, 12, true);
        let raw = raw_frame(&g, &[vec![100, 200], vec![4000, 4095]]);
        let mut unpacker = ImageUnpacker::new(
            ModelProfile::default().with_merge(HighPreferredMerge::with_scale(10.0)),
            LogContext::disabled(),
        );
        let mut set = UnpackedImageSet::new();
        unpacker.unpack(&raw, &g, PlaneRequest::ALL, &mut set).unwrap();

        assert_eq!(set.plane(PlaneKind::Low), Some(&[100, 200][..]));
        assert_eq!(set.plane(PlaneKind::High), Some(&[4000, 4095][..]));
        assert_eq!(set.plane(PlaneKind::Merged), Some(&[4000, 2000][..]));
        assert_eq!(set.plane_depth(PlaneKind::Merged), 16);
    }

    #[test]
    fn test_high_then_low_profile_swaps_blocks() {
        let g = geometry(2, 1, 16, true);
        let raw = raw_frame(&g, &[vec![9, 9], vec![1, 1]]);
        let mut unpacker = ImageUnpacker::new(
            ModelProfile::default().with_channel_order(ChannelOrder::HighThenLow),
            LogContext::disabled(),
        );
        let mut set = UnpackedImageSet::new();
        unpacker
            .unpack(&raw, &g, PlaneRequest::only(PlaneKind::High), &mut set)
            .unwrap();
        assert_eq!(set.plane(PlaneKind::High), Some(&[9, 9][..]));
        assert!(set.plane(PlaneKind::Low).is_none());
    }

    #[test]
    fn test_plane_present_iff_requested() {
        let g = geometry(4, 4, 8, false);
        let raw = raw_frame(&g, &[vec![7; 16]]);
        let mut unpacker = ImageUnpacker::default();
        let mut set = UnpackedImageSet::new();

        unpacker.unpack(&raw, &g, PlaneRequest::ALL, &mut set).unwrap();
        assert!(set.metadata().is_some());
        unpacker
            .unpack(&raw, &g, PlaneRequest::only(PlaneKind::Merged), &mut set)
            .unwrap();
        assert!(set.plane(PlaneKind::Low).is_none());
        assert!(set.plane(PlaneKind::High).is_none());
        assert!(set.plane(PlaneKind::Merged).is_some());
        assert!(set.metadata().is_none());
    }

    #[test]
    fn test_processed_metadata_describes_planes() {
        let g = geometry(4, 2, 12, true);
        let raw = raw_frame(&g, &[vec![0; 8], vec![0; 8]]);
        let mut unpacker = ImageUnpacker::default();
        let mut set = UnpackedImageSet::new();
        let request = PlaneRequest::only(PlaneKind::Low).with_metadata();
        unpacker.unpack(&raw, &g, request, &mut set).unwrap();

        let meta = set.processed_metadata().unwrap();
        assert!(meta.has_plane(PlaneKind::Low));
        assert!(!meta.has_plane(PlaneKind::Merged));
        assert!(meta.hdr());
        assert_eq!((meta.width, meta.height), (4, 2));
        assert_eq!(meta.raw_metadata_len, 8);
        assert_eq!(meta.pixel_depth, 12);
        // Distinct from the raw sensor prefix
        assert_ne!(set.metadata(), Some(&raw[..8]));
    }

    #[test]
    fn test_raw_too_short() {
        let g = geometry(4, 2, 12, false);
        let mut unpacker = ImageUnpacker::default();
        let mut set = UnpackedImageSet::new();
        assert!(matches!(
            unpacker.unpack(&[0; 4], &g, PlaneRequest::ALL, &mut set),
            Err(UnpackError::RawTooShort { .. })
        ));
    }

    #[test]
    fn test_free_returns_buffers_to_pool() {
        let g = geometry(4, 4, 8, false);
        let raw = raw_frame(&g, &[vec![1; 16]]);
        let mut unpacker = ImageUnpacker::default();
        let mut set = UnpackedImageSet::new();
        let mut stats = UnpackedStats::default();
        unpacker
            .unpack(&raw, &g, PlaneRequest::only(PlaneKind::Low), &mut set)
            .unwrap();
        let ptr = set.plane_buffer(PlaneKind::Low).unwrap().as_ptr();
        unpacker.free(&mut set, &mut stats);
        assert!(set.is_empty());

        unpacker
            .unpack(&raw, &g, PlaneRequest::only(PlaneKind::Low), &mut set)
            .unwrap();
        assert_eq!(set.plane_buffer(PlaneKind::Low).unwrap().as_ptr(), ptr);
        assert_eq!(unpacker.plane_metrics().reallocations, 1);
    }
}
