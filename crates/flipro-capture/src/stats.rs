//! Per-plane statistics.
//!
//! The histogram has one bucket per representable value at the plane's depth
//! and is zeroed at the start of every computation. Mean comes from the running
//! sum; median, mode, spread and cutoffs come from the histogram. Extrema are
//! the first occurrence in row-major order.

use crate::error::UnpackError;
use crate::unpack::{PlaneKind, PlaneRequest};
use flipro_pool::TrackedBuffer;

/// Which planes to analyse, and where to put the cutoffs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsRequest {
    /// Planes to analyse; each must already be unpacked
    pub planes: PlaneRequest,
    /// Fraction of pixels at or below the lower cutoff
    pub lower_cutoff: f64,
    /// Fraction of pixels at or below the upper cutoff
    pub upper_cutoff: f64,
}

impl StatsRequest {
    /// Default cutoffs for the given planes.
    #[must_use]
    pub fn for_planes(planes: PlaneRequest) -> Self {
        Self {
            planes,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), UnpackError> {
        let ordered = 0.0 <= self.lower_cutoff
            && self.lower_cutoff <= self.upper_cutoff
            && self.upper_cutoff <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(UnpackError::InvalidCutoffs {
                lower: self.lower_cutoff,
                upper: self.upper_cutoff,
            })
        }
    }
}

impl Default for StatsRequest {
    fn default() -> Self {
        Self {
            planes: PlaneRequest::NONE,
            lower_cutoff: 0.001,
            upper_cutoff: 0.999,
        }
    }
}

/// A pixel position and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelLocation {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
    /// Pixel value
    pub value: u16,
}

/// Statistics of one plane.
#[derive(Debug)]
pub struct PlaneStatistics {
    /// Value at the lower cutoff fraction
    pub lower_cutoff: u16,
    /// Value at the upper cutoff fraction
    pub upper_cutoff: u16,
    /// Arithmetic mean
    pub mean: f64,
    /// Median; the mean of the two middle values for even counts
    pub median: f64,
    /// Most frequent value, lowest on ties
    pub mode: u16,
    /// Population standard deviation
    pub std_dev: f64,
    /// First brightest pixel
    pub brightest: PixelLocation,
    /// First dimmest pixel
    pub dimmest: PixelLocation,
    /// Pixels analysed
    pub pixel_count: u64,
    histogram: TrackedBuffer<u64>,
}

impl PlaneStatistics {
    /// Count per value.
    #[must_use]
    pub fn histogram(&self) -> &[u64] {
        self.histogram.as_slice()
    }

    /// The pooled histogram buffer, for capacity and identity checks.
    #[must_use]
    pub fn histogram_buffer(&self) -> &TrackedBuffer<u64> {
        &self.histogram
    }

    pub(crate) fn into_histogram(self) -> TrackedBuffer<u64> {
        self.histogram
    }
}

/// Statistics for each analysed plane.
#[derive(Debug, Default)]
pub struct UnpackedStats {
    low: Option<PlaneStatistics>,
    high: Option<PlaneStatistics>,
    merged: Option<PlaneStatistics>,
}

impl UnpackedStats {
    /// Statistics of a plane, if it was analysed.
    #[must_use]
    pub fn plane(&self, kind: PlaneKind) -> Option<&PlaneStatistics> {
        match kind {
            PlaneKind::Low => self.low.as_ref(),
            PlaneKind::High => self.high.as_ref(),
            PlaneKind::Merged => self.merged.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: PlaneKind) -> &mut Option<PlaneStatistics> {
        match kind {
            PlaneKind::Low => &mut self.low,
            PlaneKind::High => &mut self.high,
            PlaneKind::Merged => &mut self.merged,
        }
    }
}

/// Analyse `plane` into a pre-sized `histogram`.
pub(crate) fn compute(
    plane: &[u16],
    width: u32,
    lower_fraction: f64,
    upper_fraction: f64,
    mut histogram: TrackedBuffer<u64>,
) -> PlaneStatistics {
    histogram.fill(0);
    let mut stats = PlaneStatistics {
        lower_cutoff: 0,
        upper_cutoff: 0,
        mean: 0.0,
        median: 0.0,
        mode: 0,
        std_dev: 0.0,
        brightest: PixelLocation::default(),
        dimmest: PixelLocation::default(),
        pixel_count: plane.len() as u64,
        histogram,
    };
    let Some(&first) = plane.first() else {
        return stats;
    };

    let bins = stats.histogram.as_mut_slice();
    let last_bin = bins.len().saturating_sub(1);
    let width = width.max(1) as usize;
    let locate = |index: usize, value: u16| PixelLocation {
        x: (index % width) as u32,
        y: (index / width) as u32,
        value,
    };

    let mut sum: u64 = 0;
    let mut brightest = locate(0, first);
    let mut dimmest = brightest;
    for (index, &value) in plane.iter().enumerate() {
        if let Some(bin) = bins.get_mut(usize::from(value).min(last_bin)) {
            *bin += 1;
        }
        sum += u64::from(value);
        if value > brightest.value {
            brightest = locate(index, value);
        }
        if value < dimmest.value {
            dimmest = locate(index, value);
        }
    }

    let count = plane.len() as u64;
    let mean = sum as f64 / count as f64;
    let variance = bins
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n > 0)
        .map(|(value, &n)| {
            let delta = value as f64 - mean;
            n as f64 * delta * delta
        })
        .sum::<f64>()
        / count as f64;

    let mut mode = 0usize;
    for (value, &n) in bins.iter().enumerate() {
        if n > bins[mode] {
            mode = value;
        }
    }

    let median = if count % 2 == 1 {
        f64::from(value_at_rank(bins, count.div_ceil(2)))
    } else {
        let lower = value_at_rank(bins, count / 2);
        let upper = value_at_rank(bins, count / 2 + 1);
        (f64::from(lower) + f64::from(upper)) / 2.0
    };

    stats.lower_cutoff = value_at_rank(bins, cutoff_rank(lower_fraction, count));
    stats.upper_cutoff = value_at_rank(bins, cutoff_rank(upper_fraction, count));
    stats.mean = mean;
    stats.median = median;
    stats.mode = u16::try_from(mode).unwrap_or(u16::MAX);
    stats.std_dev = variance.sqrt();
    stats.brightest = brightest;
    stats.dimmest = dimmest;
    stats
}

/// 1-based rank of the pixel at `fraction` of the sorted plane.
fn cutoff_rank(fraction: f64, count: u64) -> u64 {
    ((fraction * count as f64).ceil() as u64).clamp(1, count)
}

/// Smallest value whose cumulative count reaches `rank`.
fn value_at_rank(bins: &[u64], rank: u64) -> u16 {
    let mut cumulative = 0u64;
    for (value, &n) in bins.iter().enumerate() {
        cumulative += n;
        if cumulative >= rank {
            return u16::try_from(value).unwrap_or(u16::MAX);
        }
    }
    u16::try_from(bins.len().saturating_sub(1)).unwrap_or(u16::MAX)
}
