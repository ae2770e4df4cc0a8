//! Dual-gain merge policies and per-model channel layout.

use crate::unpack::packing::depth_mask;
use flipro_core::capabilities::DeviceType;
use std::fmt;
use std::sync::Arc;

/// Order of the two channel blocks in an HDR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// Low gain block first
    #[default]
    LowThenHigh,
    /// High gain block first
    HighThenLow,
}

/// Combines one low gain and one high gain sample into a merged value.
pub trait MergePolicy: Send + Sync + fmt::Debug {
    /// Merged value for a pixel. `depth` is the bit depth of both inputs.
    fn merge(&self, low: u16, high: u16, depth: u32) -> u16;
}

/// Take the high gain sample unless it saturates, then fall back to the
/// scaled low gain sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighPreferredMerge {
    /// High gain value at and above which the sample counts as saturated.
    /// `None` means the full scale value of the pixel depth.
    pub saturation: Option<u16>,
    /// Factor applied to the low gain sample on fallback.
    pub low_scale: f64,
}

impl HighPreferredMerge {
    /// Policy with an explicit scale factor and full scale saturation.
    #[must_use]
    pub fn with_scale(low_scale: f64) -> Self {
        Self {
            saturation: None,
            low_scale,
        }
    }
}

impl Default for HighPreferredMerge {
    fn default() -> Self {
        Self::with_scale(1.0)
    }
}

impl MergePolicy for HighPreferredMerge {
    fn merge(&self, low: u16, high: u16, depth: u32) -> u16 {
        let saturation = self.saturation.unwrap_or_else(|| depth_mask(depth));
        if high < saturation {
            high
        } else {
            (f64::from(low) * self.low_scale)
                .round()
                .clamp(0.0, f64::from(u16::MAX)) as u16
        }
    }
}

/// Per-model decoding choices for HDR frames.
#[derive(Clone)]
pub struct ModelProfile {
    /// Block order on the wire
    pub channel_order: ChannelOrder,
    /// Merged plane rule
    pub merge: Arc<dyn MergePolicy>,
}

impl ModelProfile {
    /// Profile for a camera family.
    ///
    /// Every known model uses the default layout and the same gain ratio;
    /// callers with calibrated ratios install them through [`Self::with_merge`].
    #[must_use]
    pub fn for_device(_device_type: DeviceType) -> Self {
        Self::default()
    }

    /// Same profile with a different merge rule.
    #[must_use]
    pub fn with_merge(mut self, merge: impl MergePolicy + 'static) -> Self {
        self.merge = Arc::new(merge);
        self
    }

    /// Same profile with a different block order.
    #[must_use]
    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            channel_order: ChannelOrder::default(),
            merge: Arc::new(HighPreferredMerge::default()),
        }
    }
}

impl fmt::Debug for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProfile")
            .field("channel_order", &self.channel_order)
            .field("merge", &self.merge)
            .finish()
    }
}
