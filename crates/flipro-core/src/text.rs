//! Bounded-length text values.
//!
//! Names, paths and version strings cross the device boundary as fixed-width,
//! NUL-terminated fields. Inside the crate they are ordinary `String`s; the
//! bound is checked once, when the value is constructed.

use crate::error::TextError;
use serde::Serialize;
use std::fmt;

/// Width of USB descriptor strings (device name, serial number).
pub const USB_STRING_MAX: usize = 256;
/// Width of device and file-system path fields.
pub const DEVICE_PATH_MAX: usize = 1024;
/// Width of firmware and library version fields.
pub const VERSION_STRING_MAX: usize = 32;
/// Width of sensor mode names.
pub const SENSOR_MODE_NAME_MAX: usize = 32;

/// A string that fits in a `MAX`-wide NUL-terminated field.
///
/// At most `MAX - 1` characters are accepted, leaving room for the terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BoundedText<const MAX: usize>(String);

/// USB descriptor text.
pub type UsbString = BoundedText<USB_STRING_MAX>;
/// Device or file-system path text.
pub type DevicePath = BoundedText<DEVICE_PATH_MAX>;
/// Version text.
pub type VersionString = BoundedText<VERSION_STRING_MAX>;
/// Sensor mode name.
pub type ModeName = BoundedText<SENSOR_MODE_NAME_MAX>;

impl<const MAX: usize> BoundedText<MAX> {
    /// Largest accepted character count.
    pub const MAX_CHARS: usize = MAX - 1;

    /// Validates `value` for the named `field`.
    pub fn new(field: &'static str, value: impl Into<String>) -> Result<Self, TextError> {
        let value = value.into();
        if value.contains('\0') {
            return Err(TextError::InteriorNul { field });
        }
        let len = value.chars().count();
        if len > Self::MAX_CHARS {
            return Err(TextError::TooLong {
                field,
                len,
                max: Self::MAX_CHARS,
            });
        }
        Ok(Self(value))
    }

    /// Like [`BoundedText::new`] but also rejects the empty string.
    pub fn non_empty(field: &'static str, value: impl Into<String>) -> Result<Self, TextError> {
        let text = Self::new(field, value)?;
        if text.0.is_empty() {
            return Err(TextError::Empty { field });
        }
        Ok(text)
    }

    /// Borrow the text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl<const MAX: usize> AsRef<str> for BoundedText<MAX> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> fmt::Display for BoundedText<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
