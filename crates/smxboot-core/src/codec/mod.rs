//! Binary codecs consumed by the segment loaders
//!
//! These are deliberately small encoders/decoders for the handful of formats
//! the document model composes: device-configuration blocks, boot image
//! containers, legacy bootloader image wrappers, environment images, and flat
//! device trees. The document/script core treats them as opaque services.

pub mod bootimg;
pub mod dcd;
pub mod fdt;
pub mod uboot;

use crate::error::Error;

/// Shorthand for codec error construction.
pub(crate) fn codec_err(context: &str, reason: impl Into<String>) -> Error {
    Error::Codec {
        context: context.to_string(),
        reason: reason.into(),
    }
}

/// Round `value` up to the next multiple of `align`.
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}
