//! Content-aware fill for masked image regions.
//!
//! [`patch_image`] fills the masked pixels of a [`PixelBuffer`] with texture
//! taken from its unmasked pixels, using coarse-to-fine PatchMatch and
//! patch voting. [`InpaintEngine`] exposes seeding, cancellation, thread
//! count and undo records; the `smartpatch` binary wraps it for batch use.

#[macro_use]
pub mod logger;

pub mod buffer;
pub mod cli;
pub mod error;
pub mod history;
pub mod io;
pub mod ops;
pub mod settings;

#[cfg(test)]
mod test_utils;

pub use buffer::{BitDepth, MaskBuffer, PixelBuffer, PixelView, Rect};
pub use error::{InpaintError, InpaintResult, IoError};
pub use history::PatchRecord;
pub use ops::inpaint::{CancelToken, ContentAwareQuality, InpaintEngine, InpaintParams, patch_image};
pub use settings::Settings;
