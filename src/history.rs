// ============================================================================
// PATCH RECORD: before/after pixels of one engine call
// ============================================================================
//
// The engine knows nothing about undo. A host that wants one undo entry per
// smart patch captures a record around the call and replays `undo` / `redo`.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::buffer::{BitDepth, PixelBuffer, Rect};
use crate::error::{InpaintError, InpaintResult, IoError};

/// Magic tag written first in every serialized record.
pub const RECORD_MAGIC: &str = "SPR1";

/// A rectangular region of samples before and after a patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub(crate) magic: String,
    pub rect: Rect,
    pub channels: usize,
    pub depth: BitDepth,
    pub before: Vec<u16>,
    pub after: Vec<u16>,
}

impl PatchRecord {
    /// Snapshot `rect` from the unpatched and patched buffers.
    pub fn capture(before: &PixelBuffer, after: &PixelBuffer, rect: Rect) -> InpaintResult<Self> {
        if before.rect() != after.rect()
            || before.channels() != after.channels()
            || before.depth() != after.depth()
        {
            return Err(InpaintError::InvalidParameters(
                "before and after buffers differ in layout".into(),
            ));
        }
        let out_of_bounds = || {
            InpaintError::InvalidParameters(format!(
                "record rect {:?} outside buffer {:?}",
                rect,
                before.rect()
            ))
        };
        Ok(Self {
            magic: RECORD_MAGIC.to_string(),
            rect,
            channels: before.channels(),
            depth: before.depth(),
            before: before.read_region(rect).ok_or_else(out_of_bounds)?,
            after: after.read_region(rect).ok_or_else(out_of_bounds)?,
        })
    }

    /// Restore the pixels as they were before the patch.
    pub fn undo(&self, buffer: &mut PixelBuffer) -> InpaintResult<()> {
        self.apply(buffer, &self.before)
    }

    /// Re-apply the patched pixels.
    pub fn redo(&self, buffer: &mut PixelBuffer) -> InpaintResult<()> {
        self.apply(buffer, &self.after)
    }

    fn apply(&self, buffer: &mut PixelBuffer, data: &[u16]) -> InpaintResult<()> {
        if buffer.channels() != self.channels || buffer.depth() != self.depth {
            return Err(InpaintError::InvalidParameters(format!(
                "record holds {} channel {:?} samples, buffer has {} channel {:?}",
                self.channels,
                self.depth,
                buffer.channels(),
                buffer.depth()
            )));
        }
        if !buffer.write_region(self.rect, data) {
            return Err(InpaintError::InvalidParameters(format!(
                "record rect {:?} does not fit buffer {:?}",
                self.rect,
                buffer.rect()
            )));
        }
        Ok(())
    }

    /// Pixels that differ between before and after.
    pub fn changed_pixels(&self) -> usize {
        let ch = self.channels.max(1);
        self.before
            .chunks(ch)
            .zip(self.after.chunks(ch))
            .filter(|(a, b)| a != b)
            .count()
    }

    pub fn description(&self) -> String {
        format!(
            "Smart Patch {}x{} at ({}, {})",
            self.rect.width, self.rect.height, self.rect.x, self.rect.y
        )
    }

    /// Write the record as a `.spr` file.
    pub fn save(&self, path: &Path) -> Result<(), IoError> {
        crate::io::save_record(self, path)
    }

    /// Read a `.spr` file.
    pub fn load(path: &Path) -> Result<Self, IoError> {
        crate::io::load_record(path)
    }

    /// Bytes of sample data held.
    pub fn memory_size(&self) -> usize {
        (self.before.len() + self.after.len()) * std::mem::size_of::<u16>()
    }

    /// Internal consistency of a deserialized record.
    pub(crate) fn is_consistent(&self) -> bool {
        let Some(expected) = (self.rect.area() as usize).checked_mul(self.channels) else {
            return false;
        };
        self.magic == RECORD_MAGIC
            && (1..=crate::buffer::MAX_CHANNELS).contains(&self.channels)
            && self.before.len() == expected
            && self.after.len() == expected
    }
}
