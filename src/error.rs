// ============================================================================
// ERROR TYPES: engine failures and file I/O failures
// ============================================================================

/// Failures reported by the inpainting engine.
///
/// Every variant leaves the caller's pixel buffer untouched: the engine only
/// writes into it after the whole pyramid has been synthesized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InpaintError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("mask is empty, nothing to synthesize")]
    EmptyMask,
    #[error("mask covers the whole image, no source material to sample from")]
    NoSourceMaterial,
    #[error("out of memory allocating {bytes} bytes of working buffers")]
    OutOfMemory { bytes: usize },
    #[error("inpainting was cancelled")]
    Cancelled,
}

pub type InpaintResult<T> = Result<T, InpaintError>;

/// Allocate a zero-filled vector, reporting allocation failure instead of
/// aborting the process.
pub(crate) fn try_alloc<T: Clone + Default>(len: usize) -> InpaintResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| InpaintError::OutOfMemory {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(len, T::default());
    Ok(v)
}

/// Errors from loading/saving images, masks and patch records.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("mask is {mask_w}x{mask_h} but image is {image_w}x{image_h}")]
    DimensionMismatch {
        image_w: u32,
        image_h: u32,
        mask_w: u32,
        mask_h: u32,
    },
    #[error(transparent)]
    Inpaint(#[from] InpaintError),
}

impl From<Box<bincode::ErrorKind>> for IoError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        IoError::Serialize(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_alloc_zero_fills() {
        let v: Vec<f32> = try_alloc(16).unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn try_alloc_reports_absurd_sizes() {
        let err = try_alloc::<u64>(usize::MAX / 2).unwrap_err();
        assert!(matches!(err, InpaintError::OutOfMemory { .. }));
    }

    #[test]
    fn inpaint_error_converts_into_io_error() {
        let e: IoError = InpaintError::NoSourceMaterial.into();
        assert!(e.to_string().contains("no source material"));
    }
}
