// ============================================================================
// PIXEL / MASK BUFFERS: addressable rectangles of samples and hole flags
// ============================================================================

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{InpaintError, InpaintResult, try_alloc};

/// Largest channel count a [`PixelBuffer`] can hold (RGBA).
pub const MAX_CHANNELS: usize = 4;

// -- Rect ------------------------------------------------------------------

/// Integer axis-aligned rectangle. Empty when either extent is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const EMPTY: Rect = Rect { x: 0, y: 0, width: 0, height: 0 };

    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        (x as i64) >= self.x as i64
            && (y as i64) >= self.y as i64
            && (x as i64) < self.right()
            && (y as i64) < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// Smallest rectangle covering both. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Rect::new(x, y, (r - x as i64) as u32, (b - y as i64) as u32)
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r <= x as i64 || b <= y as i64 {
            return Rect::EMPTY;
        }
        Rect::new(x, y, (r - x as i64) as u32, (b - y as i64) as u32)
    }
}

// -- Bit depth ---------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Largest representable sample value.
    pub fn max_value(&self) -> u16 {
        match self {
            BitDepth::Eight => u8::MAX as u16,
            BitDepth::Sixteen => u16::MAX,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Sixteen => 2,
        }
    }
}

// -- PixelBuffer -------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// Row-major multi-channel raster over an addressable rectangle.
///
/// Coordinates are absolute: pixel `(rect.x, rect.y)` is the first sample.
/// Reads outside the rectangle return `None`, writes outside are ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    rect: Rect,
    channels: usize,
    depth: BitDepth,
    samples: Samples,
}

impl PixelBuffer {
    /// Zero-filled buffer.
    pub fn new(rect: Rect, channels: usize, depth: BitDepth) -> InpaintResult<Self> {
        check_channels(channels)?;
        let len = sample_len(rect, channels)?;
        let samples = match depth {
            BitDepth::Eight => Samples::U8(try_alloc(len)?),
            BitDepth::Sixteen => Samples::U16(try_alloc(len)?),
        };
        Ok(Self { rect, channels, depth, samples })
    }

    pub fn from_raw_u8(rect: Rect, channels: usize, data: Vec<u8>) -> InpaintResult<Self> {
        check_channels(channels)?;
        check_len(data.len(), sample_len(rect, channels)?)?;
        Ok(Self { rect, channels, depth: BitDepth::Eight, samples: Samples::U8(data) })
    }

    pub fn from_raw_u16(rect: Rect, channels: usize, data: Vec<u16>) -> InpaintResult<Self> {
        check_channels(channels)?;
        check_len(data.len(), sample_len(rect, channels)?)?;
        Ok(Self { rect, channels, depth: BitDepth::Sixteen, samples: Samples::U16(data) })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    /// Raw 8-bit samples, if this is an 8-bit buffer.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.samples {
            Samples::U8(v) => Some(v),
            Samples::U16(_) => None,
        }
    }

    /// Raw 16-bit samples, if this is a 16-bit buffer.
    pub fn as_u16(&self) -> Option<&[u16]> {
        match &self.samples {
            Samples::U16(v) => Some(v),
            Samples::U8(_) => None,
        }
    }

    /// Index of the first sample of `(x, y)` in the raw storage.
    #[inline]
    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let lx = (x as i64 - self.rect.x as i64) as usize;
        let ly = (y as i64 - self.rect.y as i64) as usize;
        Some((ly * self.rect.width as usize + lx) * self.channels)
    }

    #[inline]
    pub(crate) fn sample_at(&self, i: usize) -> u16 {
        match &self.samples {
            Samples::U8(v) => v[i] as u16,
            Samples::U16(v) => v[i],
        }
    }

    #[inline]
    pub(crate) fn set_sample_at(&mut self, i: usize, value: u16) {
        match &mut self.samples {
            Samples::U8(v) => v[i] = value.min(u8::MAX as u16) as u8,
            Samples::U16(v) => v[i] = value,
        }
    }

    pub fn sample(&self, x: i32, y: i32, channel: usize) -> Option<u16> {
        if channel >= self.channels {
            return None;
        }
        self.offset(x, y).map(|i| self.sample_at(i + channel))
    }

    /// All channels of a pixel. Unused trailing entries are zero.
    pub fn get(&self, x: i32, y: i32) -> Option<[u16; MAX_CHANNELS]> {
        let i = self.offset(x, y)?;
        let mut px = [0u16; MAX_CHANNELS];
        for (c, slot) in px.iter_mut().take(self.channels).enumerate() {
            *slot = self.sample_at(i + c);
        }
        Some(px)
    }

    /// Write a pixel. `values` shorter than the channel count leaves the
    /// remaining channels untouched. Returns `false` outside the rectangle.
    pub fn set(&mut self, x: i32, y: i32, values: &[u16]) -> bool {
        let Some(i) = self.offset(x, y) else { return false };
        for (c, &v) in values.iter().take(self.channels).enumerate() {
            self.set_sample_at(i + c, v);
        }
        true
    }

    /// Fill every pixel with the same value.
    pub fn fill(&mut self, values: &[u16]) {
        let n = self.rect.area() as usize;
        for p in 0..n {
            for (c, &v) in values.iter().take(self.channels).enumerate() {
                self.set_sample_at(p * self.channels + c, v);
            }
        }
    }

    /// Read-only view of a sub-rectangle. `None` unless `rect` lies inside.
    pub fn view(&self, rect: Rect) -> Option<PixelView<'_>> {
        if !self.rect.contains_rect(&rect) {
            return None;
        }
        Some(PixelView { buffer: self, rect })
    }

    /// Copy the samples of `rect` (row-major, all channels) into a vector.
    pub fn read_region(&self, rect: Rect) -> Option<Vec<u16>> {
        if !self.rect.contains_rect(&rect) {
            return None;
        }
        let row_len = rect.width as usize * self.channels;
        let mut out = Vec::with_capacity(rect.height as usize * row_len);
        for y in rect.y..rect.y + rect.height as i32 {
            if let Some(start) = self.offset(rect.x, y) {
                out.extend((start..start + row_len).map(|i| self.sample_at(i)));
            }
        }
        Some(out)
    }

    /// Overwrite the samples of `rect` from a row-major vector produced by
    /// [`read_region`](Self::read_region).
    pub fn write_region(&mut self, rect: Rect, data: &[u16]) -> bool {
        let row_len = rect.width as usize * self.channels;
        if !self.rect.contains_rect(&rect) || data.len() != rect.height as usize * row_len {
            return false;
        }
        for (row, y) in (rect.y..rect.y + rect.height as i32).enumerate() {
            if let Some(start) = self.offset(rect.x, y) {
                for k in 0..row_len {
                    self.set_sample_at(start + k, data[row * row_len + k]);
                }
            }
        }
        true
    }

    // -- image crate interop ------------------------------------------------

    pub fn from_rgba_image(img: &RgbaImage) -> Self {
        Self {
            rect: Rect::from_size(img.width(), img.height()),
            channels: 4,
            depth: BitDepth::Eight,
            samples: Samples::U8(img.as_raw().clone()),
        }
    }

    /// Convert any decoded image. Float images are brought to 16-bit RGBA.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let rect = Rect::from_size(img.width(), img.height());
        let (channels, samples) = match img {
            DynamicImage::ImageLuma8(b) => (1, Samples::U8(b.as_raw().clone())),
            DynamicImage::ImageLumaA8(b) => (2, Samples::U8(b.as_raw().clone())),
            DynamicImage::ImageRgb8(b) => (3, Samples::U8(b.as_raw().clone())),
            DynamicImage::ImageRgba8(b) => (4, Samples::U8(b.as_raw().clone())),
            DynamicImage::ImageLuma16(b) => (1, Samples::U16(b.as_raw().clone())),
            DynamicImage::ImageLumaA16(b) => (2, Samples::U16(b.as_raw().clone())),
            DynamicImage::ImageRgb16(b) => (3, Samples::U16(b.as_raw().clone())),
            DynamicImage::ImageRgba16(b) => (4, Samples::U16(b.as_raw().clone())),
            other => (4, Samples::U16(other.to_rgba16().into_raw())),
        };
        let depth = match samples {
            Samples::U8(_) => BitDepth::Eight,
            Samples::U16(_) => BitDepth::Sixteen,
        };
        Self { rect, channels, depth, samples }
    }

    /// Convert back into a [`DynamicImage`] with the same layout.
    pub fn to_dynamic(&self) -> DynamicImage {
        let (w, h) = (self.rect.width, self.rect.height);
        let converted = match (&self.samples, self.channels) {
            (Samples::U8(v), 1) => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageLuma8),
            (Samples::U8(v), 2) => ImageBuffer::<LumaA<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageLumaA8),
            (Samples::U8(v), 3) => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgb8),
            (Samples::U8(v), _) => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgba8),
            (Samples::U16(v), 1) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageLuma16),
            (Samples::U16(v), 2) => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageLumaA16),
            (Samples::U16(v), 3) => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgb16),
            (Samples::U16(v), _) => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, v.clone()).map(DynamicImage::ImageRgba16),
        };
        // Lengths are validated at construction, so from_raw cannot fail.
        converted.unwrap_or_else(|| DynamicImage::new_rgba8(w, h))
    }
}

fn check_channels(channels: usize) -> InpaintResult<()> {
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(InpaintError::InvalidParameters(format!(
            "channel count {} not in 1..={}",
            channels, MAX_CHANNELS
        )));
    }
    Ok(())
}

fn sample_len(rect: Rect, channels: usize) -> InpaintResult<usize> {
    (rect.width as usize)
        .checked_mul(rect.height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(InpaintError::OutOfMemory { bytes: usize::MAX })
}

fn check_len(got: usize, needed: usize) -> InpaintResult<()> {
    if got != needed {
        return Err(InpaintError::InvalidParameters(format!(
            "raw buffer holds {} samples, rectangle needs {}",
            got, needed
        )));
    }
    Ok(())
}

// -- PixelView ---------------------------------------------------------------

/// Borrowed sub-rectangle of a [`PixelBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct PixelView<'a> {
    buffer: &'a PixelBuffer,
    rect: Rect,
}

impl<'a> PixelView<'a> {
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn get(&self, x: i32, y: i32) -> Option<[u16; MAX_CHANNELS]> {
        if !self.rect.contains(x, y) {
            return None;
        }
        self.buffer.get(x, y)
    }

    /// Owned copy of the viewed pixels, keeping absolute coordinates.
    pub fn to_buffer(&self) -> PixelBuffer {
        let data = self.buffer.read_region(self.rect).unwrap_or_default();
        let samples = match self.buffer.depth {
            BitDepth::Eight => Samples::U8(data.into_iter().map(|v| v as u8).collect()),
            BitDepth::Sixteen => Samples::U16(data),
        };
        PixelBuffer {
            rect: self.rect,
            channels: self.buffer.channels,
            depth: self.buffer.depth,
            samples,
        }
    }
}

// -- MaskBuffer --------------------------------------------------------------

/// Per-pixel "needs synthesis" flags over the same rectangle as the image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskBuffer {
    rect: Rect,
    flags: Vec<bool>,
}

impl MaskBuffer {
    /// All-clear mask.
    pub fn new(rect: Rect) -> InpaintResult<Self> {
        let len = sample_len(rect, 1)?;
        Ok(Self { rect, flags: try_alloc(len)? })
    }

    /// Mask from a grayscale image: pixels `>= threshold` are holes.
    /// A threshold of 0 is treated as 1 so black never counts as a hole.
    pub fn from_gray(img: &GrayImage, threshold: u8) -> Self {
        let t = threshold.max(1);
        Self {
            rect: Rect::from_size(img.width(), img.height()),
            flags: img.as_raw().iter().map(|&v| v >= t).collect(),
        }
    }

    /// Mask of fully transparent pixels. `None` when the buffer has no alpha.
    pub fn from_alpha(image: &PixelBuffer) -> Option<Self> {
        if image.channels != 2 && image.channels != 4 {
            return None;
        }
        let alpha = image.channels - 1;
        let n = image.rect.area() as usize;
        let flags = (0..n)
            .map(|p| image.sample_at(p * image.channels + alpha) == 0)
            .collect();
        Some(Self { rect: image.rect, flags })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let lx = (x as i64 - self.rect.x as i64) as usize;
        let ly = (y as i64 - self.rect.y as i64) as usize;
        Some(ly * self.rect.width as usize + lx)
    }

    /// `false` outside the rectangle.
    pub fn is_masked(&self, x: i32, y: i32) -> bool {
        self.offset(x, y).is_some_and(|i| self.flags[i])
    }

    pub fn set(&mut self, x: i32, y: i32, masked: bool) -> bool {
        let Some(i) = self.offset(x, y) else { return false };
        self.flags[i] = masked;
        true
    }

    /// Set every pixel of `rect` (clipped to the mask).
    pub fn fill_rect(&mut self, rect: Rect, masked: bool) {
        let r = self.rect.intersect(&rect);
        for y in r.y..r.y + r.height as i32 {
            for x in r.x..r.x + r.width as i32 {
                self.set(x, y, masked);
            }
        }
    }

    /// Row-major flags, local coordinates.
    pub fn as_slice(&self) -> &[bool] {
        &self.flags
    }

    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&m| m).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.flags.iter().any(|&m| m)
    }

    /// Minimal rectangle containing every masked pixel, in absolute coordinates.
    pub fn bounding_rect(&self) -> Rect {
        let w = self.rect.width as usize;
        if w == 0 {
            return Rect::EMPTY;
        }
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut any = false;
        for (i, _) in self.flags.iter().enumerate().filter(|(_, m)| **m) {
            let (x, y) = (i % w, i / w);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            any = true;
        }
        if !any {
            return Rect::EMPTY;
        }
        Rect::new(
            self.rect.x + min_x as i32,
            self.rect.y + min_y as i32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        )
    }
}
