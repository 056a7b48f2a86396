// ============================================================================
// IMAGE PYRAMID: normalized working levels, coarsest first
// ============================================================================
//
// Each level holds f32 samples in 0..1 plus the hole mask at that resolution.
// Downsampling is a 2x2 box over the known contributors; the mask only grows
// (a coarse pixel is a hole if any of its fine pixels is one).

use rayon::prelude::*;

use crate::buffer::{MaskBuffer, PixelBuffer};
use crate::error::{InpaintError, InpaintResult, try_alloc};

/// Hard cap on pyramid depth.
pub const MAX_LEVELS: usize = 12;

/// One resolution of the image/mask pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// Row-major, `channels` samples per pixel, normalized to 0..1.
    pub pixels: Vec<f32>,
    /// `true` = hole.
    pub mask: Vec<bool>,
}

impl Level {
    /// Working copy of a caller buffer. The mask must share the buffer's rect.
    pub fn from_buffers(image: &PixelBuffer, mask: &MaskBuffer) -> InpaintResult<Self> {
        if image.rect() != mask.rect() {
            return Err(InpaintError::InvalidParameters(format!(
                "mask rect {:?} differs from image rect {:?}",
                mask.rect(),
                image.rect()
            )));
        }
        let width = image.width() as usize;
        let height = image.height() as usize;
        let channels = image.channels();
        let scale = 1.0 / image.depth().max_value() as f32;

        let mut pixels: Vec<f32> = try_alloc(width * height * channels)?;
        for (i, v) in pixels.iter_mut().enumerate() {
            *v = image.sample_at(i) as f32 * scale;
        }
        let mut holes: Vec<bool> = try_alloc(width * height)?;
        holes.copy_from_slice(mask.as_slice());

        Ok(Self { width, height, channels, pixels, mask: holes })
    }

    #[inline(always)]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline(always)]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let i = self.index(x, y) * self.channels;
        &self.pixels[i..i + self.channels]
    }

    #[inline(always)]
    pub fn is_hole(&self, x: usize, y: usize) -> bool {
        self.mask[self.index(x, y)]
    }

    /// True when `(x, y)` is inside the level and known.
    #[inline(always)]
    pub fn is_source(&self, x: i32, y: i32) -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < self.width
            && (y as usize) < self.height
            && !self.mask[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    pub fn clamp_x(&self, x: i32) -> usize {
        x.clamp(0, self.width as i32 - 1) as usize
    }

    #[inline(always)]
    pub fn clamp_y(&self, y: i32) -> usize {
        y.clamp(0, self.height as i32 - 1) as usize
    }

    pub fn hole_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn has_source(&self) -> bool {
        self.mask.iter().any(|&m| !m)
    }

    /// Coordinates of every known pixel, row-major.
    pub fn source_positions(&self) -> Vec<(u32, u32)> {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| !self.is_hole(x, y))
            .map(|(x, y)| (x as u32, y as u32))
            .collect()
    }

    /// Half-resolution level (rounding up on odd extents).
    pub fn downsample(&self) -> InpaintResult<Level> {
        let width = self.width.div_ceil(2);
        let height = self.height.div_ceil(2);
        let ch = self.channels;
        let mut pixels: Vec<f32> = try_alloc(width * height * ch)?;
        let mut mask: Vec<bool> = try_alloc(width * height)?;

        pixels
            .par_chunks_mut(width * ch)
            .zip(mask.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (row, mrow))| {
                for x in 0..width {
                    let mut known = [0.0f32; crate::buffer::MAX_CHANNELS];
                    let mut all = [0.0f32; crate::buffer::MAX_CHANNELS];
                    let mut n_known = 0usize;
                    let mut n_all = 0usize;
                    let mut hole = false;
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let fx = 2 * x + dx;
                        let fy = 2 * y + dy;
                        if fx >= self.width || fy >= self.height {
                            continue;
                        }
                        let p = self.pixel(fx, fy);
                        let is_hole = self.is_hole(fx, fy);
                        hole |= is_hole;
                        for c in 0..ch {
                            all[c] += p[c];
                            if !is_hole {
                                known[c] += p[c];
                            }
                        }
                        n_all += 1;
                        if !is_hole {
                            n_known += 1;
                        }
                    }
                    let (sum, n) = if n_known > 0 { (known, n_known) } else { (all, n_all) };
                    for c in 0..ch {
                        row[x * ch + c] = sum[c] / n as f32;
                    }
                    mrow[x] = hole;
                }
            });

        Ok(Level { width, height, channels: ch, pixels, mask })
    }
}

/// Ordered levels, coarsest first, finest last.
#[derive(Clone, Debug)]
pub struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    /// Build from an already-converted finest level.
    ///
    /// Stops before a level would be smaller than `min_level_size` on either
    /// axis, or would contain no known pixel.
    pub fn from_level(finest: Level, min_level_size: usize) -> InpaintResult<Self> {
        if !finest.has_source() {
            return Err(InpaintError::NoSourceMaterial);
        }
        let min_size = min_level_size.max(1);
        let mut levels = vec![finest];
        while levels.len() < MAX_LEVELS {
            let Some(last) = levels.last() else { break };
            if last.width.div_ceil(2) < min_size || last.height.div_ceil(2) < min_size {
                break;
            }
            let next = last.downsample()?;
            if !next.has_source() {
                break;
            }
            levels.push(next);
        }
        levels.reverse();
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn into_levels(self) -> Vec<Level> {
        self.levels
    }
}

/// Downsample `image` and `mask` together into a coarsest-first pyramid.
pub fn build_pyramid(
    image: &PixelBuffer,
    mask: &MaskBuffer,
    min_level_size: usize,
) -> InpaintResult<Pyramid> {
    Pyramid::from_level(Level::from_buffers(image, mask)?, min_level_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BitDepth, Rect};
    use crate::test_utils::assert_delta;

    fn gray(width: u32, height: u32, value: u16) -> PixelBuffer {
        let mut buf = PixelBuffer::new(Rect::from_size(width, height), 1, BitDepth::Eight).unwrap();
        buf.fill(&[value]);
        buf
    }

    #[test]
    fn levels_are_coarsest_first_and_respect_min_size() {
        let image = gray(64, 48, 128);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.set(30, 20, true);
        let pyr = build_pyramid(&image, &mask, 5).unwrap();
        let dims: Vec<_> = pyr.levels().iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(8, 6), (16, 12), (32, 24), (64, 48)]);
        assert_delta!(pyr.levels()[0].pixels[0], 128.0 / 255.0, 1e-6);
    }

    #[test]
    fn mask_never_shrinks_when_downsampling() {
        let image = gray(9, 9, 0);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.set(8, 8, true);
        mask.set(3, 0, true);
        let level = Level::from_buffers(&image, &mask).unwrap();
        let half = level.downsample().unwrap();
        assert_eq!((half.width, half.height), (5, 5));
        assert!(half.is_hole(4, 4));
        assert!(half.is_hole(1, 0));
        assert_eq!(half.hole_count(), 2);
    }

    #[test]
    fn downsample_averages_known_contributors_only() {
        let mut image = gray(2, 2, 100);
        image.set(1, 1, &[255]);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.set(1, 1, true);
        let half = Level::from_buffers(&image, &mask).unwrap().downsample().unwrap();
        assert_delta!(half.pixels[0], 100.0 / 255.0, 1e-6);
        assert!(half.mask[0]);
    }

    #[test]
    fn fully_masked_image_has_no_source_material() {
        let image = gray(16, 16, 10);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.fill_rect(image.rect(), true);
        assert_eq!(
            build_pyramid(&image, &mask, 3).unwrap_err(),
            InpaintError::NoSourceMaterial
        );
    }

    #[test]
    fn pyramid_stops_before_a_sourceless_level() {
        // Only the last column is known; halving merges it with a hole column.
        let image = gray(16, 16, 10);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.fill_rect(Rect::new(0, 0, 15, 16), true);
        let pyr = build_pyramid(&image, &mask, 2).unwrap();
        assert_eq!(pyr.len(), 1);
        assert!(pyr.levels().iter().all(|l| l.has_source()));
    }

    #[test]
    fn mismatched_mask_rect_is_rejected() {
        let image = gray(8, 8, 0);
        let mask = MaskBuffer::new(Rect::from_size(8, 7)).unwrap();
        assert!(matches!(
            Level::from_buffers(&image, &mask),
            Err(InpaintError::InvalidParameters(_))
        ));
    }
}
