// ============================================================================
// SYNTHESIS: turn an offset field into pixels for the hole
// ============================================================================
//
// Voting: each hole pixel q collects, from every hole pixel p whose patch
// window covers q, the source pixel `q + offset(p)`. Votes are weighted by how
// well p's patch matched. Only hole pixels are rewritten.

use rayon::prelude::*;

use crate::buffer::MAX_CHANNELS;
use crate::error::{InpaintResult, try_alloc};
use crate::ops::patchmatch::OffsetField;
use crate::ops::pyramid::Level;

/// Floor for the adaptive vote bandwidth.
const MIN_SIGMA_SQ: f32 = 1e-4;

/// Blends source patches into the hole of one level.
pub struct Synthesizer {
    radius: i32,
}

impl Synthesizer {
    pub fn new(radius: i32) -> Self {
        Self { radius }
    }

    /// New pixel data for `level`: known pixels copied through, hole pixels
    /// replaced by the weighted vote.
    pub fn synthesize(&self, level: &Level, field: &OffsetField) -> InpaintResult<Vec<f32>> {
        let mut out: Vec<f32> = try_alloc(level.pixels.len())?;
        out.copy_from_slice(&level.pixels);

        let sigma_sq = vote_bandwidth(level, field);
        let w = level.width;
        let ch = level.channels;
        let r = self.radius;

        out.par_chunks_mut(w * ch).enumerate().for_each(|(y, row)| {
            for x in 0..w {
                if !level.is_hole(x, y) {
                    continue;
                }
                let mut acc = [0.0f32; MAX_CHANNELS];
                let mut total = 0.0f32;
                for dy in -r..=r {
                    let py = y as i32 + dy;
                    if py < 0 || py >= level.height as i32 {
                        continue;
                    }
                    for dx in -r..=r {
                        let px = x as i32 + dx;
                        if px < 0 || px >= w as i32 {
                            continue;
                        }
                        let (px, py) = (px as usize, py as usize);
                        if !level.is_hole(px, py) {
                            continue;
                        }
                        let o = field.get(px, py);
                        let sx = x as i32 + o.dx;
                        let sy = y as i32 + o.dy;
                        if !level.is_source(sx, sy) {
                            continue;
                        }
                        let weight = (-field.cost(px, py) / sigma_sq).exp();
                        let src = level.pixel(sx as usize, sy as usize);
                        for c in 0..ch {
                            acc[c] += src[c] * weight;
                        }
                        total += weight;
                    }
                }

                let dst = &mut row[x * ch..(x + 1) * ch];
                if total > 1e-12 {
                    for c in 0..ch {
                        dst[c] = acc[c] / total;
                    }
                } else {
                    // Own source centre is always known.
                    let o = field.get(x, y);
                    let src = level.pixel((x as i32 + o.dx) as usize, (y as i32 + o.dy) as usize);
                    dst.copy_from_slice(src);
                }
            }
        });

        Ok(out)
    }
}

/// 75th percentile of the hole distances, so the weighting adapts to how
/// well the level matched overall.
fn vote_bandwidth(level: &Level, field: &OffsetField) -> f32 {
    let mut costs: Vec<f32> = field
        .costs
        .iter()
        .zip(&level.mask)
        .filter(|&(_, &hole)| hole)
        .map(|(&c, _)| c)
        .filter(|c| c.is_finite())
        .collect();
    if costs.is_empty() {
        return MIN_SIGMA_SQ;
    }
    let k = (costs.len() * 3 / 4).min(costs.len() - 1);
    let (_, p75, _) = costs.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
    (*p75).max(MIN_SIGMA_SQ)
}

/// Seed a coarsest-level hole by onion peeling: each boundary ring takes the
/// mean of its already-known 8-neighbours, then becomes known itself.
pub fn seed_onion_peel(level: &mut Level) {
    let (w, h, ch) = (level.width, level.height, level.channels);
    let mut known: Vec<bool> = level.mask.iter().map(|&m| !m).collect();

    loop {
        let mut ring: Vec<(usize, [f32; MAX_CHANNELS])> = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                if known[i] {
                    continue;
                }
                let mut sum = [0.0f32; MAX_CHANNELS];
                let mut n = 0usize;
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i32 + dx;
                        let ny = y as i32 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                            continue;
                        }
                        let ni = ny as usize * w + nx as usize;
                        if !known[ni] {
                            continue;
                        }
                        for c in 0..ch {
                            sum[c] += level.pixels[ni * ch + c];
                        }
                        n += 1;
                    }
                }
                if n > 0 {
                    for v in sum.iter_mut().take(ch) {
                        *v /= n as f32;
                    }
                    ring.push((i, sum));
                }
            }
        }
        if ring.is_empty() {
            break;
        }
        for (i, value) in ring {
            level.pixels[i * ch..(i + 1) * ch].copy_from_slice(&value[..ch]);
            known[i] = true;
        }
    }
}

/// Seed the hole of `fine` with the nearest pixel of the already synthesized
/// `coarse` level.
pub fn seed_from_coarser(fine: &mut Level, coarse: &Level) {
    let w = fine.width;
    let ch = fine.channels;
    let (cw, chh) = (coarse.width, coarse.height);
    let mask = &fine.mask;
    fine.pixels.par_chunks_mut(w * ch).enumerate().for_each(|(y, row)| {
        let cy = (y / 2).min(chh - 1);
        for x in 0..w {
            if !mask[y * w + x] {
                continue;
            }
            let cx = (x / 2).min(cw - 1);
            row[x * ch..(x + 1) * ch].copy_from_slice(coarse.pixel(cx, cy));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BitDepth, MaskBuffer, PixelBuffer, Rect};
    use crate::ops::patchmatch::{Offset, PatchMatcher, Schedule};
    use crate::test_utils::assert_delta;

    fn level(width: u32, height: u32, value: u16, hole: Rect) -> Level {
        let mut image = PixelBuffer::new(Rect::from_size(width, height), 2, BitDepth::Eight).unwrap();
        image.fill(&[value, 255]);
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.fill_rect(hole, true);
        // Scribble over the hole so seeding has something to overwrite.
        for y in hole.y..hole.y + hole.height as i32 {
            for x in hole.x..hole.x + hole.width as i32 {
                image.set(x, y, &[0, 0]);
            }
        }
        Level::from_buffers(&image, &mask).unwrap()
    }

    #[test]
    fn onion_peel_fills_uniform_surroundings_exactly() {
        let mut lvl = level(12, 12, 102, Rect::new(3, 3, 6, 6));
        seed_onion_peel(&mut lvl);
        for v in lvl.pixels.chunks(2) {
            assert_delta!(v[0], 0.4, 1e-5);
            assert_delta!(v[1], 1.0, 1e-5);
        }
    }

    #[test]
    fn coarser_seed_only_touches_holes() {
        let mut fine = level(8, 8, 51, Rect::new(2, 2, 3, 3));
        let mut coarse = fine.downsample().unwrap();
        coarse.pixels.iter_mut().for_each(|v| *v = 0.75);
        seed_from_coarser(&mut fine, &coarse);
        assert_delta!(fine.pixel(3, 3)[0], 0.75, 1e-6);
        assert_delta!(fine.pixel(0, 0)[0], 0.2, 1e-6);
    }

    #[test]
    fn vote_copies_uniform_source() {
        let lvl = level(24, 24, 153, Rect::new(8, 8, 6, 6));
        let mut field = OffsetField::random(&lvl, 2, 5, 0).unwrap();
        PatchMatcher::new(&lvl, 2, Schedule::from_accuracy(0), 5, 0).run(&mut field, 0);
        let out = Synthesizer::new(2).synthesize(&lvl, &field).unwrap();
        for v in out.chunks(2) {
            assert_delta!(v[0], 0.6, 1e-5);
            assert_delta!(v[1], 1.0, 1e-5);
        }
    }

    #[test]
    fn known_pixels_pass_through() {
        let lvl = level(16, 16, 10, Rect::new(4, 4, 2, 2));
        let mut field = OffsetField::random(&lvl, 1, 9, 0).unwrap();
        // Force one vote onto a specific source.
        field.offsets[4 * 16 + 4] = Offset::new(-4, -4);
        let out = Synthesizer::new(1).synthesize(&lvl, &field).unwrap();
        for y in 0..16 {
            for x in 0..16 {
                if !lvl.is_hole(x, y) {
                    let i = (y * 16 + x) * 2;
                    assert_eq!(&out[i..i + 2], lvl.pixel(x, y));
                }
            }
        }
    }
}
