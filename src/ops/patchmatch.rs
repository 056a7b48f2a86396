// ============================================================================
// PATCHMATCH: nearest-neighbour field over one pyramid level
// ============================================================================
//
// Every hole pixel keeps an offset to the centre of a known patch. The field
// improves by alternating propagation (reuse a neighbour's offset) and random
// search (probe around the current best at shrinking radii).
//
// Distance: squared per-channel difference between the current estimate of
// the target window and the source window, divided by the window area. Source
// pixels that are themselves holes add the maximum per-pixel penalty instead.
// Window coordinates are clamped to the level, so nothing is read out of
// bounds.
//
// Work is split into fixed-height row bands that run on rayon. A band sees
// its own fresh offsets and a start-of-pass snapshot for anything outside it,
// so the result does not depend on the number of threads.

use rayon::prelude::*;

use crate::error::{InpaintResult, try_alloc};
use crate::ops::pyramid::Level;

/// Rows per parallel band.
pub const BAND_ROWS: usize = 16;

/// Random initial candidates tried per hole pixel.
const INIT_CANDIDATES: usize = 4;

// -- Accuracy schedule ---------------------------------------------------------

/// Iteration counts and random-search decay derived from `accuracy`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Schedule {
    /// PatchMatch iterations per EM pass.
    pub pm_iterations: usize,
    /// Match + synthesize rounds per level.
    pub em_passes: usize,
    /// Random-search radius multiplier per step (0.5..=0.75).
    pub decay: f32,
}

impl Schedule {
    /// Accuracy above 100 is treated as 100.
    pub fn from_accuracy(accuracy: u32) -> Self {
        let a = accuracy.min(100) as usize;
        Self {
            pm_iterations: 2 + 6 * a / 100,
            em_passes: 1 + 3 * a / 100,
            decay: 0.5 + 0.25 * a as f32 / 100.0,
        }
    }
}

// -- Random stream -------------------------------------------------------------

/// Per-pixel LCG. Seeded from a hash of the call seed and pixel position so
/// every pixel draws the same numbers whichever thread visits it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PixelRng(u64);

impl PixelRng {
    pub(crate) fn new(seed: u64, level: usize, iter: usize, x: usize, y: usize) -> Self {
        let mut h = seed ^ 0x9e37_79b9_7f4a_7c15;
        for v in [level as u64, iter as u64, x as u64, y as u64] {
            h = splitmix(h ^ v);
        }
        Self(h)
    }

    #[inline]
    pub(crate) fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform in [-1, 1].
    #[inline]
    fn next_signed(&mut self) -> f32 {
        (self.next_u32() as f32 / (u32::MAX >> 1) as f32) * 2.0 - 1.0
    }

    #[inline]
    fn below(&mut self, n: usize) -> usize {
        (self.next_u32() as usize) % n.max(1)
    }
}

#[inline]
fn splitmix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

// -- Offset field --------------------------------------------------------------

/// Vector from a pixel to its source patch centre.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

impl Offset {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    #[inline]
    pub fn magnitude_sq(&self) -> i64 {
        self.dx as i64 * self.dx as i64 + self.dy as i64 * self.dy as i64
    }
}

/// Per-pixel offsets and patch distances for one level. Entries of known
/// pixels stay at zero and are never read.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetField {
    pub width: usize,
    pub height: usize,
    pub offsets: Vec<Offset>,
    pub costs: Vec<f32>,
}

impl OffsetField {
    fn empty(width: usize, height: usize) -> InpaintResult<Self> {
        Ok(Self {
            width,
            height,
            offsets: try_alloc(width * height)?,
            costs: try_alloc(width * height)?,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Offset {
        self.offsets[y * self.width + x]
    }

    #[inline]
    pub fn cost(&self, x: usize, y: usize) -> f32 {
        self.costs[y * self.width + x]
    }

    /// Uniform random source for every hole pixel, best of a few draws.
    pub fn random(level: &Level, radius: i32, seed: u64, level_index: usize) -> InpaintResult<Self> {
        let mut field = Self::empty(level.width, level.height)?;
        let sources = level.source_positions();
        let w = level.width;
        field
            .offsets
            .par_chunks_mut(w)
            .zip(field.costs.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (offs, costs))| {
                for x in 0..w {
                    if !level.is_hole(x, y) {
                        continue;
                    }
                    let mut rng = PixelRng::new(seed, level_index, usize::MAX, x, y);
                    let (off, cost) = random_candidate(level, &sources, x, y, radius, &mut rng);
                    offs[x] = off;
                    costs[x] = cost;
                }
            });
        Ok(field)
    }

    /// Seed a finer level from this (coarser) field: offsets are doubled, and
    /// pixels whose doubled offset lands outside or on a hole are re-drawn.
    pub fn upsample(&self, fine: &Level, radius: i32, seed: u64, level_index: usize) -> InpaintResult<Self> {
        let mut field = Self::empty(fine.width, fine.height)?;
        let sources = fine.source_positions();
        let w = fine.width;
        field
            .offsets
            .par_chunks_mut(w)
            .zip(field.costs.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (offs, costs))| {
                let cy = (y / 2).min(self.height.saturating_sub(1));
                for x in 0..w {
                    if !fine.is_hole(x, y) {
                        continue;
                    }
                    let cx = (x / 2).min(self.width.saturating_sub(1));
                    let coarse = self.get(cx, cy);
                    let off = Offset::new(coarse.dx * 2, coarse.dy * 2);
                    if fine.is_source(x as i32 + off.dx, y as i32 + off.dy) {
                        offs[x] = off;
                        costs[x] = f32::MAX;
                    } else {
                        let mut rng = PixelRng::new(seed, level_index, usize::MAX, x, y);
                        let (off, cost) = random_candidate(fine, &sources, x, y, radius, &mut rng);
                        offs[x] = off;
                        costs[x] = cost;
                    }
                }
            });
        Ok(field)
    }
}

fn random_candidate(
    level: &Level,
    sources: &[(u32, u32)],
    x: usize,
    y: usize,
    radius: i32,
    rng: &mut PixelRng,
) -> (Offset, f32) {
    let mut best = Offset::default();
    let mut best_cost = f32::MAX;
    for _ in 0..INIT_CANDIDATES {
        let (sx, sy) = sources[rng.below(sources.len())];
        let off = Offset::new(sx as i32 - x as i32, sy as i32 - y as i32);
        let cost = patch_distance(level, x as i32, y as i32, sx as i32, sy as i32, radius);
        if improves(cost, off, best_cost, best) {
            best = off;
            best_cost = cost;
        }
    }
    (best, best_cost)
}

// -- Distance ------------------------------------------------------------------

/// Mean per-pixel distance between the windows centred at `(x, y)` (target,
/// current estimate) and `(sx, sy)` (source). Hole pixels in the source
/// window cost the maximum `channels` each.
#[inline]
pub fn patch_distance(level: &Level, x: i32, y: i32, sx: i32, sy: i32, radius: i32) -> f32 {
    let ch = level.channels;
    let penalty = ch as f32;
    let side = (2 * radius + 1) as f32;
    let mut sum = 0.0f32;
    for dy in -radius..=radius {
        let ty = level.clamp_y(y + dy);
        let uy = level.clamp_y(sy + dy);
        for dx in -radius..=radius {
            let tx = level.clamp_x(x + dx);
            let ux = level.clamp_x(sx + dx);
            if level.is_hole(ux, uy) {
                sum += penalty;
                continue;
            }
            let t = level.pixel(tx, ty);
            let u = level.pixel(ux, uy);
            for c in 0..ch {
                let d = t[c] - u[c];
                sum += d * d;
            }
        }
    }
    sum / (side * side)
}

/// Lower distance wins; equal distances prefer the shorter offset.
#[inline]
pub fn improves(cost: f32, off: Offset, best_cost: f32, best: Offset) -> bool {
    cost < best_cost || (cost == best_cost && off.magnitude_sq() < best.magnitude_sq())
}

// -- Matcher -------------------------------------------------------------------

/// Runs PatchMatch iterations on one level.
pub struct PatchMatcher<'a> {
    level: &'a Level,
    radius: i32,
    schedule: Schedule,
    seed: u64,
    level_index: usize,
}

impl<'a> PatchMatcher<'a> {
    pub fn new(level: &'a Level, radius: i32, schedule: Schedule, seed: u64, level_index: usize) -> Self {
        Self { level, radius, schedule, seed, level_index }
    }

    /// Refresh distances against the current estimate, then iterate.
    /// `pass` distinguishes EM passes on the same level for the RNG.
    pub fn run(&self, field: &mut OffsetField, pass: usize) {
        self.refresh_costs(field);
        for iter in 0..self.schedule.pm_iterations {
            let snapshot = field.clone();
            let stream = pass * self.schedule.pm_iterations + iter;
            self.iterate(field, &snapshot, iter % 2 == 0, stream);
        }
    }

    /// Recompute every hole pixel's distance for its current offset.
    pub fn refresh_costs(&self, field: &mut OffsetField) {
        let level = self.level;
        let w = level.width;
        let radius = self.radius;
        field
            .costs
            .par_chunks_mut(w)
            .zip(field.offsets.par_chunks(w))
            .enumerate()
            .for_each(|(y, (costs, offs))| {
                for x in 0..w {
                    if level.is_hole(x, y) {
                        let o = offs[x];
                        costs[x] = patch_distance(
                            level,
                            x as i32,
                            y as i32,
                            x as i32 + o.dx,
                            y as i32 + o.dy,
                            radius,
                        );
                    }
                }
            });
    }

    fn iterate(&self, field: &mut OffsetField, snapshot: &OffsetField, forward: bool, stream: usize) {
        let w = self.level.width;
        field
            .offsets
            .par_chunks_mut(BAND_ROWS * w)
            .zip(field.costs.par_chunks_mut(BAND_ROWS * w))
            .enumerate()
            .for_each(|(b, (offs, costs))| {
                let y0 = b * BAND_ROWS;
                let rows = offs.len() / w;
                let mut band = Band { y0, rows, width: w, offsets: offs, costs };
                self.scan_band(&mut band, snapshot, forward, stream);
            });
    }

    fn scan_band(&self, band: &mut Band<'_>, snapshot: &OffsetField, forward: bool, stream: usize) {
        let level = self.level;
        let w = level.width;
        let (w_i, h_i) = (w as i32, level.height as i32);
        let max_radius = w.max(level.height) as f32;
        let neighbours: [(i32, i32); 2] = if forward { [(-1, 0), (0, -1)] } else { [(1, 0), (0, 1)] };

        for r in 0..band.rows {
            let ly = if forward { r } else { band.rows - 1 - r };
            let y = band.y0 + ly;
            for c in 0..w {
                let x = if forward { c } else { w - 1 - c };
                if !level.is_hole(x, y) {
                    continue;
                }
                let li = ly * w + x;
                let mut best = band.offsets[li];
                let mut best_cost = band.costs[li];

                // Propagation
                for (ndx, ndy) in neighbours {
                    let nx = x as i32 + ndx;
                    let ny = y as i32 + ndy;
                    if nx < 0 || ny < 0 || nx >= w_i || ny >= h_i {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    if !level.is_hole(nx, ny) {
                        continue;
                    }
                    let n_off = band.offset_or(snapshot, nx, ny);
                    self.try_candidate(x, y, n_off, &mut best, &mut best_cost);
                }

                // Random search around the current best
                let mut rng = PixelRng::new(self.seed, self.level_index, stream, x, y);
                let mut search_r = max_radius;
                while search_r >= 1.0 {
                    let cx = (x as i32 + best.dx) as f32 + rng.next_signed() * search_r;
                    let cy = (y as i32 + best.dy) as f32 + rng.next_signed() * search_r;
                    let sx = (cx.round() as i32).clamp(0, w_i - 1);
                    let sy = (cy.round() as i32).clamp(0, h_i - 1);
                    let cand = Offset::new(sx - x as i32, sy - y as i32);
                    self.try_candidate(x, y, cand, &mut best, &mut best_cost);
                    search_r *= self.schedule.decay;
                }

                band.offsets[li] = best;
                band.costs[li] = best_cost;
            }
        }
    }

    #[inline]
    fn try_candidate(&self, x: usize, y: usize, cand: Offset, best: &mut Offset, best_cost: &mut f32) {
        if cand == *best {
            return;
        }
        let sx = x as i32 + cand.dx;
        let sy = y as i32 + cand.dy;
        if !self.level.is_source(sx, sy) {
            return;
        }
        let cost = patch_distance(self.level, x as i32, y as i32, sx, sy, self.radius);
        if improves(cost, cand, *best_cost, *best) {
            *best = cand;
            *best_cost = cost;
        }
    }
}

/// Mutable rows `[y0, y0 + rows)` of an offset field.
struct Band<'f> {
    y0: usize,
    rows: usize,
    width: usize,
    offsets: &'f mut [Offset],
    costs: &'f mut [f32],
}

impl Band<'_> {
    /// Fresh value inside the band, snapshot value outside it.
    #[inline]
    fn offset_or(&self, snapshot: &OffsetField, x: usize, y: usize) -> Offset {
        if y >= self.y0 && y < self.y0 + self.rows {
            self.offsets[(y - self.y0) * self.width + x]
        } else {
            snapshot.get(x, y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BitDepth, MaskBuffer, PixelBuffer, Rect};

    fn stripes(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(Rect::from_size(width, height), 1, BitDepth::Eight).unwrap();
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                buf.set(x, y, &[if (x / 4) % 2 == 0 { 40 } else { 220 }]);
            }
        }
        buf
    }

    fn level_with_hole(image: &PixelBuffer, hole: Rect) -> Level {
        let mut mask = MaskBuffer::new(image.rect()).unwrap();
        mask.fill_rect(hole, true);
        Level::from_buffers(image, &mask).unwrap()
    }

    #[test]
    fn schedule_grows_with_accuracy() {
        let fast = Schedule::from_accuracy(0);
        let best = Schedule::from_accuracy(100);
        assert_eq!((fast.pm_iterations, fast.em_passes), (2, 1));
        assert_eq!((best.pm_iterations, best.em_passes), (8, 4));
        assert!(best.decay > fast.decay);
        assert_eq!(Schedule::from_accuracy(5000), best);
    }

    #[test]
    fn distance_is_zero_for_identical_known_windows() {
        let image = stripes(32, 32);
        let level = level_with_hole(&image, Rect::new(30, 30, 2, 2));
        assert_eq!(patch_distance(&level, 4, 10, 12, 20, 2), 0.0);
        assert!(patch_distance(&level, 4, 10, 8, 10, 2) > 0.0);
    }

    #[test]
    fn distance_penalizes_hole_sources_and_clamps_at_borders() {
        let image = stripes(16, 16);
        let level = level_with_hole(&image, Rect::new(0, 0, 3, 3));
        // Source window over the hole costs at least the penalty share.
        let d = patch_distance(&level, 8, 8, 1, 1, 1);
        assert!(d >= 4.0 / 9.0);
        // Windows hanging off every edge still evaluate.
        let corner = patch_distance(&level, 15, 15, 15, 0, 3);
        assert!(corner.is_finite());
    }

    #[test]
    fn ties_prefer_shorter_offsets() {
        assert!(improves(1.0, Offset::new(1, 0), 1.0, Offset::new(3, 4)));
        assert!(!improves(1.0, Offset::new(3, 4), 1.0, Offset::new(1, 0)));
        assert!(improves(0.5, Offset::new(9, 9), 1.0, Offset::new(0, 1)));
    }

    #[test]
    fn random_field_points_only_at_known_pixels() {
        let image = stripes(32, 32);
        let level = level_with_hole(&image, Rect::new(10, 10, 8, 8));
        let field = OffsetField::random(&level, 2, 7, 0).unwrap();
        for y in 0..32 {
            for x in 0..32 {
                if level.is_hole(x, y) {
                    let o = field.get(x, y);
                    assert!(level.is_source(x as i32 + o.dx, y as i32 + o.dy));
                }
            }
        }
    }

    #[test]
    fn iterations_never_increase_distance() {
        let image = stripes(48, 48);
        let level = level_with_hole(&image, Rect::new(16, 16, 12, 12));
        let mut field = OffsetField::random(&level, 2, 1, 0).unwrap();
        let matcher = PatchMatcher::new(&level, 2, Schedule::from_accuracy(50), 1, 0);
        matcher.refresh_costs(&mut field);
        let before: f32 = field.costs.iter().sum();
        matcher.run(&mut field, 0);
        let after: f32 = field.costs.iter().sum();
        assert!(after <= before);
        for y in 0..48 {
            for x in 0..48 {
                if level.is_hole(x, y) {
                    let o = field.get(x, y);
                    assert!(level.is_source(x as i32 + o.dx, y as i32 + o.dy));
                }
            }
        }
    }

    #[test]
    fn upsampled_offsets_are_doubled_when_valid() {
        let image = stripes(32, 32);
        let fine = level_with_hole(&image, Rect::new(12, 12, 4, 4));
        let coarse = fine.downsample().unwrap();
        let mut field = OffsetField::random(&coarse, 1, 3, 0).unwrap();
        for o in field.offsets.iter_mut() {
            *o = Offset::new(-4, 0);
        }
        let up = field.upsample(&fine, 1, 3, 1).unwrap();
        assert_eq!(up.get(13, 13), Offset::new(-8, 0));
        assert_eq!(up.get(0, 0), Offset::default());
    }

    #[test]
    fn matching_is_independent_of_thread_count() {
        let image = stripes(40, 40);
        let level = level_with_hole(&image, Rect::new(5, 18, 30, 6));
        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| {
                let mut field = OffsetField::random(&level, 2, 11, 0).unwrap();
                PatchMatcher::new(&level, 2, Schedule::from_accuracy(30), 11, 0).run(&mut field, 0);
                field
            })
        };
        assert_eq!(run(1), run(4));
    }
}
