// ============================================================================
// Inpainting / Smart patch engine
// ============================================================================
//
// Coarse-to-fine PatchMatch inpainting:
//   1. build a pyramid of (image, hole) pairs, coarsest first
//   2. seed the coarsest hole by onion peeling and a random offset field
//   3. per level: a few EM passes of PatchMatch → voting synthesis
//   4. hand the synthesized pixels and doubled offsets to the next level
//   5. commit the finest level into the caller's buffer in one go
//
// The caller's buffer is only written in step 5, so every failure (bad
// parameters, no source material, allocation failure, cancellation) leaves it
// exactly as it was.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::buffer::{MaskBuffer, PixelBuffer, Rect};
use crate::error::{InpaintError, InpaintResult};
use crate::history::PatchRecord;
use crate::ops::patchmatch::{OffsetField, PatchMatcher, Schedule};
use crate::ops::pyramid::{Level, Pyramid};
use crate::ops::synthesis::{Synthesizer, seed_from_coarser, seed_onion_peel};

/// Seed used when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Largest accepted patch radius (patch side 129).
pub const MAX_PATCH_RADIUS: u32 = 64;

// -- Quality presets -----------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentAwareQuality {
    /// Fewest iterations, fastest radius decay.
    Fast,
    Balanced,
    /// Most iterations, slowest radius decay.
    HighQuality,
}

impl ContentAwareQuality {
    pub fn all() -> &'static [ContentAwareQuality] {
        &[
            ContentAwareQuality::Fast,
            ContentAwareQuality::Balanced,
            ContentAwareQuality::HighQuality,
        ]
    }

    /// Accuracy value the preset stands for.
    pub fn accuracy(&self) -> u32 {
        match self {
            ContentAwareQuality::Fast => 0,
            ContentAwareQuality::Balanced => 50,
            ContentAwareQuality::HighQuality => 100,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(ContentAwareQuality::Fast),
            "balanced" => Some(ContentAwareQuality::Balanced),
            "high" | "hq" | "high-quality" | "high_quality" => Some(ContentAwareQuality::HighQuality),
            _ => None,
        }
    }
}

// -- Parameters ----------------------------------------------------------

/// Algorithm parameters for one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InpaintParams {
    /// Half side of the square patch; the patch is `2*r+1` pixels wide.
    pub patch_radius: u32,
    /// 0 = fastest. Values above 100 behave like 100.
    pub accuracy: u32,
    pub seed: u64,
}

impl Default for InpaintParams {
    fn default() -> Self {
        Self { patch_radius: 2, accuracy: 50, seed: DEFAULT_SEED }
    }
}

impl InpaintParams {
    /// Build from host-side signed values, rejecting negatives.
    pub fn new(radius: i32, accuracy: i32) -> InpaintResult<Self> {
        if radius < 1 {
            return Err(InpaintError::InvalidParameters(format!(
                "patch radius must be at least 1, got {}",
                radius
            )));
        }
        if accuracy < 0 {
            return Err(InpaintError::InvalidParameters(format!(
                "accuracy must not be negative, got {}",
                accuracy
            )));
        }
        let params = Self {
            patch_radius: radius as u32,
            accuracy: accuracy as u32,
            seed: DEFAULT_SEED,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> InpaintResult<()> {
        if self.patch_radius < 1 || self.patch_radius > MAX_PATCH_RADIUS {
            return Err(InpaintError::InvalidParameters(format!(
                "patch radius must be in 1..={}, got {}",
                MAX_PATCH_RADIUS, self.patch_radius
            )));
        }
        Ok(())
    }

    /// Check that `mask` pairs with `image` and has something to fill.
    /// Returns the bounding rectangle of the hole.
    pub fn check_mask(image: &PixelBuffer, mask: &MaskBuffer) -> InpaintResult<Rect> {
        if image.rect() != mask.rect() {
            return Err(InpaintError::InvalidParameters(format!(
                "mask rect {:?} differs from image rect {:?}",
                mask.rect(),
                image.rect()
            )));
        }
        let bounds = mask.bounding_rect();
        if bounds.is_empty() {
            return Err(InpaintError::EmptyMask);
        }
        Ok(bounds)
    }

    /// Smallest pyramid level extent: a whole patch must fit.
    pub fn min_level_size(&self) -> usize {
        2 * self.patch_radius as usize + 1
    }

    pub fn schedule(&self) -> Schedule {
        Schedule::from_accuracy(self.accuracy)
    }
}

// -- Cancellation --------------------------------------------------------

/// Shared flag checked between levels and EM passes.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// -- Engine --------------------------------------------------------------

/// Configured inpainting run. Stateless across calls.
#[derive(Clone, Debug, Default)]
pub struct InpaintEngine {
    params: InpaintParams,
    cancel: Option<CancelToken>,
    threads: usize,
}

impl InpaintEngine {
    pub fn new(params: InpaintParams) -> Self {
        Self { params, cancel: None, threads: 0 }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run inside a dedicated pool of `threads` workers. 0 = global pool.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn params(&self) -> &InpaintParams {
        &self.params
    }

    /// Fill the masked pixels of `image` in place and return the bounding
    /// rectangle of the hole. An empty mask is a no-op returning
    /// [`Rect::EMPTY`].
    pub fn patch(&self, image: &mut PixelBuffer, mask: &MaskBuffer) -> InpaintResult<Rect> {
        self.params.validate()?;
        let bounds = match InpaintParams::check_mask(image, mask) {
            Ok(b) => b,
            Err(InpaintError::EmptyMask) => return Ok(Rect::EMPTY),
            Err(e) => return Err(e),
        };

        let source: &PixelBuffer = image;
        let finest = self.in_pool(|| self.synthesize_levels(source, mask))?;
        commit(image, &finest);
        Ok(bounds)
    }

    /// Like [`patch`](Self::patch) but also returns the before/after pixels
    /// of the changed rectangle. `None` for an empty mask.
    pub fn patch_recorded(
        &self,
        image: &mut PixelBuffer,
        mask: &MaskBuffer,
    ) -> InpaintResult<Option<PatchRecord>> {
        let original = image.clone();
        let rect = self.patch(image, mask)?;
        if rect.is_empty() {
            return Ok(None);
        }
        PatchRecord::capture(&original, image, rect).map(Some)
    }

    fn in_pool<T: Send>(&self, job: impl FnOnce() -> InpaintResult<T> + Send) -> InpaintResult<T> {
        if self.threads == 0 {
            return job();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| InpaintError::InvalidParameters(format!("thread pool: {}", e)))?;
        pool.install(job)
    }

    fn check_cancel(&self) -> InpaintResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => {
                log_warn!("smartpatch: cancelled");
                Err(InpaintError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    /// Run the whole pyramid and return the synthesized finest level.
    fn synthesize_levels(&self, image: &PixelBuffer, mask: &MaskBuffer) -> InpaintResult<Level> {
        let start = Instant::now();
        self.check_cancel()?;

        let radius = self.params.patch_radius as i32;
        let schedule = self.params.schedule();
        let seed = self.params.seed;
        let synthesizer = Synthesizer::new(radius);

        let finest = Level::from_buffers(image, mask)?;
        let pyramid = Pyramid::from_level(finest, self.params.min_level_size())?;
        let n_levels = pyramid.len();
        log_info!(
            "smartpatch: {}x{} hole={} radius={} accuracy={} levels={}",
            image.width(),
            image.height(),
            mask.count(),
            radius,
            self.params.accuracy,
            n_levels
        );

        let mut previous: Option<(Level, OffsetField)> = None;
        for (index, mut level) in pyramid.into_levels().into_iter().enumerate() {
            self.check_cancel()?;

            let mut field = match &previous {
                None => {
                    seed_onion_peel(&mut level);
                    OffsetField::random(&level, radius, seed, index)?
                }
                Some((coarse, coarse_field)) => {
                    seed_from_coarser(&mut level, coarse);
                    coarse_field.upsample(&level, radius, seed, index)?
                }
            };

            // The coarsest level starts from a blurry guess; give it an extra pass.
            let passes = schedule.em_passes + usize::from(index == 0);
            for pass in 0..passes {
                self.check_cancel()?;
                PatchMatcher::new(&level, radius, schedule, seed, index).run(&mut field, pass);
                level.pixels = synthesizer.synthesize(&level, &field)?;
            }

            log_info!(
                "smartpatch: level {}/{} {}x{} hole={} passes={}",
                index + 1,
                n_levels,
                level.width,
                level.height,
                level.hole_count(),
                passes
            );
            previous = Some((level, field));
        }

        let (finest, _) = previous.ok_or(InpaintError::NoSourceMaterial)?;
        log_info!("smartpatch: done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
        Ok(finest)
    }
}

/// Quantize the hole pixels of `level` back into `image`. Known pixels are
/// not touched.
fn commit(image: &mut PixelBuffer, level: &Level) {
    let max = image.depth().max_value() as f32;
    let ch = level.channels;
    for (p, _) in level.mask.iter().enumerate().filter(|(_, hole)| **hole) {
        for c in 0..ch {
            let v = (level.pixels[p * ch + c] * max).round().clamp(0.0, max);
            image.set_sample_at(p * ch + c, v as u16);
        }
    }
}

/// Fill the masked region of `image` from its surroundings.
///
/// `radius` is the patch radius (≥ 1) and `accuracy` (≥ 0) trades speed for
/// quality. Returns the bounding rectangle of the modified pixels; an empty
/// mask returns an empty rectangle and leaves `image` alone.
pub fn patch_image(
    image: &mut PixelBuffer,
    mask: &MaskBuffer,
    radius: i32,
    accuracy: i32,
) -> InpaintResult<Rect> {
    let params = InpaintParams::new(radius, accuracy)?;
    InpaintEngine::new(params).patch(image, mask)
}
