// ============================================================================
// SmartPatch CLI: headless batch inpainting via command-line arguments
// ============================================================================
//
// Usage examples:
//   smartpatch -i photo.png --mask hole.png -o result.png
//   smartpatch -i "shots/*.jpg" --mask-dir masks/ --output-dir patched/ --quality high
//   smartpatch -i sprite.png --mask-from-alpha -r 3 --seed 42
//   smartpatch -i photo.png --mask hole.png --record photo.spr
//   smartpatch -i photo_patched.png --revert photo.spr -o restored.png

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{ArgGroup, Parser};

use crate::buffer::{MaskBuffer, PixelBuffer};
use crate::error::IoError;
use crate::history::PatchRecord;
use crate::io::{SaveFormat, encode_and_write, load_image, load_mask};
use crate::ops::inpaint::{ContentAwareQuality, InpaintEngine};
use crate::settings::Settings;

/// Image extensions probed when looking up a mask in `--mask-dir`.
const MASK_EXTENSIONS: &[&str] = &["png", "bmp", "tga", "tif", "tiff", "webp", "jpg", "jpeg"];

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Fill masked regions of images with texture borrowed from their surroundings.
#[derive(Parser, Debug)]
#[command(
    name = "smartpatch",
    about = "Content-aware fill for masked image regions",
    long_about = "Fill the masked part of each input image with patches taken from the\n\
                  unmasked part (multi-scale PatchMatch). Defaults come from the settings\n\
                  file; every flag below overrides them.\n\n\
                  Example:\n  \
                  smartpatch -i photo.png --mask hole.png -o result.png\n  \
                  smartpatch -i \"*.png\" --mask-dir masks/ --output-dir out/ --quality high"
)]
#[command(group(ArgGroup::new("mask_source").args(["mask", "mask_dir", "mask_from_alpha"])))]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Mask image for a single input. Pixels at or above the threshold are filled.
    #[arg(long, value_name = "FILE")]
    pub mask: Option<PathBuf>,

    /// Directory holding one mask per input, named `<stem>.<ext>` or `<stem>_mask.<ext>`.
    #[arg(long, value_name = "DIR")]
    pub mask_dir: Option<PathBuf>,

    /// Fill the pixels whose alpha is zero.
    #[arg(long)]
    pub mask_from_alpha: bool,

    /// Gray level (1-255) at which a mask pixel counts as a hole.
    #[arg(long, value_name = "1-255")]
    pub mask_threshold: Option<u8>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE", conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Patch radius; patches are (2r+1) pixels square.
    #[arg(short, long, value_name = "RADIUS")]
    pub radius: Option<u32>,

    /// Search effort, 0 (fastest) to 100.
    #[arg(short, long, value_name = "0-100", conflicts_with = "quality")]
    pub accuracy: Option<u32>,

    /// Quality preset: fast, balanced, high.
    #[arg(long, value_name = "PRESET")]
    pub quality: Option<String>,

    /// Random seed; equal seeds give identical output.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker threads (0 = all cores).
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// JPEG output quality (1-100).
    #[arg(long, default_value_t = 90, value_name = "1-100")]
    pub jpeg_quality: u8,

    /// Write the before/after pixels of the patch to a .spr file (single input only).
    #[arg(long, value_name = "FILE", conflicts_with = "revert")]
    pub record: Option<PathBuf>,

    /// Restore the pixels saved in a .spr file instead of patching.
    #[arg(long, value_name = "RECORD")]
    pub revert: Option<PathBuf>,

    /// Store the effective radius, accuracy, seed, threads and threshold as new defaults.
    #[arg(long)]
    pub save_settings: bool,

    /// Print per-file timing and mirror the session log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where the mask for an input comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
enum MaskSource {
    File(PathBuf),
    Dir(PathBuf),
    Alpha,
}

/// What to do with every input.
enum Action {
    Patch {
        engine: InpaintEngine,
        mask: MaskSource,
        threshold: u8,
        record: Option<PathBuf>,
    },
    Revert(PatchRecord),
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    crate::logger::set_verbose(args.verbose);

    let settings = match resolve_settings(&args, Settings::load()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.save_settings {
        if let Err(e) = settings.save() {
            eprintln!("warning: could not save settings: {}", e);
        } else if let Some(path) = Settings::settings_path() {
            println!("settings saved to {}", path.display());
        }
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }
    if inputs.len() > 1 && (args.record.is_some() || args.mask.is_some()) {
        eprintln!("error: --record and --mask need a single input; use --mask-dir for batches.");
        return ExitCode::FAILURE;
    }

    let action = match build_action(&args, &settings) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &action, args.jpeg_quality) {
            Ok(summary) => {
                log_info!("{} -> {}: {}", input_path.display(), output_path.display(), summary);
                if args.verbose || multi {
                    println!(
                        "  → {} ({}, {:.0}ms)",
                        output_path.display(),
                        summary,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log_err!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, action: &Action, jpeg_quality: u8) -> Result<String, IoError> {
    // -- Step 1: Load ----------------------------------------------------
    let mut image = load_image(input)?;

    // -- Step 2: Patch or revert -----------------------------------------
    let summary = match action {
        Action::Revert(record) => {
            record.undo(&mut image)?;
            format!("reverted {}", record.description())
        }
        Action::Patch { engine, mask, threshold, record } => {
            let mask = resolve_mask(mask, input, &image, *threshold)?;
            match engine.patch_recorded(&mut image, &mask)? {
                None => "mask is empty, nothing to fill".to_string(),
                Some(rec) => {
                    if let Some(path) = record {
                        rec.save(path)?;
                    }
                    format!("{} ({} px changed)", rec.description(), rec.changed_pixels())
                }
            }
        }
    };

    // -- Step 3: Save ----------------------------------------------------
    encode_and_write(&image, output, SaveFormat::from_path(output), jpeg_quality)?;
    Ok(summary)
}

// ============================================================================
// Helpers
// ============================================================================

/// Apply the command-line overrides on top of the stored settings.
fn resolve_settings(args: &CliArgs, mut settings: Settings) -> Result<Settings, String> {
    if let Some(r) = args.radius {
        settings.patch_radius = r;
    }
    if let Some(a) = args.accuracy {
        settings.accuracy = a;
    }
    if let Some(q) = &args.quality {
        let preset = ContentAwareQuality::parse(q)
            .ok_or_else(|| format!("unknown quality preset '{}' (fast, balanced, high)", q))?;
        settings.accuracy = preset.accuracy();
    }
    if let Some(s) = args.seed {
        settings.seed = s;
    }
    if let Some(t) = args.threads {
        settings.threads = t;
    }
    if let Some(t) = args.mask_threshold {
        settings.mask_threshold = t;
    }
    settings.params().validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

fn build_action(args: &CliArgs, settings: &Settings) -> Result<Action, String> {
    if let Some(path) = &args.revert {
        let record = PatchRecord::load(path)
            .map_err(|e| format!("could not read record '{}': {}", path.display(), e))?;
        return Ok(Action::Revert(record));
    }

    let mask = if let Some(m) = &args.mask {
        MaskSource::File(m.clone())
    } else if let Some(d) = &args.mask_dir {
        MaskSource::Dir(d.clone())
    } else if args.mask_from_alpha {
        MaskSource::Alpha
    } else {
        return Err("one of --mask, --mask-dir or --mask-from-alpha is required".into());
    };

    Ok(Action::Patch {
        engine: InpaintEngine::new(settings.params()).with_threads(settings.threads),
        mask,
        threshold: settings.mask_threshold,
        record: args.record.clone(),
    })
}

fn resolve_mask(
    source: &MaskSource,
    input: &Path,
    image: &PixelBuffer,
    threshold: u8,
) -> Result<MaskBuffer, IoError> {
    match source {
        MaskSource::File(path) => load_mask(path, threshold, image.rect()),
        MaskSource::Dir(dir) => {
            let path = find_mask_in_dir(dir, input).ok_or_else(|| {
                IoError::InvalidFormat(format!(
                    "no mask for '{}' in '{}'",
                    input.display(),
                    dir.display()
                ))
            })?;
            load_mask(&path, threshold, image.rect())
        }
        MaskSource::Alpha => MaskBuffer::from_alpha(image)
            .ok_or_else(|| IoError::InvalidFormat("image has no alpha channel".into())),
    }
}

/// First existing `<stem>.<ext>` or `<stem>_mask.<ext>` in `dir`, never the
/// input itself.
fn find_mask_in_dir(dir: &Path, input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    for name in [stem.clone(), format!("{}_mask", stem)] {
        for ext in MASK_EXTENSIONS {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() && candidate != input {
                return Some(candidate);
            }
        }
    }
    None
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (keeps the input's file name)
/// 3. Fallback: next to the input as `<stem>_patched.<ext>`
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = SaveFormat::from_path(input).extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    Some(parent.join(format!("{}_patched.{}", stem, ext)))
}
