use smartpatch::{
    BitDepth, InpaintEngine, InpaintError, InpaintParams, MaskBuffer, PatchRecord, PixelBuffer,
    Rect, patch_image,
};

fn filled(size: u32, channels: usize, depth: BitDepth, value: &[u16]) -> PixelBuffer {
    let mut buf = PixelBuffer::new(Rect::from_size(size, size), channels, depth).unwrap();
    buf.fill(value);
    buf
}

fn mask_of(image: &PixelBuffer, holes: &[Rect]) -> MaskBuffer {
    let mut mask = MaskBuffer::new(image.rect()).unwrap();
    for hole in holes {
        mask.fill_rect(*hole, true);
    }
    mask
}

/// Value at (x, y) of a hash-noise texture with a smooth base.
fn textured(size: u32, salt: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(Rect::from_size(size, size), 3, BitDepth::Eight).unwrap();
    for y in 0..size {
        for x in 0..size {
            let mut h = x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503) ^ salt;
            h ^= h >> 15;
            h = h.wrapping_mul(0x2c1b_3c6d);
            h ^= h >> 12;
            let base = ((x + y) * 2) as u16;
            buf.set(
                x as i32,
                y as i32,
                &[base % 256, (h & 0xff) as u16, ((h >> 8) & 0x7f) as u16],
            );
        }
    }
    buf
}

#[test]
fn gray_square_is_refilled_gray() {
    let mut image = filled(64, 4, BitDepth::Eight, &[128, 128, 128, 255]);
    let hole = Rect::new(27, 27, 10, 10);
    for y in 27..37 {
        for x in 27..37 {
            image.set(x, y, &[0, 255, 0, 255]);
        }
    }
    let mask = mask_of(&image, &[hole]);

    let rect = patch_image(&mut image, &mask, 2, 1).unwrap();

    assert_eq!(rect, Rect::new(27, 27, 10, 10));
    for y in 0..64 {
        for x in 0..64 {
            let px = image.get(x, y).unwrap();
            for c in 0..3 {
                assert!(px[c].abs_diff(128) <= 1, "({x}, {y}) channel {c} = {}", px[c]);
            }
            assert_eq!(px[3], 255);
        }
    }
}

#[test]
fn vertical_gradient_strip_is_reconstructed() {
    let size = 64u32;
    let mut truth = PixelBuffer::new(Rect::from_size(size, size), 1, BitDepth::Eight).unwrap();
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            truth.set(x, y, &[(y * 4) as u16]);
        }
    }
    let hole = Rect::new(28, 0, 8, size);
    let mut image = truth.clone();
    for y in 0..size as i32 {
        for x in 28..36 {
            image.set(x, y, &[255]);
        }
    }
    let mask = mask_of(&image, &[hole]);

    let rect = patch_image(&mut image, &mask, 3, 50).unwrap();
    assert_eq!(rect, hole);

    let mut sum = 0.0f64;
    let mut n = 0usize;
    for y in 0..size as i32 {
        for x in 28..36 {
            let got = image.sample(x, y, 0).unwrap() as f64;
            let want = truth.sample(x, y, 0).unwrap() as f64;
            sum += (got - want) * (got - want);
            n += 1;
        }
    }
    let mse = sum / n as f64;
    assert!(mse < 150.0, "mse {mse}");
}

#[test]
fn border_holes_stay_in_bounds() {
    let original = textured(40, 7);
    let holes = [Rect::new(0, 0, 6, 40), Rect::new(30, 35, 10, 5)];
    let mask = mask_of(&original, &holes);
    let mut image = original.clone();

    let rect = patch_image(&mut image, &mask, 4, 30).unwrap();

    assert_eq!(rect, Rect::new(0, 0, 40, 40));
    assert_eq!(image.rect(), original.rect());
    for y in 0..40 {
        for x in 0..40 {
            if !mask.is_masked(x, y) {
                assert_eq!(image.get(x, y), original.get(x, y), "({x}, {y})");
            }
        }
    }
}

#[test]
fn returned_rect_is_the_tight_hole_bounds() {
    let mut image = textured(32, 1);
    let mut mask = MaskBuffer::new(image.rect()).unwrap();
    mask.set(5, 9, true);
    mask.set(20, 4, true);
    mask.set(11, 25, true);
    let rect = patch_image(&mut image, &mask, 2, 0).unwrap();
    assert_eq!(rect, Rect::new(5, 4, 16, 22));
}

#[test]
fn identical_inputs_give_identical_outputs() {
    let original = textured(56, 3);
    let mask = mask_of(&original, &[Rect::new(18, 10, 14, 20)]);
    let params = InpaintParams { patch_radius: 3, accuracy: 40, seed: 1234 };

    let runs: Vec<PixelBuffer> = [1usize, 2, 5, 0]
        .iter()
        .map(|&threads| {
            let mut img = original.clone();
            InpaintEngine::new(params).with_threads(threads).patch(&mut img, &mask).unwrap();
            img
        })
        .collect();
    for run in &runs[1..] {
        assert_eq!(run, &runs[0]);
    }
    assert_ne!(runs[0], original);
}

#[test]
fn full_mask_reports_no_source_material() {
    let mut image = textured(24, 2);
    let before = image.clone();
    let mask = mask_of(&image, &[image.rect()]);
    assert_eq!(patch_image(&mut image, &mask, 2, 10), Err(InpaintError::NoSourceMaterial));
    assert_eq!(image, before);
}

#[test]
fn empty_mask_changes_nothing() {
    let mut image = textured(24, 5);
    let before = image.clone();
    let mask = MaskBuffer::new(image.rect()).unwrap();
    assert_eq!(patch_image(&mut image, &mask, 2, 10), Ok(Rect::EMPTY));
    assert_eq!(image, before);
}

#[test]
fn invalid_arguments_are_rejected() {
    let mut image = textured(16, 6);
    let mask = mask_of(&image, &[Rect::new(4, 4, 3, 3)]);
    assert!(matches!(patch_image(&mut image, &mask, 0, 10), Err(InpaintError::InvalidParameters(_))));
    assert!(matches!(patch_image(&mut image, &mask, 2, -3), Err(InpaintError::InvalidParameters(_))));

    let shifted = MaskBuffer::new(Rect::new(2, 2, 16, 16)).unwrap();
    assert!(matches!(
        patch_image(&mut image, &shifted, 2, 10),
        Err(InpaintError::InvalidParameters(_))
    ));
}

#[test]
fn sixteen_bit_uniform_fill_is_exact() {
    let mut image = filled(32, 2, BitDepth::Sixteen, &[40_000, 65_535]);
    for y in 8..14 {
        for x in 8..14 {
            image.set(x, y, &[0, 0]);
        }
    }
    let mask = mask_of(&image, &[Rect::new(8, 8, 6, 6)]);
    patch_image(&mut image, &mask, 2, 0).unwrap();
    for y in 0..32 {
        for x in 0..32 {
            assert_eq!(image.get(x, y).unwrap()[..2], [40_000, 65_535]);
        }
    }
}

#[test]
fn record_survives_disk_and_undoes_the_patch() {
    let mut image = textured(32, 9);
    let original = image.clone();
    let mask = mask_of(&image, &[Rect::new(10, 12, 7, 5)]);

    let record = InpaintEngine::new(InpaintParams::default())
        .patch_recorded(&mut image, &mask)
        .unwrap()
        .unwrap();
    let patched = image.clone();

    let path = std::env::temp_dir().join(format!("smartpatch-it-{}.spr", std::process::id()));
    record.save(&path).unwrap();
    let loaded = PatchRecord::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, record);
    assert!(loaded.memory_size() >= 2 * 7 * 5 * 3 * 2);

    loaded.undo(&mut image).unwrap();
    assert_eq!(image, original);
    loaded.redo(&mut image).unwrap();
    assert_eq!(image, patched);
}
