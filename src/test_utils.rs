//! Test helpers shared by the unit test modules of the crate.

/// Compare two floats to be within some delta.
#[allow(unused_macros)]
macro_rules! assert_delta {
    ($x:expr, $y:expr, $d:expr) => {
        if !($x - $y < $d && $y - $x < $d) {
            panic!(
                "value {} is different than {} by greater than {} delta",
                $x, $y, $d
            );
        }
    };
}

// Makes the macro reachable as `crate::test_utils::assert_delta`.
#[allow(unused_imports)]
pub(crate) use assert_delta;

/// Deterministic RGBA noise texture used by determinism tests.
#[allow(dead_code)]
pub(crate) fn noise_rgba(width: u32, height: u32, salt: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(width, height, |x, y| {
        let mut h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ salt.wrapping_mul(83_492_791);
        h ^= h >> 13;
        h = h.wrapping_mul(0x5bd1_e995);
        h ^= h >> 15;
        image::Rgba([h as u8, (h >> 8) as u8, (h >> 16) as u8, 255])
    })
}
