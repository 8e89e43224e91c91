use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;

use crate::palette::Matcher;

/// Dithering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherMode {
    /// No dithering, nearest entry only.
    #[default]
    None,
    /// Floyd–Steinberg error diffusion.
    FloydSteinberg,
    /// Ordered dithering with the 4×4 Bayer matrix.
    Bayer4x4,
    /// Ordered dithering with the 8×8 Bayer matrix.
    Bayer8x8,
}

/// Floyd–Steinberg kernel as `(dx, dy, weight)`: right 7/16, bottom-left
/// 3/16, bottom 5/16, bottom-right 1/16.
pub const FLOYD_STEINBERG: [(isize, usize, f64); 4] = [
    (1, 0, 7.0 / 16.0),
    (-1, 1, 3.0 / 16.0),
    (0, 1, 5.0 / 16.0),
    (1, 1, 1.0 / 16.0),
];

pub const BAYER_4X4: [[u8; 4]; 4] = [
    [0, 8, 2, 10],
    [12, 4, 14, 6],
    [3, 11, 1, 9],
    [15, 7, 13, 5],
];

pub const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

/// Ordered-dither offset `matrix[x mod k][y mod k] / 16 - 0.5` for pixel
/// `(x, y)`.
///
/// Both matrix sizes share the divisor, so 4×4 offsets span `[-0.5, 0.4375]`
/// and 8×8 offsets span `[-0.5, 3.4375]`.
pub fn bayer_offset<const K: usize>(matrix: &[[u8; K]; K], x: usize, y: usize) -> f64 {
    matrix[x % K][y % K] as f64 / 16.0 - 0.5
}

#[inline]
fn to_f64(p: RGBA8) -> [f64; 4] {
    [p.r as f64, p.g as f64, p.b as f64, p.a as f64]
}

/// Map each pixel straight to its nearest entry.
pub(crate) fn nearest_only(image: ImgRef<'_, RGBA8>, matcher: &Matcher<'_>) -> ImgVec<RGBA8> {
    let out = image
        .pixels()
        .map(|p| matcher.nearest_colour(to_f64(p)))
        .collect();
    ImgVec::new(out, image.width(), image.height())
}

/// Floyd–Steinberg error diffusion in row-major order.
///
/// Error lands in a float working buffer, clamped to `0..=255` on every
/// store, so it is already visible when its target pixel is quantized.
pub(crate) fn floyd_steinberg(image: ImgRef<'_, RGBA8>, matcher: &Matcher<'_>) -> ImgVec<RGBA8> {
    let width = image.width();
    let height = image.height();

    let mut buf: Vec<[f64; 4]> = image.pixels().map(to_f64).collect();
    let mut out = Vec::with_capacity(width * height);

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let current = buf[idx];
            let chosen = matcher.nearest_colour(current);
            out.push(chosen);

            let chosen = to_f64(chosen);
            let err: [f64; 4] = core::array::from_fn(|c| current[c] - chosen[c]);

            for &(dx, dy, weight) in &FLOYD_STEINBERG {
                let Some(tx) = x.checked_add_signed(dx) else {
                    continue;
                };
                let ty = y + dy;
                if tx >= width || ty >= height {
                    continue;
                }
                for (v, e) in buf[ty * width + tx].iter_mut().zip(err) {
                    *v = (*v + e * weight).clamp(0.0, 255.0);
                }
            }
        }
    }

    ImgVec::new(out, width, height)
}

/// Ordered dithering: shift R, G, B by `spread * bayer_offset` before the
/// nearest-entry lookup.
pub(crate) fn ordered<const K: usize>(
    image: ImgRef<'_, RGBA8>,
    matcher: &Matcher<'_>,
    matrix: &[[u8; K]; K],
    spread: f64,
) -> ImgVec<RGBA8> {
    let mut out = Vec::with_capacity(image.width() * image.height());
    for (y, row) in image.rows().enumerate() {
        for (x, &p) in row.iter().enumerate() {
            let shift = spread * bayer_offset(matrix, x, y);
            let [r, g, b, a] = to_f64(p);
            let perturbed = [
                (r + shift).clamp(0.0, 255.0),
                (g + shift).clamp(0.0, 255.0),
                (b + shift).clamp(0.0, 255.0),
                a,
            ];
            out.push(matcher.nearest_colour(perturbed));
        }
    }
    ImgVec::new(out, image.width(), image.height())
}
