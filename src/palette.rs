use imgref::ImgVec;
use rgb::RGBA8;

use crate::error::QuantizeError;
use crate::histogram::luminance;
use crate::lab::Lab;

/// Colour difference used to match pixels against palette entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Squared Euclidean distance over R, G, B and A.
    #[default]
    Euclidean,
    /// CIEDE2000 between the CIE-LAB forms of R, G, B. Alpha is ignored.
    Ciede2000,
}

/// An ordered palette, in the order the producing algorithm emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<RGBA8>,
    /// Grey levels from a greyscale quantizer (R = G = B, opaque).
    greyscale: bool,
}

impl Palette {
    /// Palette of grey levels.
    pub fn grey(levels: impl IntoIterator<Item = u8>) -> Self {
        Self {
            entries: levels
                .into_iter()
                .map(|y| RGBA8::new(y, y, y, 255))
                .collect(),
            greyscale: true,
        }
    }

    /// Palette of RGBA colours.
    pub fn colour(entries: Vec<RGBA8>) -> Self {
        Self {
            entries,
            greyscale: false,
        }
    }

    pub fn entries(&self) -> &[RGBA8] {
        &self.entries
    }

    pub fn is_greyscale(&self) -> bool {
        self.greyscale
    }

    /// Grey level of each entry, for greyscale palettes.
    pub fn levels(&self) -> Option<Vec<u8>> {
        self.greyscale
            .then(|| self.entries.iter().map(|e| e.r).collect())
    }

    /// Number of palette entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the palette is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Root-mean-square R, G, B distance over every pair of distinct entries.
    /// Zero for fewer than two entries.
    pub fn spread(&self) -> f64 {
        let n = self.entries.len();
        if n < 2 {
            return 0.0;
        }
        let mut total = 0.0;
        for (i, a) in self.entries.iter().enumerate() {
            for b in &self.entries[i + 1..] {
                total += sq(a.r, b.r) + sq(a.g, b.g) + sq(a.b, b.b);
            }
        }
        let pairs = (n * (n - 1) / 2) as f64;
        (total / pairs).sqrt()
    }
}

#[inline]
fn sq(a: u8, b: u8) -> f64 {
    let d = a as f64 - b as f64;
    d * d
}

/// Nearest-entry lookup with any per-entry data the metric needs.
#[derive(Debug, Clone)]
pub(crate) struct Matcher<'a> {
    palette: &'a Palette,
    metric: DistanceMetric,
    labs: Vec<Lab>,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(palette: &'a Palette, metric: DistanceMetric) -> Self {
        let labs = match metric {
            DistanceMetric::Euclidean => Vec::new(),
            DistanceMetric::Ciede2000 => palette
                .entries
                .iter()
                .map(|e| Lab::from_srgb_u8(e.r, e.g, e.b))
                .collect(),
        };
        Self {
            palette,
            metric,
            labs,
        }
    }

    /// Index of the entry closest to `[r, g, b, a]`. The earliest entry wins ties.
    pub(crate) fn nearest(&self, colour: [f64; 4]) -> usize {
        let mut best_idx = 0;
        let mut best_dist = f64::MAX;
        match self.metric {
            DistanceMetric::Euclidean => {
                for (i, e) in self.palette.entries.iter().enumerate() {
                    let d: f64 = [e.r, e.g, e.b, e.a]
                        .iter()
                        .zip(colour)
                        .map(|(&p, c)| (c - p as f64) * (c - p as f64))
                        .sum();
                    if d < best_dist {
                        best_dist = d;
                        best_idx = i;
                    }
                }
            }
            DistanceMetric::Ciede2000 => {
                let lab = Lab::from_srgb(colour[0], colour[1], colour[2]);
                for (i, e) in self.labs.iter().enumerate() {
                    let d = lab.ciede2000(*e);
                    if d < best_dist {
                        best_dist = d;
                        best_idx = i;
                    }
                }
            }
        }
        best_idx
    }

    pub(crate) fn nearest_colour(&self, colour: [f64; 4]) -> RGBA8 {
        self.palette.entries[self.nearest(colour)]
    }
}

/// Threshold against a lone grey level: luminance at or below it is black,
/// anything brighter is white.
pub(crate) fn grey_threshold(p: RGBA8, level: u8) -> RGBA8 {
    if luminance(p.r, p.g, p.b) <= level {
        RGBA8::new(0, 0, 0, 255)
    } else {
        RGBA8::new(255, 255, 255, 255)
    }
}

/// Per-channel threshold against a lone colour: each channel at or above
/// the entry's becomes 255, the rest 0.
pub(crate) fn channel_threshold(p: RGBA8, entry: RGBA8) -> RGBA8 {
    let bit = |v: u8, t: u8| if v >= t { 0xff } else { 0 };
    RGBA8::new(
        bit(p.r, entry.r),
        bit(p.g, entry.g),
        bit(p.b, entry.b),
        bit(p.a, entry.a),
    )
}

/// Render every entry as a `square_size`-pixel square, left to right.
pub fn palette_preview(palette: &Palette, square_size: usize) -> Result<ImgVec<RGBA8>, QuantizeError> {
    if palette.is_empty() {
        return Err(QuantizeError::InvalidPalette("palette has no colours"));
    }
    if square_size == 0 {
        return Err(QuantizeError::ZeroDimension);
    }

    let too_large = || QuantizeError::PreviewTooLarge {
        colours: palette.len(),
        square_size,
    };
    let width = square_size.checked_mul(palette.len()).ok_or_else(too_large)?;
    let area = width.checked_mul(square_size).ok_or_else(too_large)?;
    let mut pixels = Vec::with_capacity(area);
    for _ in 0..square_size {
        for &entry in palette.entries() {
            pixels.extend(std::iter::repeat(entry).take(square_size));
        }
    }
    Ok(ImgVec::new(pixels, width, square_size))
}
