use imgref::{ImgRef, ImgVec};
use rgb::RGBA8;

use crate::dither::{self, DitherMode, BAYER_4X4, BAYER_8X8};
use crate::error::QuantizeError;
use crate::palette::{channel_threshold, grey_threshold, DistanceMetric, Matcher, Palette};

/// Configuration for mapping an image onto a palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderConfig {
    /// Dithering mode. Ignored for single-entry palettes.
    pub dither: DitherMode,
    /// Metric for the nearest-entry lookup.
    pub metric: DistanceMetric,
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dither(mut self, mode: DitherMode) -> Self {
        self.dither = mode;
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

/// Replace every pixel of `image` with a palette colour.
///
/// A single-entry palette thresholds instead of matching: against a grey
/// level the output is pure black or white by luminance, against a colour
/// each channel becomes 0 or 255 on its own.
pub fn render(
    image: ImgRef<'_, RGBA8>,
    palette: &Palette,
    config: &RenderConfig,
) -> Result<ImgVec<RGBA8>, QuantizeError> {
    if palette.is_empty() {
        return Err(QuantizeError::InvalidPalette("palette has no colours"));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(QuantizeError::ZeroDimension);
    }

    if let [entry] = palette.entries() {
        let entry = *entry;
        let out: Vec<RGBA8> = if palette.is_greyscale() {
            image.pixels().map(|p| grey_threshold(p, entry.r)).collect()
        } else {
            image.pixels().map(|p| channel_threshold(p, entry)).collect()
        };
        return Ok(ImgVec::new(out, image.width(), image.height()));
    }

    let matcher = Matcher::new(palette, config.metric);
    log::debug!(
        "render {}x{} onto {} colours, {:?}, {:?}",
        image.width(),
        image.height(),
        palette.len(),
        config.dither,
        config.metric
    );
    let out = match config.dither {
        DitherMode::None => dither::nearest_only(image, &matcher),
        DitherMode::FloydSteinberg => dither::floyd_steinberg(image, &matcher),
        DitherMode::Bayer4x4 => dither::ordered(image, &matcher, &BAYER_4X4, palette.spread()),
        DitherMode::Bayer8x8 => dither::ordered(image, &matcher, &BAYER_8X8, palette.spread()),
    };
    Ok(out)
}
