#![forbid(unsafe_code)]

pub mod channels;
pub mod dither;
pub mod error;
pub mod histogram;
pub mod lab;
pub mod lmq;
pub mod merge_heap;
pub mod otsu;
pub mod palette;
pub mod pca_split;
pub mod pnn;
pub mod remap;

pub use dither::DitherMode;
pub use error::QuantizeError;
pub use palette::{palette_preview, DistanceMetric, Palette};
pub use pca_split::AxisSelection;
pub use pnn::{NeighbourRefresh, PnnMode};
pub use remap::{render, RenderConfig};

use imgref::ImgRef;
use rgb::RGBA8;

/// Palette construction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Otsu bilevel threshold. Produces exactly one entry.
    Otsu,
    /// Iterative multilevel thresholding. Colour input supports one entry only.
    Lmq,
    /// Pairwise nearest-neighbour merging.
    Pnn(PnnMode),
    /// Binary splitting along the principal colour axis. Colour input only.
    PcaSplit(AxisSelection),
}

impl Default for Method {
    fn default() -> Self {
        Self::Pnn(PnnMode::default())
    }
}

impl Method {
    fn name(&self) -> &'static str {
        match self {
            Self::Otsu => "otsu",
            Self::Lmq => "lmq",
            Self::Pnn(_) => "pnn",
            Self::PcaSplit(_) => "pca split",
        }
    }
}

/// Configuration for palette construction.
#[derive(Debug, Clone)]
pub struct QuantizeConfig {
    pub method: Method,
    /// Target palette size.
    pub max_colors: usize,
    /// Stale-neighbour strategy for [`Method::Pnn`]; ignored otherwise.
    pub neighbour_refresh: NeighbourRefresh,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            max_colors: 16,
            neighbour_refresh: NeighbourRefresh::default(),
        }
    }
}

impl QuantizeConfig {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn max_colors(mut self, n: usize) -> Self {
        self.max_colors = n;
        self
    }

    pub fn neighbour_refresh(mut self, refresh: NeighbourRefresh) -> Self {
        self.neighbour_refresh = refresh;
        self
    }
}

/// Build a palette of grey levels from the luminance of `image`.
///
/// Levels are opaque greys. PNN and LMQ emit them ascending, Otsu emits its
/// single threshold.
pub fn quantize_greyscale(
    image: ImgRef<'_, RGBA8>,
    config: &QuantizeConfig,
) -> Result<Palette, QuantizeError> {
    validate(image, config, false)?;

    let hist = histogram::greyscale_histogram(image);
    let m = config.max_colors;
    let levels = match config.method {
        Method::Otsu => vec![otsu::bilevel_threshold(&hist)],
        Method::Lmq => {
            let thresholds = lmq::multilevel_threshold(&hist, m);
            log::debug!("lmq: {} passes, cuts {:?}", thresholds.iterations, thresholds.cuts);
            thresholds.values()
        }
        // Greyscale merging has a single cost; the colour mode does not apply.
        Method::Pnn(_) => pnn::quantize_greyscale(&hist, m, config.neighbour_refresh).colours,
        Method::PcaSplit(_) => {
            return Err(QuantizeError::unsupported(
                config.method.name(),
                "greyscale input is not supported",
            ));
        }
    };
    log::debug!("{}: {} grey levels", config.method.name(), levels.len());
    Ok(Palette::grey(levels))
}

/// Build a colour palette from `image`.
pub fn quantize_colour(
    image: ImgRef<'_, RGBA8>,
    config: &QuantizeConfig,
) -> Result<Palette, QuantizeError> {
    validate(image, config, true)?;

    let m = config.max_colors;
    let entries = match config.method {
        Method::Otsu => {
            let hists = histogram::channel_histograms(image);
            let [a, r, g, b] = otsu::bilevel_thresholds(&hists);
            vec![RGBA8::new(r, g, b, a)]
        }
        Method::Lmq => {
            let hists = histogram::channel_histograms(image);
            let [a, r, g, b] =
                channels::per_channel(&hists, |h| lmq::multilevel_threshold(h, 1).values()[0]);
            vec![RGBA8::new(r, g, b, a)]
        }
        Method::Pnn(mode) => pnn::quantize_colour(image, m, mode, config.neighbour_refresh).colours,
        Method::PcaSplit(selection) => pca_split::quantize(image, m, selection),
    };
    log::debug!("{}: {} colours", config.method.name(), entries.len());
    Ok(Palette::colour(entries))
}

fn validate(
    image: ImgRef<'_, RGBA8>,
    config: &QuantizeConfig,
    colour: bool,
) -> Result<(), QuantizeError> {
    let method = config.method.name();
    if config.max_colors == 0 {
        return Err(QuantizeError::unsupported(method, "palette size must be at least 1"));
    }
    match config.method {
        Method::Otsu if config.max_colors > 1 => {
            return Err(QuantizeError::unsupported(method, "produces a single threshold"));
        }
        Method::Lmq if colour && config.max_colors > 1 => {
            return Err(QuantizeError::unsupported(
                method,
                "colour input supports a single entry",
            ));
        }
        Method::PcaSplit(_) if !colour => {
            return Err(QuantizeError::unsupported(method, "greyscale input is not supported"));
        }
        _ => {}
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(QuantizeError::ZeroDimension);
    }
    Ok(())
}
