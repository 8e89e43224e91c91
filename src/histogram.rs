use std::collections::BTreeMap;

use imgref::ImgRef;
use rgb::RGBA8;

/// Luminance of an sRGB pixel, truncated to 8 bits.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as u8
}

/// Pixel counts per 8-bit channel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHistogram {
    counts: [u64; 256],
}

impl Default for ChannelHistogram {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl ChannelHistogram {
    /// Build a histogram directly from 256 bucket counts.
    pub fn from_counts(counts: [u64; 256]) -> Self {
        Self { counts }
    }

    /// Build a histogram from raw channel values.
    pub fn from_values(values: impl IntoIterator<Item = u8>) -> Self {
        let mut hist = Self::default();
        for v in values {
            hist.counts[v as usize] += 1;
        }
        hist
    }

    pub fn count(&self, value: u8) -> u64 {
        self.counts[value as usize]
    }

    pub fn counts(&self) -> &[u64; 256] {
        &self.counts
    }

    /// Total number of pixels recorded.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Pixel-count weighted mean value, or `None` for an empty histogram.
    pub fn mean(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let sum: f64 = self
            .counts
            .iter()
            .enumerate()
            .map(|(v, &n)| v as f64 * n as f64)
            .sum();
        Some(sum / total as f64)
    }

    /// Non-empty buckets in ascending value order.
    pub fn occupied(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(v, &n)| (v as u8, n))
    }

    fn add(&mut self, value: u8) {
        self.counts[value as usize] += 1;
    }
}

/// Luminance histogram of an image.
pub fn greyscale_histogram(image: ImgRef<'_, RGBA8>) -> ChannelHistogram {
    let mut hist = ChannelHistogram::default();
    for p in image.pixels() {
        hist.add(luminance(p.r, p.g, p.b));
    }
    hist
}

/// Raw per-channel histograms of an image, in A, R, G, B order.
pub fn channel_histograms(image: ImgRef<'_, RGBA8>) -> [ChannelHistogram; 4] {
    let mut hists: [ChannelHistogram; 4] = Default::default();
    for p in image.pixels() {
        hists[0].add(p.a);
        hists[1].add(p.r);
        hists[2].add(p.g);
        hists[3].add(p.b);
    }
    hists
}

/// A reduced-precision colour bucket with accumulated channel sums.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColourBin {
    /// Packed high bits of the colour; bins are ordered by this key.
    pub key: u16,
    pub a_sum: f64,
    pub r_sum: f64,
    pub g_sum: f64,
    pub b_sum: f64,
    /// Number of pixels in this bucket
    pub count: u64,
}

impl ColourBin {
    fn new(key: u16) -> Self {
        Self {
            key,
            a_sum: 0.0,
            r_sum: 0.0,
            g_sum: 0.0,
            b_sum: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, p: RGBA8) {
        self.a_sum += p.a as f64;
        self.r_sum += p.r as f64;
        self.g_sum += p.g as f64;
        self.b_sum += p.b as f64;
        self.count += 1;
    }

    /// Mean colour as `[a, r, g, b]`.
    pub fn mean_argb(&self) -> [f64; 4] {
        if self.count == 0 {
            return [0.0; 4];
        }
        let n = self.count as f64;
        [
            self.a_sum / n,
            self.r_sum / n,
            self.g_sum / n,
            self.b_sum / n,
        ]
    }
}

/// Pack the 4 most significant bits of A, R, G and B into a 16-bit key.
#[inline]
pub fn argb_index(p: RGBA8) -> u16 {
    (p.a as u16 & 0xF0) << 8 | (p.r as u16 & 0xF0) << 4 | (p.g as u16 & 0xF0) | (p.b as u16 >> 4)
}

/// Pack the 4 most significant bits of R, G and B into a 12-bit key.
#[inline]
pub fn rgb_index(p: RGBA8) -> u16 {
    (p.r as u16 & 0xF0) << 4 | (p.g as u16 & 0xF0) | (p.b as u16 >> 4)
}

/// Bin every pixel by `argb_index`. Bins come back sorted by key.
pub fn colour_bins(image: ImgRef<'_, RGBA8>) -> Vec<ColourBin> {
    bins_by(image, argb_index)
}

/// Bin every pixel by `rgb_index`, ignoring alpha. Bins come back sorted by key.
pub fn rgb_bins(image: ImgRef<'_, RGBA8>) -> Vec<ColourBin> {
    bins_by(image, rgb_index)
}

fn bins_by(image: ImgRef<'_, RGBA8>, key: impl Fn(RGBA8) -> u16) -> Vec<ColourBin> {
    let mut buckets: BTreeMap<u16, ColourBin> = BTreeMap::new();
    for p in image.pixels() {
        let k = key(p);
        buckets.entry(k).or_insert_with(|| ColourBin::new(k)).add(p);
    }
    buckets.into_values().collect()
}
