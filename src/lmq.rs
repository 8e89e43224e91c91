//! Multilevel thresholding by Lloyd-style refinement of histogram cut points.
//!
//! `m + 1` cut points start evenly spaced over `0..=255`. Each pass assigns
//! every bucket to a segment, takes the count-weighted mean of each segment
//! and moves each interior cut to the midpoint of its neighbouring means.
//! Refinement stops once a pass leaves the cuts unchanged.

use crate::histogram::ChannelHistogram;

/// Upper bound on refinement passes. Cut points can cycle between two
/// states instead of settling.
pub const MAX_ITERATIONS: usize = 1000;

/// One output segment of the histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Count-weighted mean bucket value; 0 for an empty segment.
    pub mean: f64,
    /// Pixels assigned to the segment.
    pub count: u64,
}

impl Segment {
    /// The representative channel value (mean truncated to 8 bits).
    pub fn value(&self) -> u8 {
        self.mean.clamp(0.0, 255.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Segments from darkest to brightest.
    pub segments: Vec<Segment>,
    /// Final cut points, `segments.len() + 1` of them.
    pub cuts: Vec<u8>,
    /// Refinement passes performed.
    pub iterations: usize,
}

impl Thresholds {
    pub fn values(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::value).collect()
    }
}

/// Refine `m` segments over `hist`. Returns no segments for `m == 0`.
pub fn multilevel_threshold(hist: &ChannelHistogram, m: usize) -> Thresholds {
    if m == 0 {
        return Thresholds {
            segments: Vec::new(),
            cuts: vec![0],
            iterations: 0,
        };
    }

    refine(hist, m, MAX_ITERATIONS)
}

/// Refinement loop for `m >= 1` segments, giving up after `max_passes`.
fn refine(hist: &ChannelHistogram, m: usize, max_passes: usize) -> Thresholds {
    let mut cuts: Vec<u8> = (0..=m).map(|i| (i * 255 / m) as u8).collect();
    let mut segments: Vec<Segment>;
    let mut iterations = 0;

    loop {
        iterations += 1;
        segments = partition(hist, &cuts);

        let mut next = cuts.clone();
        for i in 1..m {
            let mid = (segments[i - 1].mean + segments[i].mean) / 2.0;
            next[i] = mid.floor().clamp(0.0, 255.0) as u8;
        }

        if next == cuts {
            break;
        }
        cuts = next;

        if iterations >= max_passes {
            log::warn!("lmq: cut points still moving after {iterations} passes, stopping");
            segments = partition(hist, &cuts);
            break;
        }
    }

    log::debug!("lmq: {m} segments after {iterations} passes, cuts {cuts:?}");
    Thresholds {
        segments,
        cuts,
        iterations,
    }
}

/// Assign each bucket to the first segment `i` with `v <= cuts[i + 1]`.
/// Bucket 0 always lands in the first segment, and the last cut is 255 so
/// every bucket lands exactly once.
fn partition(hist: &ChannelHistogram, cuts: &[u8]) -> Vec<Segment> {
    let m = cuts.len() - 1;
    let mut sums = vec![0.0f64; m];
    let mut counts = vec![0u64; m];

    for (v, n) in hist.occupied() {
        let seg = cuts[1..m]
            .iter()
            .position(|&cut| v <= cut)
            .unwrap_or(m - 1);
        sums[seg] += v as f64 * n as f64;
        counts[seg] += n;
    }

    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| Segment {
            mean: if count == 0 { 0.0 } else { sum / count as f64 },
            count,
        })
        .collect()
}
