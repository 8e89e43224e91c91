//! Otsu bilevel thresholding.
//!
//! Builds cumulative count and weighted-sum tables over a 256-bucket
//! histogram and picks the cut `t` maximising `H(1, t) + H(t + 1, 255)`,
//! where `H(u, v) = ΔS(u, v)² / ΔP(u, v)` over the bucket range `u..=v`.
//! Bucket 0 contributes nothing to either table.

use crate::channels::per_channel;
use crate::histogram::ChannelHistogram;

const LEVELS: usize = 256;

/// Cumulative tables. `p[v]` and `s[v]` cover buckets `1..=v`.
struct Cumulative {
    p: [f64; LEVELS],
    s: [f64; LEVELS],
}

impl Cumulative {
    fn new(hist: &ChannelHistogram) -> Self {
        let counts = hist.counts();
        let mut p = [0.0; LEVELS];
        let mut s = [0.0; LEVELS];
        for v in 1..LEVELS {
            let n = counts[v] as f64;
            p[v] = p[v - 1] + n;
            s[v] = s[v - 1] + v as f64 * n;
        }
        Self { p, s }
    }

    /// Class-variance proxy for buckets `u..=v`. Zero unless `1 <= u < v`
    /// and the range holds pixels.
    fn class_score(&self, u: usize, v: usize) -> f64 {
        if u == 0 || u >= v {
            return 0.0;
        }
        let dp = self.p[v] - self.p[u - 1];
        if dp == 0.0 {
            return 0.0;
        }
        let ds = self.s[v] - self.s[u - 1];
        ds * ds / dp
    }
}

/// Single Otsu threshold for one channel.
///
/// A histogram with at most one occupied bucket has no cut to make; the
/// threshold is then that bucket's value (0 for an empty histogram).
pub fn bilevel_threshold(hist: &ChannelHistogram) -> u8 {
    let mut occupied = hist.occupied();
    match (occupied.next(), occupied.next()) {
        (None, _) => return 0,
        (Some((value, _)), None) => return value,
        _ => {}
    }

    let table = Cumulative::new(hist);
    let last = LEVELS - 1;
    let mut best = 0.0;
    let mut threshold = 0usize;
    for t in 0..last {
        let score = table.class_score(1, t) + table.class_score(t + 1, last);
        if score > best {
            best = score;
            threshold = t;
        }
    }
    log::trace!("otsu threshold {threshold} (score {best:.1})");
    threshold as u8
}

/// Independent thresholds for the A, R, G, B histograms, in that order.
pub fn bilevel_thresholds(hists: &[ChannelHistogram; 4]) -> [u8; 4] {
    per_channel(hists, bilevel_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist_from(pairs: &[(u8, u64)]) -> ChannelHistogram {
        let mut counts = [0u64; 256];
        for &(v, n) in pairs {
            counts[v as usize] = n;
        }
        ChannelHistogram::from_counts(counts)
    }

    #[test]
    fn single_bucket_returns_its_value() {
        for k in [0u8, 1, 77, 128, 254, 255] {
            let hist = hist_from(&[(k, 1000)]);
            assert_eq!(bilevel_threshold(&hist), k, "all mass in bucket {k}");
        }
    }

    #[test]
    fn empty_histogram_is_zero() {
        assert_eq!(bilevel_threshold(&ChannelHistogram::default()), 0);
    }

    #[test]
    fn two_clusters_are_separated() {
        let hist = hist_from(&[(40, 500), (45, 500), (200, 500), (210, 500)]);
        let t = bilevel_threshold(&hist);
        assert!(
            (45..200).contains(&t),
            "threshold {t} should fall between the clusters"
        );
    }

    #[test]
    fn earliest_maximising_cut_wins() {
        // Every t in 50..200 scores the same; the first one is kept.
        let hist = hist_from(&[(50, 10), (200, 10)]);
        assert_eq!(bilevel_threshold(&hist), 50);
    }

    #[test]
    fn class_score_needs_a_proper_range() {
        let table = Cumulative::new(&hist_from(&[(10, 4)]));
        assert_eq!(table.class_score(10, 10), 0.0);
        assert_eq!(table.class_score(0, 20), 0.0);
        assert!((table.class_score(5, 20) - 400.0).abs() < 1e-9);
        assert_eq!(table.class_score(11, 20), 0.0);
    }

    #[test]
    fn per_channel_thresholds_are_independent() {
        let hists = [
            hist_from(&[(255, 10)]),
            hist_from(&[(10, 5), (240, 5)]),
            hist_from(&[(0, 3)]),
            hist_from(&[(99, 1)]),
        ];
        let [a, r, g, b] = bilevel_thresholds(&hists);
        assert_eq!(a, 255);
        assert!((10..240).contains(&r));
        assert_eq!(g, 0);
        assert_eq!(b, 99);
    }
}
