//! Fan-out of one computation over the four A, R, G, B channel histograms.

use crate::histogram::ChannelHistogram;

/// Run `f` once per channel and return the four results in A, R, G, B order.
///
/// With the `threads` feature each channel is a rayon task and the caller
/// blocks until all four have joined. Without it the channels run in order.
/// Either way the result is the same.
pub fn per_channel<T, F>(hists: &[ChannelHistogram; 4], f: F) -> [T; 4]
where
    T: Send,
    F: Fn(&ChannelHistogram) -> T + Sync,
{
    #[cfg(feature = "threads")]
    {
        let [a, r, g, b] = hists;
        let ((ta, tr), (tg, tb)) = rayon::join(
            || rayon::join(|| f(a), || f(r)),
            || rayon::join(|| f(g), || f(b)),
        );
        [ta, tr, tg, tb]
    }

    #[cfg(not(feature = "threads"))]
    {
        let [a, r, g, b] = hists;
        [f(a), f(r), f(g), f(b)]
    }
}
