//! Pairwise nearest-neighbour (PNN) merging.
//!
//! Bins are linked into a list ordered by their key and every node caches
//! its cheapest forward merge partner. A min-heap over those cached costs
//! yields the next pair to merge; the merge survivor absorbs its partner and
//! the partner is unlinked. Repeat until `m` clusters remain.
//!
//! Caches are refreshed lazily. Each node carries two counters:
//! `merge_count` (the merge index at which it last absorbed a partner) and
//! `update_count` (the merge index at which its cache was last computed).
//! A cache is valid only while `update_count` is at least the node's own
//! `merge_count` and its partner's `merge_count`. Absorbed nodes get
//! `merge_count = u64::MAX` so a cache pointing at them never validates.

use imgref::ImgRef;
use rgb::RGBA8;

use crate::histogram::{self, ChannelHistogram, ColourBin};
use crate::lab::Lab;
use crate::merge_heap::MergeHeap;

/// Merge cost used for colour clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PnnMode {
    /// Count-weighted squared Euclidean distance over A, R, G, B.
    #[default]
    Rgb,
    /// CIEDE2000 distance between the clusters' CIE-LAB means.
    /// Bins on R, G, B only; output alpha is 255.
    Lab,
}

/// When stale nearest-neighbour caches are recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NeighbourRefresh {
    /// Only when a stale node reaches the front of the heap.
    #[default]
    Lazy,
    /// After every merge, for every stale node in the list.
    Full,
}

/// Output of a merge run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRun<C> {
    /// One colour per surviving cluster.
    pub colours: Vec<C>,
    /// Cost of each merge, in the order the merges were applied.
    pub merge_costs: Vec<f64>,
}

/// A cluster representative that can be merged with another.
trait Cluster: Copy {
    fn merge_cost(&self, n: f64, other: &Self, other_n: f64) -> f64;
    fn absorb(&mut self, n: f64, other: &Self, other_n: f64);
}

#[inline]
fn ward_factor(na: f64, nb: f64) -> f64 {
    na * nb / (na + nb)
}

/// Mean grey level.
#[derive(Debug, Clone, Copy)]
struct Grey(f64);

impl Cluster for Grey {
    fn merge_cost(&self, n: f64, other: &Self, other_n: f64) -> f64 {
        let d = self.0 - other.0;
        ward_factor(n, other_n) * d * d
    }

    fn absorb(&mut self, n: f64, other: &Self, other_n: f64) {
        self.0 = (n * self.0 + other_n * other.0) / (n + other_n);
    }
}

/// Mean colour as `[a, r, g, b]`.
#[derive(Debug, Clone, Copy)]
struct Argb([f64; 4]);

impl Cluster for Argb {
    fn merge_cost(&self, n: f64, other: &Self, other_n: f64) -> f64 {
        let dist: f64 = self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        ward_factor(n, other_n) * dist
    }

    fn absorb(&mut self, n: f64, other: &Self, other_n: f64) {
        let total = n + other_n;
        for (c, o) in self.0.iter_mut().zip(&other.0) {
            *c = (n * *c + other_n * o) / total;
        }
    }
}

/// Mean colour as `[r, g, b]` with its CIE-LAB conversion cached.
#[derive(Debug, Clone, Copy)]
struct LabCluster {
    rgb: [f64; 3],
    lab: Lab,
}

impl LabCluster {
    fn new(rgb: [f64; 3]) -> Self {
        Self {
            rgb,
            lab: Lab::from_srgb(rgb[0], rgb[1], rgb[2]),
        }
    }
}

impl Cluster for LabCluster {
    fn merge_cost(&self, _n: f64, other: &Self, _other_n: f64) -> f64 {
        self.lab.ciede2000(other.lab)
    }

    fn absorb(&mut self, n: f64, other: &Self, other_n: f64) {
        let total = n + other_n;
        let mut rgb = self.rgb;
        for (c, o) in rgb.iter_mut().zip(&other.rgb) {
            *c = (n * *c + other_n * o) / total;
        }
        *self = Self::new(rgb);
    }
}

/// Which list nodes are merge candidates for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
    /// Only the next node. Greyscale classes stay contiguous ranges.
    Adjacent,
    /// Every later node in the list.
    Forward,
}

#[derive(Debug, Clone)]
struct Node<P> {
    point: P,
    count: f64,
    prev: Option<usize>,
    next: Option<usize>,
    nn: Option<usize>,
    cost: f64,
    merge_count: u64,
    update_count: u64,
}

struct Engine<P> {
    nodes: Vec<Node<P>>,
    head: Option<usize>,
    heap: MergeHeap,
    search: Search,
    refresh: NeighbourRefresh,
    merges: u64,
    remaining: usize,
    merge_costs: Vec<f64>,
}

impl<P: Cluster> Engine<P> {
    /// Link `clusters` (already in key order) and seed every cache.
    fn new(clusters: Vec<(P, f64)>, search: Search, refresh: NeighbourRefresh) -> Self {
        let len = clusters.len();
        let nodes = clusters
            .into_iter()
            .enumerate()
            .map(|(i, (point, count))| Node {
                point,
                count,
                prev: i.checked_sub(1),
                next: (i + 1 < len).then_some(i + 1),
                nn: None,
                cost: f64::MAX,
                merge_count: 0,
                update_count: 0,
            })
            .collect();

        let mut engine = Self {
            nodes,
            head: (len > 0).then_some(0),
            heap: MergeHeap::with_capacity(len),
            search,
            refresh,
            merges: 0,
            remaining: len,
            merge_costs: Vec::new(),
        };
        for id in 0..len.saturating_sub(1) {
            engine.nearest_neighbour(id);
            engine.heap.push(id, engine.nodes[id].cost);
        }
        engine
    }

    /// Recompute the cheapest merge partner of `id` among its candidates.
    fn nearest_neighbour(&mut self, id: usize) {
        let point = self.nodes[id].point;
        let count = self.nodes[id].count;
        let mut best = f64::MAX;
        let mut nn = None;
        let mut cursor = self.nodes[id].next;
        while let Some(j) = cursor {
            let other = &self.nodes[j];
            let cost = point.merge_cost(count, &other.point, other.count);
            if cost < best {
                best = cost;
                nn = Some(j);
            }
            cursor = match self.search {
                Search::Adjacent => None,
                Search::Forward => other.next,
            };
        }

        let node = &mut self.nodes[id];
        node.nn = nn;
        node.cost = best;
        node.update_count = self.merges;
    }

    fn is_stale(&self, id: usize) -> bool {
        let node = &self.nodes[id];
        if node.update_count < node.merge_count {
            return true;
        }
        match node.nn {
            Some(nn) => node.update_count < self.nodes[nn].merge_count,
            None => true,
        }
    }

    /// Front of the heap after revalidating stale fronts.
    fn next_pair(&mut self) -> Option<usize> {
        loop {
            let (id, _) = self.heap.peek()?;
            if !self.is_stale(id) {
                return Some(id);
            }
            self.requeue(id);
        }
    }

    /// Recompute the cache of a queued node and fix its heap slot.
    fn requeue(&mut self, id: usize) {
        self.nearest_neighbour(id);
        match self.nodes[id].nn {
            Some(_) => {
                self.heap.update(id, self.nodes[id].cost);
            }
            None => {
                self.heap.remove(id);
            }
        }
    }

    fn refresh_stale(&mut self) {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            cursor = self.nodes[id].next;
            if cursor.is_some() && self.is_stale(id) {
                self.requeue(id);
            }
        }
    }

    /// Merge `a` with its cached partner.
    fn merge(&mut self, a: usize) {
        let Some(b) = self.nodes[a].nn else {
            self.heap.remove(a);
            return;
        };
        let cost = self.nodes[a].cost;
        let (b_point, b_count) = (self.nodes[b].point, self.nodes[b].count);

        let survivor = &mut self.nodes[a];
        survivor.point.absorb(survivor.count, &b_point, b_count);
        survivor.count += b_count;

        let (prev, next) = (self.nodes[b].prev, self.nodes[b].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        self.heap.remove(b);
        if next.is_none() {
            // Whoever precedes the absorbed tail is the tail now.
            if let Some(p) = prev {
                self.heap.remove(p);
            }
        }

        self.merges += 1;
        self.nodes[a].merge_count = self.merges;
        let absorbed = &mut self.nodes[b];
        absorbed.merge_count = u64::MAX;
        absorbed.prev = None;
        absorbed.next = None;
        absorbed.nn = None;

        self.remaining -= 1;
        self.merge_costs.push(cost);
        log::trace!("pnn merge #{}: {a} <- {b}, cost {cost:.3}", self.merges);
    }

    /// One merge step. Returns `false` once nothing is left to merge.
    fn step(&mut self) -> bool {
        let Some(a) = self.next_pair() else {
            return false;
        };
        self.merge(a);
        if self.refresh == NeighbourRefresh::Full {
            self.refresh_stale();
        }
        true
    }

    fn run(&mut self, m: usize) {
        while self.remaining > m && self.step() {}
    }

    /// Surviving clusters from head to tail.
    fn survivors(&self) -> impl Iterator<Item = &Node<P>> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            let node = &self.nodes[id];
            cursor = node.next;
            Some(node)
        })
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let mut expected: Vec<usize> = Vec::new();
        let mut cursor = self.head;
        let mut listed = 0;
        while let Some(id) = cursor {
            listed += 1;
            let node = &self.nodes[id];
            if let Some(next) = node.next {
                assert_eq!(self.nodes[next].prev, Some(id), "broken back link at {next}");
                expected.push(id);
            }
            cursor = node.next;
        }
        assert_eq!(listed, self.remaining);

        let mut queued: Vec<usize> = self.heap.ids().collect();
        queued.sort_unstable();
        expected.sort_unstable();
        assert_eq!(queued, expected, "heap must hold exactly the non-tail nodes");
    }
}

fn run_engine<P: Cluster>(
    clusters: Vec<(P, f64)>,
    m: usize,
    search: Search,
    refresh: NeighbourRefresh,
) -> Engine<P> {
    let bins = clusters.len();
    let mut engine = Engine::new(clusters, search, refresh);
    engine.run(m);
    log::debug!(
        "pnn: {bins} bins -> {} clusters after {} merges",
        engine.remaining,
        engine.merges
    );
    engine
}

/// Merge the occupied buckets of a greyscale histogram down to `m` levels.
///
/// Only neighbouring levels merge, so every class is a contiguous value
/// range. Levels come back sorted ascending.
pub fn quantize_greyscale(
    hist: &ChannelHistogram,
    m: usize,
    refresh: NeighbourRefresh,
) -> MergeRun<u8> {
    let clusters = hist
        .occupied()
        .map(|(v, n)| (Grey(v as f64), n as f64))
        .collect();
    let mut engine = run_engine(clusters, m, Search::Adjacent, refresh);

    let mut colours: Vec<u8> = engine
        .survivors()
        .map(|node| node.point.0.clamp(0.0, 255.0) as u8)
        .collect();
    colours.sort_unstable();
    MergeRun {
        colours,
        merge_costs: core::mem::take(&mut engine.merge_costs),
    }
}

/// Merge colour bins down to `m` colours.
///
/// `bins` must be sorted by key, as `histogram::colour_bins` and
/// `histogram::rgb_bins` return them.
pub fn quantize_bins(
    bins: &[ColourBin],
    m: usize,
    mode: PnnMode,
    refresh: NeighbourRefresh,
) -> MergeRun<RGBA8> {
    match mode {
        PnnMode::Rgb => {
            let clusters = bins
                .iter()
                .map(|bin| (Argb(bin.mean_argb()), bin.count as f64))
                .collect();
            let mut engine = run_engine(clusters, m, Search::Forward, refresh);
            let colours = engine
                .survivors()
                .map(|node| {
                    let [a, r, g, b] = node.point.0.map(to_channel);
                    RGBA8::new(r, g, b, a)
                })
                .collect();
            MergeRun {
                colours,
                merge_costs: core::mem::take(&mut engine.merge_costs),
            }
        }
        PnnMode::Lab => {
            let clusters = bins
                .iter()
                .map(|bin| {
                    let [_, r, g, b] = bin.mean_argb();
                    (LabCluster::new([r, g, b]), bin.count as f64)
                })
                .collect();
            let mut engine = run_engine(clusters, m, Search::Forward, refresh);
            let colours = engine
                .survivors()
                .map(|node| {
                    let [r, g, b] = node.point.rgb.map(to_channel);
                    RGBA8::new(r, g, b, 255)
                })
                .collect();
            MergeRun {
                colours,
                merge_costs: core::mem::take(&mut engine.merge_costs),
            }
        }
    }
}

/// Bin `image` for `mode` and merge down to `m` colours.
pub fn quantize_colour(
    image: ImgRef<'_, RGBA8>,
    m: usize,
    mode: PnnMode,
    refresh: NeighbourRefresh,
) -> MergeRun<RGBA8> {
    let bins = match mode {
        PnnMode::Rgb => histogram::colour_bins(image),
        PnnMode::Lab => histogram::rgb_bins(image),
    };
    quantize_bins(&bins, m, mode, refresh)
}

#[inline]
fn to_channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::ImgVec;

    fn hist_from(pairs: &[(u8, u64)]) -> ChannelHistogram {
        let mut counts = [0u64; 256];
        for &(v, n) in pairs {
            counts[v as usize] = n;
        }
        ChannelHistogram::from_counts(counts)
    }

    /// Deterministic busy image with many distinct bins.
    fn noisy_image(width: usize, height: usize) -> ImgVec<RGBA8> {
        let mut pixels = Vec::with_capacity(width * height);
        let mut state = 0x2545_f491u32;
        for _ in 0..width * height {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, a] = state.to_le_bytes();
            pixels.push(RGBA8::new(r, g, b, a | 0x80));
        }
        ImgVec::new(pixels, width, height)
    }

    fn assert_non_decreasing(costs: &[f64]) {
        for (i, w) in costs.windows(2).enumerate() {
            assert!(
                w[1] >= w[0] - 1e-9 * w[0].abs().max(1.0),
                "merge {} cost {} below previous {}",
                i + 1,
                w[1],
                w[0]
            );
        }
    }

    #[test]
    fn greyscale_merges_closest_levels() {
        let hist = hist_from(&[(10, 5), (12, 5), (100, 1), (200, 3)]);
        let run = quantize_greyscale(&hist, 3, NeighbourRefresh::Lazy);
        assert_eq!(run.colours, vec![11, 100, 200]);
        assert_eq!(run.merge_costs, vec![10.0]);
    }

    #[test]
    fn greyscale_keeps_levels_when_m_is_large() {
        let hist = hist_from(&[(3, 1), (90, 2), (91, 7)]);
        let run = quantize_greyscale(&hist, 10, NeighbourRefresh::Lazy);
        assert_eq!(run.colours, vec![3, 90, 91]);
        assert!(run.merge_costs.is_empty());
    }

    #[test]
    fn greyscale_ramp_merge_costs_are_monotone() {
        let hist = ChannelHistogram::from_values((0..=255u8).map(|v| v.wrapping_mul(v) | 1));
        for refresh in [NeighbourRefresh::Lazy, NeighbourRefresh::Full] {
            let run = quantize_greyscale(&hist, 4, refresh);
            assert_eq!(run.colours.len(), 4);
            assert!(run.colours.windows(2).all(|w| w[0] <= w[1]));
            assert_non_decreasing(&run.merge_costs);
        }
    }

    #[test]
    fn three_colours_survive_unchanged() {
        let colours = [
            RGBA8::new(255, 0, 0, 255),
            RGBA8::new(0, 255, 0, 255),
            RGBA8::new(0, 0, 255, 255),
        ];
        let pixels: Vec<RGBA8> = colours.iter().cycle().take(12).copied().collect();
        let img = ImgVec::new(pixels, 4, 3);
        let run = quantize_colour(img.as_ref(), 3, PnnMode::Rgb, NeighbourRefresh::Lazy);
        assert_eq!(run.colours.len(), 3);
        for c in colours {
            assert!(run.colours.contains(&c), "{c:?} missing from {:?}", run.colours);
        }
        assert!(run.merge_costs.is_empty());
    }

    #[test]
    fn near_colours_merge_first() {
        let pixels = vec![
            RGBA8::new(200, 10, 10, 255),
            RGBA8::new(216, 10, 10, 255),
            RGBA8::new(10, 10, 200, 255),
            RGBA8::new(10, 10, 200, 255),
        ];
        let img = ImgVec::new(pixels, 2, 2);
        let run = quantize_colour(img.as_ref(), 2, PnnMode::Rgb, NeighbourRefresh::Lazy);
        assert_eq!(run.colours.len(), 2);
        assert!(run.colours.contains(&RGBA8::new(208, 10, 10, 255)));
        assert!(run.colours.contains(&RGBA8::new(10, 10, 200, 255)));
    }

    #[test]
    fn rgb_merge_costs_never_decrease() {
        let img = noisy_image(32, 32);
        let bins = histogram::colour_bins(img.as_ref());
        assert!(bins.len() > 100);
        for refresh in [NeighbourRefresh::Lazy, NeighbourRefresh::Full] {
            let run = quantize_bins(&bins, 8, PnnMode::Rgb, refresh);
            assert_eq!(run.colours.len(), 8);
            assert_eq!(run.merge_costs.len(), bins.len() - 8);
            assert_non_decreasing(&run.merge_costs);
        }
    }

    #[test]
    fn lazy_and_full_refresh_agree() {
        let img = noisy_image(24, 24);
        let bins = histogram::colour_bins(img.as_ref());
        for m in [1, 5, 16, 64] {
            let lazy = quantize_bins(&bins, m, PnnMode::Rgb, NeighbourRefresh::Lazy);
            let full = quantize_bins(&bins, m, PnnMode::Rgb, NeighbourRefresh::Full);
            assert_eq!(lazy.colours, full.colours, "m={m}");
        }
    }

    #[test]
    fn heap_tracks_non_tail_nodes_after_every_merge() {
        let img = noisy_image(16, 16);
        let clusters: Vec<(Argb, f64)> = histogram::colour_bins(img.as_ref())
            .iter()
            .map(|bin| (Argb(bin.mean_argb()), bin.count as f64))
            .collect();
        for refresh in [NeighbourRefresh::Lazy, NeighbourRefresh::Full] {
            let mut engine = Engine::new(clusters.clone(), Search::Forward, refresh);
            engine.assert_invariants();
            while engine.remaining > 1 && engine.step() {
                engine.assert_invariants();
            }
            assert_eq!(engine.remaining, 1);
            assert!(engine.heap.is_empty());
        }
    }

    #[test]
    fn absorbed_nodes_never_validate() {
        let clusters = vec![
            (Grey(0.0), 1.0),
            (Grey(1.0), 1.0),
            (Grey(50.0), 1.0),
            (Grey(52.0), 1.0),
        ];
        let mut engine = Engine::new(clusters, Search::Adjacent, NeighbourRefresh::Lazy);
        assert!(engine.step());
        // 0 absorbed 1; node 0's cache is stale until recomputed.
        assert_eq!(engine.nodes[1].merge_count, u64::MAX);
        assert!(engine.is_stale(0));
        assert!(!engine.is_stale(2));
        assert!(engine.step());
        assert_eq!(engine.nodes[3].merge_count, u64::MAX);
        assert_eq!(engine.merges, 2);
        let means: Vec<f64> = engine.survivors().map(|n| n.point.0).collect();
        assert_eq!(means, vec![0.5, 51.0]);
    }

    #[test]
    fn lab_mode_is_opaque() {
        let pixels = vec![
            RGBA8::new(250, 250, 250, 10),
            RGBA8::new(5, 5, 5, 200),
            RGBA8::new(240, 20, 20, 0),
            RGBA8::new(245, 25, 25, 90),
        ];
        let img = ImgVec::new(pixels, 4, 1);
        let run = quantize_colour(img.as_ref(), 3, PnnMode::Lab, NeighbourRefresh::Lazy);
        assert_eq!(run.colours.len(), 3);
        assert!(run.colours.iter().all(|c| c.a == 255));
        assert!(run.colours.contains(&RGBA8::new(250, 250, 250, 255)));
        assert!(run.colours.contains(&RGBA8::new(5, 5, 5, 255)));
    }

    #[test]
    fn single_bin_cannot_merge() {
        let img = ImgVec::new(vec![RGBA8::new(1, 2, 3, 4); 6], 3, 2);
        let run = quantize_colour(img.as_ref(), 1, PnnMode::Rgb, NeighbourRefresh::Lazy);
        assert_eq!(run.colours, vec![RGBA8::new(1, 2, 3, 4)]);
    }
}
