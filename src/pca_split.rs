//! Binary splitting along the principal colour axis.
//!
//! Starting from one root holding every pixel, the leaf with the best
//! splittability score is bisected at its mean along its dominant axis.
//! After `n` splits the tree has `n + 1` leaves; every leaf but the last
//! one in breadth-first order contributes its mean to the palette.

use std::collections::VecDeque;

use imgref::ImgRef;
use nalgebra::{Matrix3, Vector3};
use rgb::RGBA8;

/// How a leaf's projection axis and splittability score are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisSelection {
    /// Eigenvector with the largest Euclidean norm; the score is that norm.
    #[default]
    VectorMagnitude,
    /// Eigenvector with the largest eigenvalue; the score is that eigenvalue.
    Eigenvalue,
}

/// Aggregates of a pixel set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub count: usize,
    /// Σ pixel
    pub sum: Vector3<f64>,
    /// Σ pixel · pixelᵀ
    pub moment: Matrix3<f64>,
    pub mean: Vector3<f64>,
    /// `moment / count − mean · meanᵀ`
    pub covariance: Matrix3<f64>,
}

impl Stats {
    fn from_sums(count: usize, sum: Vector3<f64>, moment: Matrix3<f64>) -> Self {
        let (mean, covariance) = if count == 0 {
            (Vector3::zeros(), Matrix3::zeros())
        } else {
            let n = count as f64;
            let mean = sum / n;
            (mean, moment / n - mean * mean.transpose())
        };
        Self {
            count,
            sum,
            moment,
            mean,
            covariance,
        }
    }

    fn of(pixels: &[Vector3<f64>], members: &[usize]) -> Self {
        let mut sum = Vector3::zeros();
        let mut moment = Matrix3::zeros();
        for &id in members {
            let p = &pixels[id];
            sum += p;
            moment += p * p.transpose();
        }
        Self::from_sums(members.len(), sum, moment)
    }

    /// Aggregates of `self` with the pixels of `part` taken away.
    fn without(&self, part: &Stats) -> Self {
        Self::from_sums(
            self.count - part.count,
            self.sum - part.sum,
            self.moment - part.moment,
        )
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Pixel ids; empty once the node has been split.
    members: Vec<usize>,
    stats: Stats,
    children: Option<(usize, usize)>,
}

impl TreeNode {
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn children(&self) -> Option<(usize, usize)> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Arena-backed split tree. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct SplitTree {
    pixels: Vec<Vector3<f64>>,
    nodes: Vec<TreeNode>,
    selection: AxisSelection,
}

impl SplitTree {
    /// Root holding every pixel of `image` (alpha is ignored).
    pub fn new(image: ImgRef<'_, RGBA8>, selection: AxisSelection) -> Self {
        let pixels = image
            .pixels()
            .map(|p| Vector3::new(p.r as f64, p.g as f64, p.b as f64))
            .collect();
        Self::from_pixels(pixels, selection)
    }

    pub fn from_pixels(pixels: Vec<Vector3<f64>>, selection: AxisSelection) -> Self {
        let members: Vec<usize> = (0..pixels.len()).collect();
        let stats = Stats::of(&pixels, &members);
        Self {
            pixels,
            nodes: vec![TreeNode {
                members,
                stats,
                children: None,
            }],
            selection,
        }
    }

    pub fn node(&self, id: usize) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recompute a node's aggregates from its pixels.
    pub fn compute_stats(&mut self, id: usize) {
        let stats = Stats::of(&self.pixels, &self.nodes[id].members);
        self.nodes[id].stats = stats;
    }

    /// Projection axis and splittability score of a node.
    ///
    /// Empty nodes and non-finite covariances score 0 with a zero axis.
    pub fn dominant_axis(&self, id: usize) -> (Vector3<f64>, f64) {
        let stats = &self.nodes[id].stats;
        if stats.count == 0 || stats.covariance.iter().any(|v| !v.is_finite()) {
            return (Vector3::zeros(), 0.0);
        }

        let eigen = stats.covariance.symmetric_eigen();
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for i in 0..3 {
            let score = match self.selection {
                AxisSelection::VectorMagnitude => eigen.eigenvectors.column(i).norm(),
                AxisSelection::Eigenvalue => eigen.eigenvalues[i],
            };
            if score > best_score {
                best = i;
                best_score = score;
            }
        }

        let score = if best_score.is_finite() {
            best_score.max(0.0)
        } else {
            0.0
        };
        (eigen.eigenvectors.column(best).into_owned(), score)
    }

    /// Leaf ids in breadth-first order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut queue = VecDeque::from([0]);
        while let Some(id) = queue.pop_front() {
            match self.nodes[id].children {
                Some((left, right)) => {
                    queue.push_back(left);
                    queue.push_back(right);
                }
                None => leaves.push(id),
            }
        }
        leaves
    }

    /// Leaf with the highest score; the earliest leaf wins ties.
    ///
    /// When every leaf scores 0 the earliest non-empty leaf is chosen, so a
    /// split is always possible.
    pub fn select_next_to_split(&self) -> usize {
        let leaves = self.leaves();
        let mut best = None;
        let mut best_score = 0.0;
        for &id in &leaves {
            let (_, score) = self.dominant_axis(id);
            if score > best_score {
                best_score = score;
                best = Some(id);
            }
        }
        best.or_else(|| {
            leaves
                .iter()
                .copied()
                .find(|&id| self.nodes[id].stats.count > 0)
        })
        .or_else(|| leaves.first().copied())
        .unwrap_or(0)
    }

    /// Bisect a leaf at its mean along its dominant axis. Returns the new
    /// `(left, right)` ids, or `None` if `id` has already been split; `left`
    /// holds pixels projecting at or below the mean.
    pub fn split(&mut self, id: usize) -> Option<(usize, usize)> {
        if !self.nodes[id].is_leaf() {
            return None;
        }
        self.compute_stats(id);
        let (axis, _) = self.dominant_axis(id);
        let parent = self.nodes[id].stats;
        let limit = axis.dot(&parent.mean);

        let members = std::mem::take(&mut self.nodes[id].members);
        let pixels = &self.pixels;
        let (left, right): (Vec<usize>, Vec<usize>) = members
            .into_iter()
            .partition(|&p| axis.dot(&pixels[p]) <= limit);

        let left_stats = Stats::of(pixels, &left);
        let right_stats = parent.without(&left_stats);
        log::trace!(
            "pca split node {id}: {} | {} pixels",
            left_stats.count,
            right_stats.count
        );

        let left_id = self.nodes.len();
        self.nodes.push(TreeNode {
            members: left,
            stats: left_stats,
            children: None,
        });
        self.nodes.push(TreeNode {
            members: right,
            stats: right_stats,
            children: None,
        });
        self.nodes[id].children = Some((left_id, left_id + 1));
        Some((left_id, left_id + 1))
    }

    /// Leaf means as opaque colours, all leaves but the last.
    pub fn palette(&self) -> Vec<RGBA8> {
        let mut leaves = self.leaves();
        leaves.pop();
        leaves
            .into_iter()
            .map(|id| {
                let mean = self.nodes[id].stats.mean;
                RGBA8::new(to_channel(mean.x), to_channel(mean.y), to_channel(mean.z), 255)
            })
            .collect()
    }
}

#[inline]
fn to_channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// Split `image` `splits` times and return the resulting palette.
pub fn quantize(image: ImgRef<'_, RGBA8>, splits: usize, selection: AxisSelection) -> Vec<RGBA8> {
    let mut tree = SplitTree::new(image, selection);
    for _ in 0..splits {
        let id = tree.select_next_to_split();
        if tree.split(id).is_none() {
            break;
        }
    }
    let palette = tree.palette();
    log::debug!("pca: {} nodes, {} colours", tree.len(), palette.len());
    palette
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::ImgVec;

    fn v(r: f64, g: f64, b: f64) -> Vector3<f64> {
        Vector3::new(r, g, b)
    }

    fn scattered(count: usize) -> Vec<Vector3<f64>> {
        (0..count)
            .map(|i| {
                let i = i as f64;
                v(
                    (i * 37.0) % 256.0,
                    (i * 91.0 + 13.0) % 256.0,
                    (i * i * 7.0) % 256.0,
                )
            })
            .collect()
    }

    fn assert_close(a: Vector3<f64>, b: Vector3<f64>) {
        assert!((a - b).norm() < 1e-6, "{a:?} != {b:?}");
    }

    #[test]
    fn stats_match_definition() {
        let pixels = vec![v(0.0, 0.0, 0.0), v(2.0, 4.0, 6.0)];
        let stats = Stats::of(&pixels, &[0, 1]);
        assert_eq!(stats.count, 2);
        assert_close(stats.mean, v(1.0, 2.0, 3.0));
        // Population covariance of two points: a quarter of the outer product of their difference.
        let d = v(1.0, 2.0, 3.0);
        let expected = d * d.transpose();
        assert!((stats.covariance - expected).norm() < 1e-9);
    }

    #[test]
    fn empty_node_has_zero_mean_and_score() {
        let pixels = vec![v(5.0, 5.0, 5.0); 4];
        for selection in [AxisSelection::VectorMagnitude, AxisSelection::Eigenvalue] {
            let mut tree = SplitTree::from_pixels(pixels.clone(), selection);
            let (left, right) = tree.split(0).unwrap();
            assert_eq!(tree.node(left).stats().count, 4);
            let empty = tree.node(right).stats();
            assert_eq!(empty.count, 0);
            assert_eq!(empty.mean, Vector3::zeros());
            assert_eq!(tree.dominant_axis(right), (Vector3::zeros(), 0.0));
        }
    }

    #[test]
    fn split_moves_pixels_and_conserves_aggregates() {
        let mut tree = SplitTree::from_pixels(scattered(200), AxisSelection::Eigenvalue);
        let parent = *tree.node(0).stats();
        let (left, right) = tree.split(0).unwrap();

        assert!(tree.node(0).members().is_empty());
        let l = tree.node(left).stats();
        let r = tree.node(right).stats();
        assert_eq!(l.count + r.count, parent.count);
        assert_eq!(
            tree.node(left).members().len() + tree.node(right).members().len(),
            200
        );
        let weighted = l.mean * l.count as f64 + r.mean * r.count as f64;
        assert_close(weighted, parent.mean * parent.count as f64);

        // The subtracted right side agrees with a direct computation.
        let direct = Stats::of(&tree.pixels, tree.node(right).members());
        assert_close(direct.mean, r.mean);
        assert!((direct.covariance - r.covariance).norm() < 1e-6);
    }

    #[test]
    fn repeated_splits_partition_every_pixel() {
        for selection in [AxisSelection::VectorMagnitude, AxisSelection::Eigenvalue] {
            let mut tree = SplitTree::from_pixels(scattered(300), selection);
            for _ in 0..7 {
                let id = tree.select_next_to_split();
                assert!(tree.split(id).is_some());
            }
            assert_eq!(tree.len(), 15);
            let leaves = tree.leaves();
            let total: usize = leaves.iter().map(|&id| tree.node(id).stats().count).sum();
            assert_eq!(total, 300);
            let members: usize = leaves.iter().map(|&id| tree.node(id).members().len()).sum();
            assert_eq!(members, 300);

            for id in 0..tree.len() {
                if let Some((l, r)) = tree.node(id).children() {
                    let (p, l, r) = (
                        tree.node(id).stats(),
                        tree.node(l).stats(),
                        tree.node(r).stats(),
                    );
                    let weighted = l.mean * l.count as f64 + r.mean * r.count as f64;
                    assert!((weighted - p.mean * p.count as f64).norm() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn eigenvalue_axis_follows_the_spread() {
        let pixels: Vec<_> = (0..50).map(|i| v(i as f64 * 5.0, 100.0, 100.0)).collect();
        let tree = SplitTree::from_pixels(pixels, AxisSelection::Eigenvalue);
        let (axis, score) = tree.dominant_axis(0);
        assert!((axis.x.abs() - 1.0).abs() < 1e-9, "axis {axis:?}");
        assert!(score > 0.0);
    }

    #[test]
    fn eigenvalue_selection_prefers_wider_leaf() {
        // Tight dark cluster plus a long red ramp.
        let mut pixels: Vec<_> = (0..20).map(|i| v(10.0 + (i % 2) as f64, 10.0, 10.0)).collect();
        pixels.extend((0..20).map(|i| v(100.0 + i as f64 * 7.0, 200.0, 0.0)));
        let mut tree = SplitTree::from_pixels(pixels, AxisSelection::Eigenvalue);
        let (left, right) = tree.split(0).unwrap();
        let ramp = if tree.node(left).stats().count == 20 && tree.node(left).stats().mean.y > 100.0 {
            left
        } else {
            right
        };
        assert_eq!(tree.node(ramp).stats().count, 20);
        assert_eq!(tree.select_next_to_split(), ramp);
    }

    #[test]
    fn magnitude_scores_unit_eigenvectors() {
        let tree = SplitTree::from_pixels(scattered(64), AxisSelection::VectorMagnitude);
        let (axis, score) = tree.dominant_axis(0);
        assert!((score - 1.0).abs() < 1e-9);
        assert!((axis.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn n_splits_give_n_colours() {
        let pixels: Vec<RGBA8> = (0..64u8)
            .map(|i| RGBA8::new(i * 4, 255 - i * 3, (i % 8) * 30, 255))
            .collect();
        let img = ImgVec::new(pixels, 8, 8);
        for n in [1, 2, 5, 9] {
            let palette = quantize(img.as_ref(), n, AxisSelection::VectorMagnitude);
            assert_eq!(palette.len(), n);
            assert!(palette.iter().all(|c| c.a == 255));
        }
    }

    #[test]
    fn zero_splits_give_no_colours() {
        let img = ImgVec::new(vec![RGBA8::new(9, 9, 9, 255); 4], 2, 2);
        assert!(quantize(img.as_ref(), 0, AxisSelection::Eigenvalue).is_empty());
    }

    #[test]
    fn uniform_image_still_splits_n_times() {
        // Every leaf scores 0, so each split takes the earliest non-empty
        // leaf and pushes all of its pixels left.
        let img = ImgVec::new(vec![RGBA8::new(9, 9, 9, 255); 16], 4, 4);
        for n in [1, 3, 6] {
            let palette = quantize(img.as_ref(), n, AxisSelection::Eigenvalue);
            assert_eq!(palette.len(), n);
        }
        let black = RGBA8::new(0, 0, 0, 255);
        assert_eq!(
            quantize(img.as_ref(), 3, AxisSelection::Eigenvalue),
            vec![black, black, RGBA8::new(9, 9, 9, 255)]
        );
    }

    #[test]
    fn zero_scores_fall_back_to_earliest_non_empty_leaf() {
        let mut tree = SplitTree::from_pixels(vec![v(7.0, 7.0, 7.0); 5], AxisSelection::Eigenvalue);
        assert_eq!(tree.select_next_to_split(), 0);
        let (left, right) = tree.split(0).unwrap();
        assert_eq!(tree.node(right).stats().count, 0);
        assert_eq!(tree.leaves(), vec![left, right]);
        assert_eq!(tree.select_next_to_split(), left);
    }

    #[test]
    fn split_nodes_cannot_be_split_again() {
        let mut tree = SplitTree::from_pixels(scattered(40), AxisSelection::VectorMagnitude);
        let children = tree.split(0).unwrap();
        let root = *tree.node(0).stats();
        assert_eq!(tree.split(0), None);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node(0).children(), Some(children));
        assert_eq!(*tree.node(0).stats(), root);
    }
}
