//! Exact path-dependent TreeSHAP for a single regression tree.
//!
//! Walks every root-to-leaf path once, maintaining the proportion of feature subsets
//! that flow down the path both with ("one") and without ("zero") each feature
//! revealed. Runs in `O(leaves * depth^2)` instead of `O(2^features)`.
//!
//! Lundberg, Erion & Lee (2018). Consistent Individualized Feature Attribution for
//! Tree Ensembles.

use crate::ml::gbdt::TreeNode;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` only for the root sentinel.
    feature: Option<usize>,
    /// Fraction of "feature unknown" subsets flowing down this edge (cover ratio).
    zero_fraction: f64,
    /// `1` if the instance follows this edge, else `0`.
    one_fraction: f64,
    /// Permutation weight.
    pweight: f64,
}

/// Add the attributions of `root` evaluated at `x` into `phi`.
pub(crate) fn accumulate(root: &TreeNode, x: &[f64], phi: &mut [f64]) {
    recurse(root, x, phi, &[], 1.0, 1.0, None);
}

fn recurse(
    node: &TreeNode,
    x: &[f64],
    phi: &mut [f64],
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    extend(&mut path, zero_fraction, one_fraction, feature);

    match node {
        TreeNode::Leaf { value, .. } => {
            for i in 1..path.len() {
                let element = path[i];
                let Some(feature) = element.feature else {
                    continue;
                };
                let weight = unwound_sum(&path, i);
                if let Some(slot) = phi.get_mut(feature) {
                    *slot += weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
        }
        TreeNode::Split {
            feature: split,
            threshold,
            cover,
            left,
            right,
        } => {
            let value = x.get(*split).copied().unwrap_or(0.0);
            let (hot, cold) = if value <= *threshold {
                (left.as_ref(), right.as_ref())
            } else {
                (right.as_ref(), left.as_ref())
            };

            // A feature seen higher on the path is merged into one element.
            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(pos) = path
                .iter()
                .skip(1)
                .position(|el| el.feature == Some(*split))
            {
                let pos = pos + 1;
                incoming_zero = path[pos].zero_fraction;
                incoming_one = path[pos].one_fraction;
                unwind(&mut path, pos);
            }

            let hot_zero = incoming_zero * hot.cover() / cover;
            let cold_zero = incoming_zero * cold.cover() / cover;
            recurse(hot, x, phi, &path, hot_zero, incoming_one, Some(*split));
            // Both fractions zero: every permutation weight below is zero.
            if cold_zero > 0.0 {
                recurse(cold, x, phi, &path, cold_zero, 0.0, Some(*split));
            }
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

/// Undo [`extend`] for the element at `index`.
fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let last = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (last + 1) as f64;
    let mut next = path[last].pweight;

    for i in (0..last).rev() {
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next * denom / ((i + 1) as f64 * one);
            next = tmp - path[i].pweight * zero * (last - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero * (last - i) as f64);
        }
    }
    for i in index..last {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(last);
}

/// Total permutation weight of the path with element `index` unwound, without
/// modifying the path.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let last = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (last + 1) as f64;
    let mut next = path[last].pweight;
    let mut total = 0.0;

    for i in (0..last).rev() {
        if one != 0.0 {
            let tmp = next * denom / ((i + 1) as f64 * one);
            total += tmp;
            next = path[i].pweight - tmp * zero * (last - i) as f64 / denom;
        } else if zero != 0.0 {
            total += (path[i].pweight / zero) / ((last - i) as f64 / denom);
        }
    }
    total
}
