//! Probability tree (CART, Gini)
//!
//! Grown on a bootstrap sample given as row indices into the training
//! matrix; duplicate indices count as repeated rows. Leaves store the
//! fraction of detections, so a tree predicts P(detected) rather than a
//! class label.

use rand::seq::index;
use rand::Rng;
use serde::Serialize;
use smallvec::SmallVec;

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    /// Candidate covariates drawn at each split
    pub mtry: usize,
    /// Nodes with this many samples or fewer are not split
    pub min_node_size: usize,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        probability: f64,
        n_samples: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbabilityTree {
    nodes: Vec<Node>,
    n_features: usize,
}

/// A fitted tree plus the Gini decrease it attributes to each covariate.
#[derive(Debug, Clone)]
pub struct FittedTree {
    pub tree: ProbabilityTree,
    pub impurity_decrease: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

/// n * Gini impurity for a binary node, up to a constant factor of 2
fn weighted_gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pos = positives as f64;
    let neg = (total - positives) as f64;
    2.0 * pos * neg / total as f64
}

impl ProbabilityTree {
    /// Grow a tree on `sample` (row indices into `x`/`y`).
    pub fn fit<R: Rng + ?Sized>(
        x: &[Vec<f64>],
        y: &[bool],
        sample: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> FittedTree {
        let n_features = x.first().map_or(0, Vec::len);
        let mtry = params.mtry.clamp(1, n_features.max(1));
        let mut nodes = Vec::new();
        let mut impurity_decrease = vec![0.0; n_features];

        // (node slot, samples, depth)
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        nodes.push(leaf(y, sample));
        stack.push((0, sample.to_vec(), 0));

        while let Some((slot, samples, depth)) = stack.pop() {
            let n = samples.len();
            let positives = samples.iter().filter(|&&i| y[i]).count();

            let depth_reached = params.max_depth.map_or(false, |max| depth >= max);
            if n <= params.min_node_size.max(1) || positives == 0 || positives == n || depth_reached {
                continue;
            }

            let candidates: SmallVec<[usize; 8]> = index::sample(rng, n_features, mtry).into_iter().collect();
            let Some(best) = best_split(x, y, &samples, positives, &candidates) else {
                continue;
            };

            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
                .iter()
                .partition(|&&i| x[i][best.feature] <= best.threshold);

            impurity_decrease[best.feature] += best.decrease;

            let left = nodes.len();
            nodes.push(leaf(y, &left_samples));
            let right = nodes.len();
            nodes.push(leaf(y, &right_samples));
            nodes[slot] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            };

            stack.push((left, left_samples, depth + 1));
            stack.push((right, right_samples, depth + 1));
        }

        FittedTree {
            tree: ProbabilityTree { nodes, n_features },
            impurity_decrease,
        }
    }

    /// P(detected) for one covariate row
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { probability, .. } => return probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(feature).copied().unwrap_or(f64::NAN);
                    idx = if value <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

fn leaf(y: &[bool], samples: &[usize]) -> Node {
    let positives = samples.iter().filter(|&&i| y[i]).count();
    let probability = if samples.is_empty() {
        0.0
    } else {
        positives as f64 / samples.len() as f64
    };
    Node::Leaf {
        probability,
        n_samples: samples.len(),
    }
}

/// Best Gini split over the candidate covariates, midpoint thresholds
fn best_split(
    x: &[Vec<f64>],
    y: &[bool],
    samples: &[usize],
    positives: usize,
    candidates: &[usize],
) -> Option<BestSplit> {
    let n = samples.len();
    let parent = weighted_gini(positives, n);
    let mut best: Option<BestSplit> = None;
    let mut column: Vec<(f64, bool)> = Vec::with_capacity(n);

    for &feature in candidates {
        column.clear();
        column.extend(samples.iter().map(|&i| (x[i][feature], y[i])));
        column.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_pos = 0;
        for split in 1..n {
            if column[split - 1].1 {
                left_pos += 1;
            }
            let (lo, hi) = (column[split - 1].0, column[split].0);
            if lo >= hi {
                continue;
            }

            let right_pos = positives - left_pos;
            let decrease = parent - weighted_gini(left_pos, split) - weighted_gini(right_pos, n - split);
            if decrease > best.as_ref().map_or(1e-12, |b| b.decrease) {
                best = Some(BestSplit {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    decrease,
                });
            }
        }
    }

    best
}
