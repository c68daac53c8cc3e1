//! Isolation forest over standardized feature rows
//!
//! Each tree isolates a random subsample by splitting on a random feature at
//! a uniformly drawn threshold. Points that are isolated after few splits are
//! anomalous. Scores follow the usual convention: lower means more abnormal,
//! in `[-1, 0]`.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(rows: &[&[f64]], max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = IsolationTree { nodes: Vec::new() };
        tree.grow(rows.to_vec(), 0, max_depth, rng);
        tree
    }

    /// Append the subtree for `rows` and return its node index
    fn grow(&mut self, rows: Vec<&[f64]>, depth: usize, max_depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if rows.len() <= 1 || depth >= max_depth {
            return id;
        }

        let width = rows[0].len();
        let ranges: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                    (lo.min(r[f]), hi.max(r[f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return id;
        }

        let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<&[f64]>, Vec<&[f64]>) =
            rows.into_iter().partition(|r| r[feature] < threshold);

        let left = self.grow(left_rows, depth + 1, max_depth, rng);
        let right = self.grow(right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Ensemble of isolation trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    samples_per_tree: usize,
}

impl IsolationForest {
    /// Fit `n_estimators` trees on subsamples of at most `max_samples` rows
    pub fn fit(rows: &[Vec<f64>], n_estimators: usize, max_samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples_per_tree = max_samples.min(rows.len()).max(1);
        let max_depth = (samples_per_tree as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_estimators.max(1))
            .map(|_| {
                let picked: Vec<&[f64]> = if rows.is_empty() {
                    Vec::new()
                } else {
                    sample(&mut rng, rows.len(), samples_per_tree)
                        .into_iter()
                        .map(|i| rows[i].as_slice())
                        .collect()
                };
                IsolationTree::build(&picked, max_depth, &mut rng)
            })
            .collect();

        Self {
            trees,
            samples_per_tree,
        }
    }

    /// Score one row; lower is more anomalous
    pub fn score(&self, row: &[f64]) -> f64 {
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.samples_per_tree);
        if norm <= 0.0 {
            return -0.5;
        }
        -(2f64.powf(-mean_depth / norm))
    }

    pub fn score_all(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.score(r)).collect()
    }
}

/// Linear-interpolated percentile (`q` in 0..=100)
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
