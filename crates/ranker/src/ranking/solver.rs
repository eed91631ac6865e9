//! Stationary distribution of the damped link chain
//!
//! With P the row-normalized link matrix (dangling rows uniform) and b the
//! teleport probability, the chain is G = (1 - b)P + (b/n)J. The rank vector
//! v solves vG = v with the components of v summing to 1. It is computed
//! exactly by Gaussian elimination on (Gᵗ - I) with the last equation
//! replaced by the normalization constraint.

use super::graph::LinkGraph;
use catrank_common::errors::{AppError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Smallest pivot magnitude accepted during elimination
const PIVOT_EPSILON: f64 = 1e-12;

/// Row-stochastic damped transition matrix, dense row-major
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    n: usize,
    values: Vec<f64>,
}

impl TransitionMatrix {
    pub fn from_graph(graph: &LinkGraph, damping: f64) -> Self {
        let n = graph.len();
        if n == 0 {
            return Self { n, values: Vec::new() };
        }

        let uniform = 1.0 / n as f64;
        let teleport = damping * uniform;
        let mut values = vec![0.0; n * n];

        for (i, row) in values.chunks_mut(n).enumerate() {
            let targets = graph.out_links(i);
            if targets.is_empty() {
                row.fill(uniform);
            } else {
                let weight = 1.0 / targets.len() as f64;
                for &j in targets {
                    row[j] = weight;
                }
            }
            for cell in row.iter_mut() {
                *cell = (1.0 - damping) * *cell + teleport;
            }
        }

        Self { n, values }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n..(i + 1) * self.n]
    }
}

/// Stationary distribution; components are non-negative and sum to 1
#[derive(Debug, Clone, PartialEq)]
pub struct RankVector(Vec<f64>);

impl RankVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Rank of page `i` on the 0-100 scale
    pub fn rank(&self, i: usize) -> f64 {
        self.0[i] * 100.0
    }
}

#[cfg(test)]
impl From<Vec<f64>> for RankVector {
    fn from(components: Vec<f64>) -> Self {
        Self(components)
    }
}

/// Exact PageRank solver
#[derive(Debug, Clone, Copy)]
pub struct RankSolver {
    damping: f64,
}

impl RankSolver {
    pub fn new(damping: f64) -> Result<Self> {
        if !(damping > 0.0 && damping < 1.0) {
            return Err(AppError::Configuration {
                message: format!("damping must be in (0, 1), got {}", damping),
            });
        }
        Ok(Self { damping })
    }

    pub fn transition_matrix(&self, graph: &LinkGraph) -> TransitionMatrix {
        TransitionMatrix::from_graph(graph, self.damping)
    }

    /// Solve for the rank vector of `graph`.
    ///
    /// `cancel` is polled once per pivot column; once set, the solve stops
    /// with a solver error.
    pub fn solve(&self, graph: &LinkGraph, cancel: &AtomicBool) -> Result<RankVector> {
        match graph.len() {
            0 => Ok(RankVector(Vec::new())),
            1 => Ok(RankVector(vec![1.0])),
            _ => stationary(&self.transition_matrix(graph), cancel).map(RankVector),
        }
    }
}

/// Solve vG = v, sum(v) = 1 by elimination with partial pivoting
fn stationary(matrix: &TransitionMatrix, cancel: &AtomicBool) -> Result<Vec<f64>> {
    let n = matrix.len();

    // Augmented rows of (Gᵗ - I | 0), last row replaced by (1 ... 1 | 1)
    let mut rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row = Vec::with_capacity(n + 1);
            if i == n - 1 {
                row.resize(n + 1, 1.0);
            } else {
                row.extend((0..n).map(|j| matrix.get(j, i) - if i == j { 1.0 } else { 0.0 }));
                row.push(0.0);
            }
            row
        })
        .collect();

    for k in 0..n {
        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::Solver {
                message: format!("cancelled at column {} of {}", k, n),
            });
        }

        let pivot = (k..n)
            .max_by(|&a, &b| rows[a][k].abs().total_cmp(&rows[b][k].abs()))
            .unwrap_or(k);
        if rows[pivot][k].abs() < PIVOT_EPSILON {
            return Err(AppError::Solver {
                message: format!("vanishing pivot at column {} of {}", k, n),
            });
        }
        rows.swap(k, pivot);

        let (upper, lower) = rows.split_at_mut(k + 1);
        let pivot_row = &upper[k];
        for row in lower {
            let factor = row[k] / pivot_row[k];
            if factor == 0.0 {
                continue;
            }
            for (cell, &p) in row[k..].iter_mut().zip(&pivot_row[k..]) {
                *cell -= factor * p;
            }
        }
    }

    let mut v = vec![0.0; n];
    for i in (0..n).rev() {
        let tail: f64 = (i + 1..n).map(|j| rows[i][j] * v[j]).sum();
        v[i] = (rows[i][n] - tail) / rows[i][i];
    }

    // Round-off can leave tiny negatives
    for x in v.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
    let total: f64 = v.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(AppError::Solver {
            message: format!("degenerate solution (sum {})", total),
        });
    }
    for x in v.iter_mut() {
        *x /= total;
    }

    Ok(v)
}
