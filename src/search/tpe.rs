//! Tree-structured Parzen Estimator sampler.
//!
//! TPE models `p(x | good)` and `p(x | bad)` instead of `p(y | x)`:
//!
//! 1. Split past trials into "good" and "bad" at the `gamma` accuracy quantile.
//! 2. Fit a Gaussian KDE per dimension to each group (Scott's rule bandwidth).
//! 3. Draw candidates from the good density and keep the one maximizing `l(x) / g(x)`.
//!
//! Until `n_startup_trials` trials exist the sampler draws uniformly.
//!
//! Bergstra et al. (2011). Algorithms for Hyper-Parameter Optimization. NeurIPS.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::log::TrialLog;
use super::space::{SPACE_DIMS, SearchSpace};
use crate::ml::gbdt::HyperparameterSet;

const MIN_BANDWIDTH: f64 = 0.05;

/// TPE sampler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeConfig {
    /// Quantile of trials treated as "good".
    pub gamma: f64,
    /// Candidates drawn per suggestion.
    pub n_candidates: usize,
    /// Uniform trials before the density model is used.
    pub n_startup_trials: usize,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            gamma: 0.25,
            n_candidates: 24,
            n_startup_trials: 8,
        }
    }
}

/// Stateless apart from its RNG: all history comes from the [`TrialLog`] passed in.
#[derive(Debug, Clone)]
pub struct TpeSampler {
    space: SearchSpace,
    config: TpeConfig,
    rng: StdRng,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    point: [f64; SPACE_DIMS],
    score: f64,
}

impl TpeSampler {
    pub fn new(space: SearchSpace, config: TpeConfig, seed: u64) -> Self {
        Self {
            space,
            config: TpeConfig {
                gamma: config.gamma.clamp(0.01, 0.5),
                n_candidates: config.n_candidates.max(1),
                n_startup_trials: config.n_startup_trials,
            },
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Propose the next hyperparameter set given everything observed so far.
    pub fn suggest(&mut self, log: &TrialLog) -> HyperparameterSet {
        let observations: Vec<Observation> = log
            .trials()
            .iter()
            .map(|trial| Observation {
                point: self.space.normalize(&trial.params),
                score: trial.accuracy,
            })
            .collect();
        if observations.len() < self.config.n_startup_trials.max(2) {
            let point = SearchSpace::sample_unit(&mut self.rng);
            return self.space.denormalize(&point);
        }

        let (good, bad) = self.split(&observations);
        let good_bw = bandwidths(&good);
        let bad_bw = bandwidths(&bad);

        let mut best_point = self.draw_from(&good, &good_bw);
        let mut best_ratio = ei_ratio(&best_point, &good, &good_bw, &bad, &bad_bw);
        for _ in 1..self.config.n_candidates {
            let candidate = self.draw_from(&good, &good_bw);
            let ratio = ei_ratio(&candidate, &good, &good_bw, &bad, &bad_bw);
            if ratio > best_ratio {
                best_ratio = ratio;
                best_point = candidate;
            }
        }
        self.space.denormalize(&best_point)
    }

    fn split(&self, observations: &[Observation]) -> (Vec<[f64; SPACE_DIMS]>, Vec<[f64; SPACE_DIMS]>) {
        let mut sorted: Vec<&Observation> = observations.iter().collect();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
        let n_good = ((sorted.len() as f64) * self.config.gamma).ceil() as usize;
        let n_good = n_good.max(1).min(sorted.len() - 1);
        let good = sorted[..n_good].iter().map(|o| o.point).collect();
        let bad = sorted[n_good..].iter().map(|o| o.point).collect();
        (good, bad)
    }

    /// Sample from the good mixture, with one uniform prior component.
    fn draw_from(&mut self, good: &[[f64; SPACE_DIMS]], bw: &[f64; SPACE_DIMS]) -> [f64; SPACE_DIMS] {
        let pick = self.rng.random_range(0..=good.len());
        let Some(center) = good.get(pick) else {
            return SearchSpace::sample_unit(&mut self.rng);
        };
        let mut point = [0.0; SPACE_DIMS];
        for dim in 0..SPACE_DIMS {
            let noise = standard_normal(&mut self.rng) * bw[dim];
            point[dim] = (center[dim] + noise).clamp(0.0, 1.0);
        }
        point
    }
}

fn bandwidths(samples: &[[f64; SPACE_DIMS]]) -> [f64; SPACE_DIMS] {
    let mut out = [1.0; SPACE_DIMS];
    if samples.len() < 2 {
        return out;
    }
    let n = samples.len() as f64;
    for (dim, bw) in out.iter_mut().enumerate() {
        let mean = samples.iter().map(|s| s[dim]).sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s[dim] - mean).powi(2)).sum::<f64>() / n;
        *bw = (variance.sqrt() * n.powf(-0.2)).max(MIN_BANDWIDTH);
    }
    out
}

fn kde_density(samples: &[[f64; SPACE_DIMS]], bw: &[f64; SPACE_DIMS], point: &[f64; SPACE_DIMS]) -> f64 {
    if samples.is_empty() {
        return 1.0;
    }
    let mut density = 1.0;
    for dim in 0..SPACE_DIMS {
        let sum: f64 = samples
            .iter()
            .map(|s| {
                let z = (point[dim] - s[dim]) / bw[dim];
                (-0.5 * z * z).exp()
            })
            .sum();
        let norm = (2.0 * std::f64::consts::PI).sqrt() * bw[dim] * samples.len() as f64;
        density *= sum / norm;
    }
    density
}

fn ei_ratio(
    point: &[f64; SPACE_DIMS],
    good: &[[f64; SPACE_DIMS]],
    good_bw: &[f64; SPACE_DIMS],
    bad: &[[f64; SPACE_DIMS]],
    bad_bw: &[f64; SPACE_DIMS],
) -> f64 {
    kde_density(good, good_bw, point) / (kde_density(bad, bad_bw, point) + 1e-12)
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
