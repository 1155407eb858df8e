//! Strategies that propose the next trial configuration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::{ParamValue, TrialConfig};
use crate::search::space::{Distribution, SearchSpace};
use crate::search::trial::{Direction, TrialResult};

/// Proposes configurations given everything tried so far.
///
/// Returning `Ok(None)` means the sampler has nothing left to propose and
/// the search stops early.
pub trait ConfigSampler: Send {
    fn propose(
        &mut self,
        space: &SearchSpace,
        history: &[TrialResult],
        direction: Direction,
    ) -> anyhow::Result<Option<TrialConfig>>;

    fn name(&self) -> &'static str;
}

/// Which sampler a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    #[default]
    Random,
    /// Cartesian product; log ranges are cut into `points` values.
    Grid { points: usize },
    /// Tree-structured Parzen estimator after `n_startup` random trials.
    Tpe { n_startup: usize },
}

impl SamplerKind {
    pub fn build(&self, seed: u64) -> Box<dyn ConfigSampler> {
        match *self {
            SamplerKind::Random => Box::new(RandomSampler::new(seed)),
            SamplerKind::Grid { points } => Box::new(GridSampler::new(points)),
            SamplerKind::Tpe { n_startup } => Box::new(TpeSampler::new(seed).n_startup(n_startup)),
        }
    }
}

pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ConfigSampler for RandomSampler {
    fn propose(
        &mut self,
        space: &SearchSpace,
        _history: &[TrialResult],
        _direction: Direction,
    ) -> anyhow::Result<Option<TrialConfig>> {
        Ok(Some(space.sample(&mut self.rng)))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Walks the grid in order, one configuration per proposal.
pub struct GridSampler {
    points: usize,
    next: u128,
}

impl GridSampler {
    pub fn new(points: usize) -> Self {
        Self {
            points: points.max(1),
            next: 0,
        }
    }
}

impl ConfigSampler for GridSampler {
    fn propose(
        &mut self,
        space: &SearchSpace,
        _history: &[TrialResult],
        _direction: Direction,
    ) -> anyhow::Result<Option<TrialConfig>> {
        let config = space.grid_point(self.points, self.next);
        if config.is_some() {
            self.next += 1;
        }
        Ok(config)
    }

    fn name(&self) -> &'static str {
        "grid"
    }
}

pub struct TpeSampler {
    rng: StdRng,
    n_startup: usize,
    /// Fraction of completed trials treated as "good".
    gamma: f64,
    n_candidates: usize,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            n_startup: 5,
            gamma: 0.25,
            n_candidates: 24,
        }
    }

    pub fn n_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(1);
        self
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    fn sample_dimension(
        &mut self,
        distribution: &Distribution,
        good: &[ParamValue],
        bad: &[ParamValue],
    ) -> ParamValue {
        match distribution {
            Distribution::ContinuousLog { low, high } => {
                let to_log = |v: &ParamValue| v.as_float().filter(|x| *x > 0.0).map(f64::ln);
                let good: Vec<f64> = good.iter().filter_map(to_log).collect();
                let bad: Vec<f64> = bad.iter().filter_map(to_log).collect();
                let x = self.sample_continuous(&good, &bad, low.ln(), high.ln());
                ParamValue::Float(x.exp().clamp(*low, *high))
            }
            Distribution::IntRange { low, high } => {
                let to_f = |v: &ParamValue| v.as_int().map(|x| x as f64);
                let good: Vec<f64> = good.iter().filter_map(to_f).collect();
                let bad: Vec<f64> = bad.iter().filter_map(to_f).collect();
                let x = self.sample_continuous(&good, &bad, *low as f64, *high as f64);
                ParamValue::Int((x.round() as i64).clamp(*low, *high))
            }
            Distribution::Categorical { values } => {
                // Laplace-smoothed l(x) / g(x) per category.
                let weights: Vec<f64> = values
                    .iter()
                    .map(|value| {
                        let l = 1.0 + good.iter().filter(|v| *v == value).count() as f64;
                        let g = 1.0 + bad.iter().filter(|v| *v == value).count() as f64;
                        l / g
                    })
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut r = self.rng.random::<f64>() * total;
                for (value, weight) in values.iter().zip(&weights) {
                    if r < *weight {
                        return value.clone();
                    }
                    r -= weight;
                }
                values[values.len() - 1].clone()
            }
        }
    }

    /// Draw candidates around good points and keep the best l(x) / g(x).
    fn sample_continuous(&mut self, good: &[f64], bad: &[f64], low: f64, high: f64) -> f64 {
        if good.is_empty() || high <= low {
            return low + self.rng.random::<f64>() * (high - low);
        }
        let bandwidth = ((high - low) / 10.0).max(1e-12);
        let mut best = (f64::NEG_INFINITY, low);
        for _ in 0..self.n_candidates {
            let base = good[self.rng.random_range(0..good.len())];
            // Box-Muller
            let u1 = self.rng.random::<f64>().max(1e-10);
            let u2 = self.rng.random::<f64>();
            let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            let candidate = (base + noise * bandwidth).clamp(low, high);
            let ratio = kde(candidate, good, bandwidth) / (kde(candidate, bad, bandwidth) + 1e-10);
            if ratio > best.0 {
                best = (ratio, candidate);
            }
        }
        best.1
    }
}

fn kde(x: f64, points: &[f64], bandwidth: f64) -> f64 {
    if points.is_empty() {
        return 1.0;
    }
    points
        .iter()
        .map(|p| (-(x - p).powi(2) / (2.0 * bandwidth * bandwidth)).exp())
        .sum::<f64>()
        / points.len() as f64
}

impl ConfigSampler for TpeSampler {
    fn propose(
        &mut self,
        space: &SearchSpace,
        history: &[TrialResult],
        direction: Direction,
    ) -> anyhow::Result<Option<TrialConfig>> {
        let mut completed: Vec<&TrialResult> = history.iter().filter(|t| t.is_completed()).collect();
        if completed.len() < self.n_startup.max(2) {
            return Ok(Some(space.sample(&mut self.rng)));
        }

        completed.sort_by(|a, b| direction.compare(a.metric, b.metric).then(a.index.cmp(&b.index)));
        let n_good = ((completed.len() as f64 * self.gamma).ceil() as usize)
            .clamp(1, completed.len() - 1);
        let (good, bad) = completed.split_at(n_good);

        let mut config = TrialConfig::new();
        for (param, distribution) in space.iter() {
            let values_of = |trials: &[&TrialResult]| -> Vec<ParamValue> {
                trials
                    .iter()
                    .filter_map(|t| t.config.get(*param).cloned())
                    .collect()
            };
            let (good_values, bad_values) = (values_of(good), values_of(bad));
            let value = self.sample_dimension(distribution, &good_values, &bad_values);
            config.insert(*param, value);
        }
        Ok(Some(config))
    }

    fn name(&self) -> &'static str {
        "tpe"
    }
}
