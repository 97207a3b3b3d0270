#![deny(warnings)]

//! Parameter search: tunes a `ProjectConfig` until batch simulations rank
//! the strategies in a target order with a minimum win-rate separation.
//!
//! The search runs a coarse grid sweep first and falls back to an adaptive
//! hill-climb with random jumps when the grid does not produce enough
//! acceptable configurations.

pub mod fitness;
pub mod grid;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{ProjectConfig, SimError};
use sim_runtime::{run_batch_simulation, StrategyStats};
use sim_strategy::Strategy;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use fitness::{fitness, is_acceptable, Baseline};
pub use grid::{default_ranges, grid_size, GridPoints, ParamRange};

/// Upper bound of the local step, as a fraction of a range's span.
pub const MAX_STEP: f64 = 0.5;
/// Step multiplier after an improving pass.
pub const STEP_GROWTH: f64 = 1.5;
/// Probability that a random jump resamples a given parameter.
pub const JUMP_PROBABILITY: f64 = 0.5;
/// Number of best evaluations kept in the report.
pub const TOP_REPORTED: usize = 3;
/// Number of best evaluations summarized when nothing was accepted.
pub const DIAGNOSTIC_SAMPLE: usize = 10;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("target order must list every strategy exactly once, got {0:?}")]
    InvalidTarget(Vec<Strategy>),
    #[error("invalid range for {name}: [{min}, {max}]")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("initial step must be positive and finite, got {0}")]
    InvalidStep(f64),
    #[error("baseline evaluation failed: {0}")]
    Baseline(#[from] SimError),
}

/// Produces ranked strategy results for a candidate configuration.
pub trait Evaluator {
    fn evaluate(&mut self, config: &ProjectConfig) -> Result<Vec<StrategyStats>, SimError>;
}

impl<F> Evaluator for F
where
    F: FnMut(&ProjectConfig) -> Result<Vec<StrategyStats>, SimError>,
{
    fn evaluate(&mut self, config: &ProjectConfig) -> Result<Vec<StrategyStats>, SimError> {
        self(config)
    }
}

/// Evaluates candidates with a silent batch simulation. When seeded, every
/// batch gets its own seed drawn from one stream, so a whole search replays.
#[derive(Clone, Debug)]
pub struct BatchEvaluator {
    runs: u32,
    rng: Option<ChaCha8Rng>,
}

impl BatchEvaluator {
    pub fn new(runs: u32, seed: Option<u64>) -> Self {
        Self {
            runs,
            rng: seed.map(ChaCha8Rng::seed_from_u64),
        }
    }
}

impl Evaluator for BatchEvaluator {
    fn evaluate(&mut self, config: &ProjectConfig) -> Result<Vec<StrategyStats>, SimError> {
        let seed = self.rng.as_mut().map(|rng| rng.gen::<u64>());
        run_batch_simulation(self.runs, config, seed, true)
    }
}

/// Knobs of one search run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Desired ranking, best strategy first. Must list every strategy once.
    pub target_order: Vec<Strategy>,
    /// Minimum win-rate gap between adjacent strategies of the target.
    pub min_diff: f64,
    /// Points per parameter in the grid phase.
    pub grid_steps: usize,
    /// Candidate evaluations allowed, baseline excluded.
    pub max_iterations: usize,
    /// Stop once this many acceptable configurations are found.
    pub max_configs: usize,
    /// Runs per strategy in each batch evaluation.
    pub runs_per_eval: u32,
    /// Starting local step as a fraction of each range's span (> 0).
    pub initial_step: f64,
    /// Whether the hill-climb runs after an under-producing grid.
    pub local_search: bool,
    /// Seed for jumps and batch seeds; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_order: Strategy::ALL.to_vec(),
            min_diff: 0.05,
            grid_steps: 3,
            max_iterations: 100,
            max_configs: 3,
            runs_per_eval: 100,
            initial_step: 0.1,
            local_search: true,
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Grid,
    Local,
}

/// One scored candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Searched parameter values, in range order.
    pub params: Vec<(String, f64)>,
    /// Full configuration the candidate was run with.
    pub config: ProjectConfig,
    /// Empty when the evaluation failed.
    pub results: Vec<StrategyStats>,
    /// Negative infinity when the evaluation failed.
    pub fitness: f64,
    /// Counted towards `max_configs`.
    pub acceptable: bool,
    /// Phase that produced the candidate.
    pub phase: Phase,
}

/// Spread of one parameter over a sample of evaluations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    /// Parameter name.
    pub name: String,
    /// Smallest sampled value.
    pub min: f64,
    /// Largest sampled value.
    pub max: f64,
    /// Mean sampled value.
    pub mean: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub baseline: Baseline,
    /// Accepted configurations, best fitness first.
    pub found: Vec<Evaluation>,
    /// Best evaluations overall, best fitness first.
    pub top: Vec<Evaluation>,
    /// Candidates evaluated, baseline excluded.
    pub evaluations: usize,
    /// Parameter spread over the best samples; only filled when nothing was
    /// accepted.
    pub diagnostics: Vec<ParamSummary>,
}

fn validate_target(target: &[Strategy]) -> Result<(), SearchError> {
    let mut sorted = target.to_vec();
    sorted.sort();
    if sorted != Strategy::ALL.to_vec() {
        return Err(SearchError::InvalidTarget(target.to_vec()));
    }
    Ok(())
}

fn validate_range(range: &ParamRange) -> Result<(), SearchError> {
    if !ProjectConfig::PARAMETERS.contains(&range.name.as_str()) {
        return Err(SearchError::UnknownParameter(range.name.clone()));
    }
    if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
        return Err(SearchError::InvalidRange {
            name: range.name.clone(),
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}

fn by_fitness(a: &Evaluation, b: &Evaluation) -> std::cmp::Ordering {
    b.fitness.total_cmp(&a.fitness)
}

#[derive(Default)]
struct Progress {
    evaluations: Vec<Evaluation>,
    found: usize,
}

/// Two-phase search over `ranges` around a base configuration.
pub struct Optimizer<E> {
    base: ProjectConfig,
    ranges: Vec<ParamRange>,
    config: SearchConfig,
    evaluator: E,
    rng: ChaCha8Rng,
}

impl<E: Evaluator> Optimizer<E> {
    pub fn new(
        base: ProjectConfig,
        ranges: Vec<ParamRange>,
        config: SearchConfig,
        evaluator: E,
    ) -> Result<Self, SearchError> {
        validate_target(&config.target_order)?;
        if !(config.initial_step.is_finite() && config.initial_step > 0.0) {
            return Err(SearchError::InvalidStep(config.initial_step));
        }
        for r in &ranges {
            validate_range(r)?;
        }
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            base,
            ranges,
            config,
            evaluator,
            rng,
        })
    }

    pub fn run(&mut self) -> Result<SearchReport, SearchError> {
        let results = self.evaluator.evaluate(&self.base)?;
        let baseline = Baseline::new(results, &self.config.target_order);
        info!(
            order = ?baseline.order,
            best_win_rate = baseline.best_win_rate,
            correct_order = baseline.correct_order,
            "baseline evaluated"
        );

        let mut progress = Progress::default();
        self.grid_phase(&baseline, &mut progress);
        if self.config.local_search
            && !self.ranges.is_empty()
            && !self.exhausted(&progress)
        {
            info!(found = progress.found, evaluations = progress.evaluations.len(), "starting local search");
            self.local_phase(&baseline, &mut progress);
        }

        let mut evaluations = progress.evaluations;
        evaluations.sort_by(by_fitness);
        let found: Vec<Evaluation> = evaluations.iter().filter(|e| e.acceptable).cloned().collect();
        let diagnostics = if found.is_empty() {
            self.diagnostics(&evaluations)
        } else {
            Vec::new()
        };
        info!(found = found.len(), evaluations = evaluations.len(), "search finished");
        Ok(SearchReport {
            baseline,
            found,
            top: evaluations.iter().take(TOP_REPORTED).cloned().collect(),
            evaluations: evaluations.len(),
            diagnostics,
        })
    }

    fn exhausted(&self, progress: &Progress) -> bool {
        progress.evaluations.len() >= self.config.max_iterations
            || progress.found >= self.config.max_configs
    }

    fn configure(&self, params: &[f64]) -> Result<ProjectConfig, SimError> {
        let mut cfg = self.base.clone();
        for (r, v) in self.ranges.iter().zip(params) {
            cfg.set(&r.name, *v)?;
        }
        Ok(cfg)
    }

    fn evaluate(&mut self, params: &[f64], phase: Phase, baseline: &Baseline, progress: &mut Progress) -> f64 {
        let named = self
            .ranges
            .iter()
            .zip(params)
            .map(|(r, v)| (r.name.clone(), *v))
            .collect();
        let scored = match self.configure(params) {
            Ok(cfg) => match self.evaluator.evaluate(&cfg) {
                Ok(results) => Ok((cfg, results)),
                Err(err) => Err((cfg, err)),
            },
            Err(err) => Err((self.base.clone(), err)),
        };
        let target = &self.config.target_order;
        let eval = match scored {
            Ok((config, results)) => Evaluation {
                fitness: fitness(&results, target, self.config.min_diff, baseline),
                acceptable: is_acceptable(&results, target, self.config.min_diff, baseline),
                params: named,
                config,
                results,
                phase,
            },
            Err((config, err)) => {
                warn!(%err, ?params, "candidate evaluation failed");
                Evaluation {
                    config,
                    params: named,
                    results: Vec::new(),
                    fitness: f64::NEG_INFINITY,
                    acceptable: false,
                    phase,
                }
            }
        };
        debug!(?phase, fitness = eval.fitness, acceptable = eval.acceptable, "candidate evaluated");
        if eval.acceptable {
            progress.found += 1;
            info!(fitness = eval.fitness, params = ?eval.params, "found acceptable configuration");
        }
        let f = eval.fitness;
        progress.evaluations.push(eval);
        f
    }

    fn grid_phase(&mut self, baseline: &Baseline, progress: &mut Progress) {
        let ranges = self.ranges.clone();
        debug!(
            points = grid_size(ranges.len(), self.config.grid_steps),
            "starting grid search"
        );
        for point in GridPoints::new(&ranges, self.config.grid_steps) {
            if self.exhausted(progress) {
                break;
            }
            self.evaluate(&point, Phase::Grid, baseline, progress);
        }
    }

    /// Best finite evaluation so far, or the base values clamped into range.
    fn seed_point(&self, progress: &Progress) -> (Vec<f64>, f64) {
        progress
            .evaluations
            .iter()
            .filter(|e| e.fitness.is_finite())
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .map(|e| (e.params.iter().map(|(_, v)| *v).collect(), e.fitness))
            .unwrap_or_else(|| {
                let start = self
                    .ranges
                    .iter()
                    .map(|r| r.clamp(self.base.get(&r.name).unwrap_or(r.min)))
                    .collect();
                (start, f64::NEG_INFINITY)
            })
    }

    fn jump(&mut self, current: &[f64]) -> Vec<f64> {
        let mut next = current.to_vec();
        let forced = self.rng.gen_range(0..self.ranges.len());
        for (i, r) in self.ranges.iter().enumerate() {
            if i == forced || self.rng.gen_bool(JUMP_PROBABILITY) {
                next[i] = self.rng.gen_range(r.min..=r.max);
            }
        }
        next
    }

    fn local_phase(&mut self, baseline: &Baseline, progress: &mut Progress) {
        let (mut current, mut current_fitness) = self.seed_point(progress);
        let initial = self.config.initial_step;
        let mut step = initial;
        while !self.exhausted(progress) {
            let mut improved = false;
            'pass: for i in 0..self.ranges.len() {
                for dir in [1.0, -1.0] {
                    if self.exhausted(progress) {
                        break 'pass;
                    }
                    let range = &self.ranges[i];
                    let moved = range.clamp(current[i] + dir * step * range.span());
                    if moved == current[i] {
                        continue;
                    }
                    let mut candidate = current.clone();
                    candidate[i] = moved;
                    let f = self.evaluate(&candidate, Phase::Local, baseline, progress);
                    if f > current_fitness {
                        current = candidate;
                        current_fitness = f;
                        improved = true;
                    }
                }
            }
            if improved {
                step = (step * STEP_GROWTH).min(MAX_STEP);
                continue;
            }
            step /= 2.0;
            if step < initial && !self.exhausted(progress) {
                current = self.jump(&current);
                current_fitness = self.evaluate(&current, Phase::Local, baseline, progress);
                step = initial;
                debug!(fitness = current_fitness, "random jump");
            }
        }
    }

    fn diagnostics(&self, sorted: &[Evaluation]) -> Vec<ParamSummary> {
        let sample: Vec<&Evaluation> = sorted
            .iter()
            .filter(|e| e.fitness.is_finite())
            .take(DIAGNOSTIC_SAMPLE)
            .collect();
        if sample.is_empty() {
            return Vec::new();
        }
        self.ranges
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let values: Vec<f64> = sample.iter().map(|e| e.params[i].1).collect();
                ParamSummary {
                    name: r.name.clone(),
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    mean: values.iter().sum::<f64>() / values.len() as f64,
                }
            })
            .collect()
    }
}

/// Run a full search with batch simulations of `config.runs_per_eval` runs.
pub fn search(
    base: ProjectConfig,
    ranges: Vec<ParamRange>,
    config: SearchConfig,
) -> Result<SearchReport, SearchError> {
    let evaluator = BatchEvaluator::new(config.runs_per_eval, config.seed);
    Optimizer::new(base, ranges, config, evaluator)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(rates: [f64; 4]) -> Vec<StrategyStats> {
        let mut stats: Vec<StrategyStats> = Strategy::ALL
            .into_iter()
            .zip(rates)
            .map(|(strategy, win_rate)| StrategyStats {
                strategy,
                wins: 0,
                losses: 0,
                win_rate,
                avg_defects: 0.0,
                avg_sprints: 0.0,
                avg_defect_finding_rate: 0.0,
            })
            .collect();
        sim_runtime::rank(&mut stats);
        stats
    }

    fn constant(_: &ProjectConfig) -> Result<Vec<StrategyStats>, SimError> {
        Ok(ranked([0.8, 0.7, 0.6, 0.5]))
    }

    /// Gaps of `max_stealth - 0.5` between each adjacent pair of the default
    /// target; negative gaps reverse the order.
    fn stealth_driven(cfg: &ProjectConfig) -> Result<Vec<StrategyStats>, SimError> {
        let g = cfg.max_stealth - 0.5;
        Ok(ranked([0.5 + 1.5 * g, 0.5 + 0.5 * g, 0.5 - 0.5 * g, 0.5 - 1.5 * g]))
    }

    fn three_ranges() -> Vec<ParamRange> {
        vec![
            ParamRange::new("test_effort", 5.0, 15.0),
            ParamRange::new("regression_risk", 0.1, 0.3),
            ParamRange::new("max_stealth", 0.2, 0.8),
        ]
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = SearchConfig::default();
        assert_eq!(c.target_order, Strategy::ALL.to_vec());
        assert_eq!(c.min_diff, 0.05);
        assert_eq!(c.grid_steps, 3);
        assert_eq!(c.max_iterations, 100);
        assert_eq!(c.max_configs, 3);
        assert_eq!(c.runs_per_eval, 100);
        assert_eq!(c.initial_step, 0.1);
    }

    #[test]
    fn grid_evaluates_every_point() {
        let config = SearchConfig {
            local_search: false,
            seed: Some(1),
            ..SearchConfig::default()
        };
        let mut opt = Optimizer::new(ProjectConfig::default(), three_ranges(), config, constant).unwrap();
        let report = opt.run().unwrap();
        assert_eq!(report.evaluations, 27);
        assert!(report.found.is_empty());
        assert_eq!(report.top.len(), TOP_REPORTED);
        assert!(report.top.iter().all(|e| e.phase == Phase::Grid));
        assert_eq!(report.diagnostics.len(), 3);
        for d in &report.diagnostics {
            assert!(d.min <= d.mean && d.mean <= d.max);
        }
    }

    #[test]
    fn grid_respects_iteration_cap() {
        let config = SearchConfig {
            max_iterations: 10,
            seed: Some(1),
            ..SearchConfig::default()
        };
        let mut opt = Optimizer::new(ProjectConfig::default(), three_ranges(), config, constant).unwrap();
        assert_eq!(opt.run().unwrap().evaluations, 10);
    }

    #[test]
    fn grid_stops_at_max_configs() {
        let config = SearchConfig {
            max_configs: 2,
            seed: Some(1),
            ..SearchConfig::default()
        };
        let base = ProjectConfig {
            max_stealth: 0.5,
            ..ProjectConfig::default()
        };
        let ranges = vec![ParamRange::new("max_stealth", 0.7, 0.8)];
        let mut opt = Optimizer::new(base, ranges, config, stealth_driven).unwrap();
        let report = opt.run().unwrap();
        assert!(report.baseline.correct_order);
        assert_eq!(report.evaluations, 2);
        assert_eq!(report.found.len(), 2);
        assert!(report.found[0].fitness >= report.found[1].fitness);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn local_search_escapes_bad_grid() {
        let config = SearchConfig {
            grid_steps: 1,
            max_iterations: 200,
            max_configs: 1,
            seed: Some(9),
            ..SearchConfig::default()
        };
        let base = ProjectConfig {
            max_stealth: 0.6,
            ..ProjectConfig::default()
        };
        let ranges = vec![ParamRange::new("max_stealth", 0.2, 0.8)];
        let mut opt = Optimizer::new(base, ranges, config, stealth_driven).unwrap();
        let report = opt.run().unwrap();
        assert!(report.baseline.correct_order);
        assert_eq!(report.found.len(), 1);
        let best = &report.found[0];
        assert_eq!(best.phase, Phase::Local);
        assert!(best.config.max_stealth >= 0.6);
        assert!(best.config.max_stealth <= 0.8);
        assert!(report.evaluations <= 200);
    }

    #[test]
    fn failing_candidates_score_negative_infinity() {
        let evaluator = |cfg: &ProjectConfig| {
            if cfg.test_effort > 10.0 {
                Err(SimError::InvalidConfig("boom".into()))
            } else {
                constant(cfg)
            }
        };
        let config = SearchConfig {
            local_search: false,
            seed: Some(2),
            ..SearchConfig::default()
        };
        let ranges = vec![ParamRange::new("test_effort", 5.0, 15.0)];
        let mut opt = Optimizer::new(ProjectConfig::default(), ranges, config, evaluator).unwrap();
        let report = opt.run().unwrap();
        assert_eq!(report.evaluations, 3);
        let last = report.top.last().unwrap();
        assert_eq!(last.fitness, f64::NEG_INFINITY);
        assert!(last.results.is_empty());
        assert_eq!(report.diagnostics[0].max, 10.0);
    }

    #[test]
    fn baseline_failure_aborts() {
        let evaluator = |_: &ProjectConfig| -> Result<Vec<StrategyStats>, SimError> {
            Err(SimError::InvalidRunCount)
        };
        let mut opt = Optimizer::new(
            ProjectConfig::default(),
            three_ranges(),
            SearchConfig::default(),
            evaluator,
        )
        .unwrap();
        assert!(matches!(
            opt.run(),
            Err(SearchError::Baseline(SimError::InvalidRunCount))
        ));
    }

    #[test]
    fn rejects_bad_inputs() {
        let bad_target = SearchConfig {
            target_order: vec![Strategy::Risk, Strategy::Risk, Strategy::Cycle, Strategy::Focused],
            ..SearchConfig::default()
        };
        assert!(matches!(
            Optimizer::new(ProjectConfig::default(), vec![], bad_target, constant),
            Err(SearchError::InvalidTarget(_))
        ));
        assert!(matches!(
            Optimizer::new(
                ProjectConfig::default(),
                vec![ParamRange::new("speed", 0.0, 1.0)],
                SearchConfig::default(),
                constant
            ),
            Err(SearchError::UnknownParameter(_))
        ));
        assert!(matches!(
            Optimizer::new(
                ProjectConfig::default(),
                vec![ParamRange::new("max_stealth", 0.9, 0.1)],
                SearchConfig::default(),
                constant
            ),
            Err(SearchError::InvalidRange { .. })
        ));
    }

    #[test]
    fn rejects_step_that_cannot_move() {
        for step in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let config = SearchConfig {
                initial_step: step,
                grid_steps: 1,
                max_iterations: 20,
                ..SearchConfig::default()
            };
            let ranges = vec![ParamRange::new("max_stealth", 0.2, 0.8)];
            assert!(matches!(
                Optimizer::new(ProjectConfig::default(), ranges, config, stealth_driven),
                Err(SearchError::InvalidStep(_))
            ));
        }
    }

    #[test]
    fn tiny_step_still_respects_budget() {
        let config = SearchConfig {
            initial_step: 1e-12,
            grid_steps: 1,
            max_iterations: 20,
            max_configs: 5,
            seed: Some(4),
            ..SearchConfig::default()
        };
        let ranges = vec![ParamRange::new("max_stealth", 0.2, 0.8)];
        let mut opt = Optimizer::new(ProjectConfig::default(), ranges, config, constant).unwrap();
        assert_eq!(opt.run().unwrap().evaluations, 20);
    }

    #[test]
    fn seeded_batch_evaluator_replays() {
        let cfg = ProjectConfig {
            feature_count: 4,
            max_sprints: 6,
            ..ProjectConfig::default()
        };
        let mut a = BatchEvaluator::new(3, Some(5));
        let mut b = BatchEvaluator::new(3, Some(5));
        assert_eq!(a.evaluate(&cfg).unwrap(), b.evaluate(&cfg).unwrap());
        assert_eq!(a.evaluate(&cfg).unwrap(), b.evaluate(&cfg).unwrap());
        assert!(matches!(
            BatchEvaluator::new(0, Some(5)).evaluate(&cfg),
            Err(SimError::InvalidRunCount)
        ));
    }
}
