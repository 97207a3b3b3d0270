#![deny(warnings)]

//! Simulation driver: builds a project, runs sprints under a strategy until
//! the game ends, and aggregates batches of runs per strategy.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{Feature, GameState, Project, ProjectConfig, RiskProfile, SimError, Task};
use sim_strategy::{plan_tests, Strategy};
use tracing::{debug, info};

/// Whole numbers inside `[min, max]`.
fn whole_range(what: &str, min: f64, max: f64) -> Result<std::ops::RangeInclusive<u32>, SimError> {
    let (lo, hi) = (min.ceil(), max.floor());
    if lo > hi {
        return Err(SimError::InvalidConfig(format!(
            "{what} bounds [{min}, {max}] contain no whole number"
        )));
    }
    Ok(lo as u32..=hi as u32)
}

/// Generate a fresh project from `config`.
pub fn initialize_project<R: Rng + ?Sized>(config: &ProjectConfig, rng: &mut R) -> Result<Project, SimError> {
    config.validate()?;
    let mut project = Project::with_config(1, "Simulated project", config.clone())?;
    let size_range = whole_range("feature size", config.min_feature_size, config.max_feature_size)?;
    let complexity_range = whole_range(
        "feature complexity",
        config.min_feature_complexity,
        config.max_feature_complexity,
    )?;
    for i in 0..config.feature_count {
        let size = f64::from(rng.gen_range(size_range.clone()));
        let complexity = f64::from(rng.gen_range(complexity_range.clone()));
        let risks = RiskProfile::new(rng.gen(), rng.gen(), rng.gen(), rng.gen());
        let id = project.next_id();
        let feature = Feature::new(id, &format!("Feature {}", i + 1), size, complexity, risks);
        project.add_to_backlog(Task::Feature(feature))?;
    }
    Ok(project)
}

/// Result of a single simulated project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub strategy: Strategy,
    pub won: bool,
    /// Sprints completed before the game ended.
    pub sprints: u32,
    /// Defects generated over the whole run.
    pub defects_total: usize,
    /// Defects testing surfaced.
    pub defects_found: usize,
}

impl RunOutcome {
    /// Fraction of generated defects that were found; 0 when none exist.
    pub fn defect_finding_rate(&self) -> f64 {
        if self.defects_total == 0 {
            0.0
        } else {
            self.defects_found as f64 / self.defects_total as f64
        }
    }
}

/// Run one project to its end under `strategy`.
pub fn run_simulation<R: Rng + ?Sized>(
    strategy: Strategy,
    config: &ProjectConfig,
    rng: &mut R,
) -> Result<RunOutcome, SimError> {
    let mut project = initialize_project(config, rng)?;
    let mut sprint = project.new_sprint();
    sprint.fill_dev_sprint(&project)?;
    let state = loop {
        sprint.done(&mut project, rng)?;
        let mut next = project.new_sprint();
        next.fill_dev_sprint(&project)?;
        let state = project.game_state();
        if state.is_over() {
            break state;
        }
        plan_tests(strategy, &mut project, &mut next)?;
        sprint = next;
    };
    let outcome = RunOutcome {
        strategy,
        won: state == GameState::Won,
        sprints: project.completed_sprints(),
        defects_total: project.defect_ledger().len(),
        defects_found: project.found_defect_count(),
    };
    debug!(%strategy, ?state, sprints = outcome.sprints, found = outcome.defects_found, "run finished");
    Ok(outcome)
}

/// Aggregated results of one strategy over a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: Strategy,
    pub wins: u32,
    pub losses: u32,
    /// `wins / runs`.
    pub win_rate: f64,
    /// Mean number of defects found per run.
    pub avg_defects: f64,
    pub avg_sprints: f64,
    /// Mean of each run's found / generated ratio.
    pub avg_defect_finding_rate: f64,
}

impl StrategyStats {
    fn from_runs(strategy: Strategy, runs: &[RunOutcome]) -> Self {
        let n = runs.len().max(1) as f64;
        let wins = runs.iter().filter(|r| r.won).count() as u32;
        Self {
            strategy,
            wins,
            losses: runs.len() as u32 - wins,
            win_rate: f64::from(wins) / n,
            avg_defects: runs.iter().map(|r| r.defects_found as f64).sum::<f64>() / n,
            avg_sprints: runs.iter().map(|r| f64::from(r.sprints)).sum::<f64>() / n,
            avg_defect_finding_rate: runs.iter().map(RunOutcome::defect_finding_rate).sum::<f64>() / n,
        }
    }
}

/// Seed of run `run` of the strategy at `strategy_index`.
fn run_seed(base: u64, strategy_index: usize, count: u32, run: u32) -> u64 {
    base.wrapping_add(strategy_index as u64 * u64::from(count))
        .wrapping_add(u64::from(run))
}

/// Sort by win rate, then defect-finding rate, both descending.
pub fn rank(stats: &mut [StrategyStats]) {
    stats.sort_by(|a, b| {
        b.win_rate
            .total_cmp(&a.win_rate)
            .then(b.avg_defect_finding_rate.total_cmp(&a.avg_defect_finding_rate))
    });
}

/// Run `count` projects per strategy. With a seed every run is
/// reproducible; without one each run draws from entropy.
pub fn run_batch_simulation(
    count: u32,
    config: &ProjectConfig,
    seed: Option<u64>,
    silent: bool,
) -> Result<Vec<StrategyStats>, SimError> {
    if count == 0 {
        return Err(SimError::InvalidRunCount);
    }
    config.validate()?;
    let mut stats = Vec::with_capacity(Strategy::ALL.len());
    for (si, strategy) in Strategy::ALL.into_iter().enumerate() {
        let mut runs = Vec::with_capacity(count as usize);
        for run in 0..count {
            let mut rng = match seed {
                Some(base) => ChaCha8Rng::seed_from_u64(run_seed(base, si, count, run)),
                None => ChaCha8Rng::from_entropy(),
            };
            runs.push(run_simulation(strategy, config, &mut rng)?);
        }
        let s = StrategyStats::from_runs(strategy, &runs);
        if silent {
            debug!(%strategy, win_rate = s.win_rate, avg_sprints = s.avg_sprints, "strategy batch done");
        } else {
            info!(
                %strategy,
                wins = s.wins,
                losses = s.losses,
                win_rate = s.win_rate,
                avg_defects = s.avg_defects,
                avg_sprints = s.avg_sprints,
                "strategy batch done"
            );
        }
        stats.push(s);
    }
    rank(&mut stats);
    Ok(stats)
}
