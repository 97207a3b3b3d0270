//! Scoring of batch results against a target strategy ordering.

use serde::{Deserialize, Serialize};
use sim_runtime::StrategyStats;
use sim_strategy::Strategy;

/// Fitness lost per strategy that sits in the wrong position.
pub const MISMATCH_PENALTY: f64 = 0.25;

/// Reference point every candidate is compared against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Ranked batch results of the base configuration.
    pub results: Vec<StrategyStats>,
    /// Strategies in ranked order.
    pub order: Vec<Strategy>,
    /// Highest win rate of any strategy.
    pub best_win_rate: f64,
    /// Whether the base configuration already ranks strategies as targeted.
    pub correct_order: bool,
}

impl Baseline {
    pub fn new(results: Vec<StrategyStats>, target: &[Strategy]) -> Self {
        let order = ordering(&results);
        let correct_order = mismatches(&order, target) == 0;
        Self {
            best_win_rate: best_win_rate(&results),
            order,
            results,
            correct_order,
        }
    }
}

/// Strategies in the order the (ranked) results list them.
pub fn ordering(results: &[StrategyStats]) -> Vec<Strategy> {
    results.iter().map(|s| s.strategy).collect()
}

pub fn best_win_rate(results: &[StrategyStats]) -> f64 {
    results.iter().map(|s| s.win_rate).fold(0.0, f64::max)
}

fn win_rate(results: &[StrategyStats], strategy: Strategy) -> f64 {
    results
        .iter()
        .find(|s| s.strategy == strategy)
        .map(|s| s.win_rate)
        .unwrap_or(0.0)
}

/// Positions where `order` differs from `target`, counting length mismatch.
pub fn mismatches(order: &[Strategy], target: &[Strategy]) -> usize {
    let differing = order.iter().zip(target).filter(|(a, b)| a != b).count();
    differing + order.len().abs_diff(target.len())
}

/// Win-rate gap between each adjacent pair of `target`.
pub fn adjacent_gaps(results: &[StrategyStats], target: &[Strategy]) -> Vec<f64> {
    target
        .windows(2)
        .map(|pair| win_rate(results, pair[0]) - win_rate(results, pair[1]))
        .collect()
}

fn meets_threshold(gaps: &[f64], min_diff: f64) -> bool {
    gaps.iter().all(|g| *g >= min_diff)
}

/// Whether a candidate counts as a found configuration: right order, every
/// adjacent gap at least `min_diff`, and either better than a correctly
/// ordered baseline or fixing a baseline that was out of order.
pub fn is_acceptable(
    results: &[StrategyStats],
    target: &[Strategy],
    min_diff: f64,
    baseline: &Baseline,
) -> bool {
    if mismatches(&ordering(results), target) > 0 {
        return false;
    }
    let beats = best_win_rate(results) > baseline.best_win_rate;
    meets_threshold(&adjacent_gaps(results, target), min_diff) && (beats || !baseline.correct_order)
}

/// Scalar used to rank candidates. Wrong orderings score `-0.25` per
/// misplaced strategy; right orderings score on the total positive gap with
/// bonuses that depend on the threshold and on the baseline.
pub fn fitness(
    results: &[StrategyStats],
    target: &[Strategy],
    min_diff: f64,
    baseline: &Baseline,
) -> f64 {
    let misplaced = mismatches(&ordering(results), target);
    if misplaced > 0 {
        return -(misplaced as f64) * MISMATCH_PENALTY;
    }
    let gaps = adjacent_gaps(results, target);
    let total: f64 = gaps.iter().map(|g| g.max(0.0)).sum();
    let meets = meets_threshold(&gaps, min_diff);
    let best = best_win_rate(results);
    let beats = best > baseline.best_win_rate;

    match (baseline.correct_order, meets, beats) {
        (true, true, true) => total + 1.0 + 2.0 * (best - baseline.best_win_rate),
        (true, true, false) => total * 0.3,
        (true, false, _) => total * 0.1,
        (false, true, true) => total + 0.75,
        (false, true, false) => total + 0.5,
        (false, false, _) => total * 0.5,
    }
}
