//! Defect generation on task completion, including regression clustering.

use rand::Rng;
use tracing::debug;

use crate::error::SimError;
use crate::project::Project;
use crate::task::{Defect, DefectCategory, RiskProfile, TaskCore, TaskId};

/// Chance that fixing a defect introduces regressions.
pub const DEFECT_REGRESSION_CHANCE: f64 = 0.1;
/// Upper bound of regressions spawned by a single fix.
pub const MAX_FIX_REGRESSIONS: u32 = 2;

/// Right-skewed draw in `1..=max`: `floor(u^(1/4) * max) + 1`.
pub fn draw_defect_count<R: Rng + ?Sized>(max: u32, rng: &mut R) -> u32 {
    if max == 0 {
        return 0;
    }
    let u: f64 = rng.gen();
    let n = (u.powf(0.25) * f64::from(max)).floor() as u32 + 1;
    n.min(max)
}

/// Cumulative-weight draw. `None` when no weight is positive.
pub fn weighted_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if !(total > 0.0) {
        return None;
    }
    let target = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    let mut last = None;
    for (i, w) in weights.iter().enumerate() {
        if *w <= 0.0 {
            continue;
        }
        acc += w;
        last = Some(i);
        if target < acc {
            return Some(i);
        }
    }
    last
}

/// Category drawn proportionally to the risk weights.
pub fn pick_category<R: Rng + ?Sized>(risks: &RiskProfile, rng: &mut R) -> DefectCategory {
    weighted_index(&risks.weights(), rng)
        .map(|i| DefectCategory::ALL[i])
        .unwrap_or(DefectCategory::Functionality)
}

fn uniform_int<R: Rng + ?Sized>(upper: f64, rng: &mut R) -> f64 {
    let hi = upper.floor().max(1.0) as u32;
    f64::from(rng.gen_range(1..=hi))
}

/// Build and record one defect caused by `cause`, living in `affected`.
fn spawn_defect<R: Rng + ?Sized>(
    project: &mut Project,
    cause: TaskId,
    affected: TaskId,
    category: DefectCategory,
    rng: &mut R,
) -> Result<TaskId, SimError> {
    let cause_complexity = project
        .task(cause)
        .map(|t| t.core().complexity())
        .ok_or(SimError::UnknownTask(cause))?;
    let affected_name = project
        .task(affected)
        .map(|t| t.core().name().to_string())
        .ok_or(SimError::UnknownTask(affected))?;

    let cfg = project.config();
    let size = uniform_int(cause_complexity, rng);
    let complexity = uniform_int(cause_complexity, rng);
    let severity = rng.gen_range(1..=3u8);
    let ratio = if cfg.max_feature_complexity > 0.0 {
        cause_complexity / cfg.max_feature_complexity
    } else {
        1.0
    };
    let stealth = (rng.gen::<f64>() * cfg.max_stealth * ratio).clamp(0.0, 1.0);

    let id = project.next_id();
    let label = if cause == affected { "Defect" } else { "Regression" };
    let name = format!("{label} ({category}) in {affected_name}");
    let defect = Defect::new(
        TaskCore::new(id, &name, size, complexity),
        cause,
        affected,
        category,
        severity,
        stealth,
    )?;
    project.record_defect(defect)?;
    project.link(id, cause);
    project.link(id, affected);
    debug!(defect = %id, %cause, %affected, %category, stealth, "defect created");
    Ok(id)
}

/// Direct defects for a freshly completed feature.
pub fn generate_defects<R: Rng + ?Sized>(
    project: &mut Project,
    feature: TaskId,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    let risks = *project
        .feature(feature)
        .ok_or(SimError::NotAFeature(feature))?
        .risks();
    let count = draw_defect_count(project.config().max_defects_per_feature, rng);
    let mut created = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let category = pick_category(&risks, rng);
        created.push(spawn_defect(project, feature, feature, category, rng)?);
    }
    Ok(created)
}

/// Regression defects caused by `cause` in other completed features. The
/// affected feature is drawn by existing defect count so defects cluster.
pub fn generate_regressions<R: Rng + ?Sized>(
    project: &mut Project,
    cause: TaskId,
    count: u32,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    let inherited = project
        .task(cause)
        .ok_or(SimError::UnknownTask(cause))?
        .as_defect()
        .map(Defect::category);
    let mut created = Vec::new();
    for _ in 0..count {
        let candidates: Vec<TaskId> = project
            .done_features()
            .into_iter()
            .filter(|id| *id != cause)
            .collect();
        if candidates.is_empty() {
            break;
        }
        let weights: Vec<f64> = candidates
            .iter()
            .map(|id| project.defect_count(*id) as f64)
            .collect();
        let idx = weighted_index(&weights, rng).unwrap_or_else(|| rng.gen_range(0..candidates.len()));
        let affected = candidates[idx];
        let category = match inherited {
            Some(c) => c,
            None => {
                let risks = *project
                    .feature(affected)
                    .ok_or(SimError::NotAFeature(affected))?
                    .risks();
                pick_category(&risks, rng)
            }
        };
        created.push(spawn_defect(project, cause, affected, category, rng)?);
    }
    Ok(created)
}

/// Side effects of completing a feature.
pub(crate) fn on_feature_done<R: Rng + ?Sized>(
    project: &mut Project,
    feature: TaskId,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    let mut created = generate_defects(project, feature, rng)?;
    if rng.gen::<f64>() < project.config().regression_risk {
        created.extend(generate_regressions(project, feature, 1, rng)?);
    }
    Ok(created)
}

/// Side effects of fixing a defect.
pub(crate) fn on_defect_done<R: Rng + ?Sized>(
    project: &mut Project,
    defect: TaskId,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    if rng.gen::<f64>() < DEFECT_REGRESSION_CHANCE {
        let n = rng.gen_range(1..=MAX_FIX_REGRESSIONS);
        return generate_regressions(project, defect, n, rng);
    }
    Ok(Vec::new())
}
