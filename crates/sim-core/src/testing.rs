//! Testing operations: knowledge gathering, risk assessment and the
//! probabilistic detection model.

use rand::Rng;
use tracing::debug;

use crate::error::SimError;
use crate::project::Project;
use crate::task::{DefectCategory, Feature, TaskId, TestKind, TestTask};

fn validate_effort(project: &Project, effort: f64) -> Result<(), SimError> {
    let max = project.test_effort();
    if !(effort > 0.0 && effort <= max) {
        return Err(SimError::InvalidEffort { effort, max });
    }
    Ok(())
}

fn done_feature(project: &Project, id: TaskId) -> Result<&Feature, SimError> {
    let task = project.task(id).ok_or(SimError::UnknownTask(id))?;
    let feature = task.as_feature().ok_or(SimError::NotAFeature(id))?;
    if !feature.core().is_done() {
        return Err(SimError::TaskNotDone(id));
    }
    Ok(feature)
}

fn learning_gain(feature: &Feature, effort: f64) -> f64 {
    effort / feature.core().size().max(feature.core().complexity())
}

/// Raise a done feature's knowledge by `effort / max(size, complexity)`,
/// capped at 1. Returns the new knowledge.
pub fn gather_knowledge(project: &mut Project, feature: TaskId, effort: f64) -> Result<f64, SimError> {
    validate_effort(project, effort)?;
    let f = done_feature(project, feature)?;
    let next = (f.knowledge() + learning_gain(f, effort)).min(1.0);
    project
        .feature_mut(feature)
        .ok_or(SimError::NotAFeature(feature))?
        .set_knowledge(next)?;
    Ok(next)
}

/// Same as [`gather_knowledge`] for risk knowledge.
pub fn risk_assessment(project: &mut Project, feature: TaskId, effort: f64) -> Result<f64, SimError> {
    validate_effort(project, effort)?;
    let f = done_feature(project, feature)?;
    let next = (f.risk_knowledge() + learning_gain(f, effort)).min(1.0);
    project
        .feature_mut(feature)
        .ok_or(SimError::NotAFeature(feature))?
        .set_risk_knowledge(next)?;
    Ok(next)
}

/// Roll detection for every undiscovered, unfixed defect in `feature`.
/// Found defects are surfaced onto the backlog and returned.
pub fn find_defects<R: Rng + ?Sized>(
    project: &mut Project,
    feature: TaskId,
    category: DefectCategory,
    effort: f64,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    validate_effort(project, effort)?;
    let f = done_feature(project, feature)?;
    let cfg = project.config();
    let effort_factor = 1.0 + cfg.test_effort_coefficient * effort / f.core().size();
    let knowledge_factor = 1.0 - cfg.test_knowledge_coefficient * (1.0 - f.knowledge());

    let candidates: Vec<(TaskId, DefectCategory, f64)> = project
        .ledger_defects()
        .filter(|d| d.affected() == feature && !d.is_found() && !d.core().is_done())
        .map(|d| (d.core().id(), d.category(), d.stealth()))
        .collect();
    let type_coefficient = cfg.test_type_coefficient;

    let mut found = Vec::new();
    for (id, defect_category, stealth) in candidates {
        let type_factor = if defect_category == category {
            1.0
        } else {
            type_coefficient
        };
        let score = rng.gen::<f64>() * effort_factor * type_factor * knowledge_factor;
        if score >= stealth {
            found.push(id);
        }
    }
    for id in &found {
        if let Some(d) = project.defect_mut(*id) {
            d.mark_found();
        }
        project.surface_defect(*id)?;
    }
    if !found.is_empty() {
        debug!(%feature, %category, effort, found = found.len(), "defects detected");
    }
    Ok(found)
}

/// A third of the effort each to knowledge, functionality and usability.
pub fn exploratory_test<R: Rng + ?Sized>(
    project: &mut Project,
    feature: TaskId,
    effort: f64,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    validate_effort(project, effort)?;
    let share = effort / 3.0;
    gather_knowledge(project, feature, share)?;
    let mut found = find_defects(project, feature, DefectCategory::Functionality, share, rng)?;
    found.extend(find_defects(project, feature, DefectCategory::Usability, share, rng)?);
    Ok(found)
}

/// Retest the feature a fixed defect lived in, in the defect's category.
pub fn validate_fix<R: Rng + ?Sized>(
    project: &mut Project,
    defect: TaskId,
    effort: f64,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    let d = project.defect(defect).ok_or(SimError::NotADefect(defect))?;
    if !d.core().is_done() {
        return Err(SimError::DefectNotFixed(defect));
    }
    let (affected, category) = (d.affected(), d.category());
    find_defects(project, affected, category, effort, rng)
}

/// Run a test task: its effort is split evenly over its target features.
/// Returns the defects found.
pub fn execute<R: Rng + ?Sized>(
    project: &mut Project,
    task: &TestTask,
    rng: &mut R,
) -> Result<Vec<TaskId>, SimError> {
    let effort = task.effort_per_feature();
    let mut found = Vec::new();
    for &feature in task.features() {
        match task.kind() {
            TestKind::GatherKnowledge => {
                gather_knowledge(project, feature, effort)?;
            }
            TestKind::RiskAssessment => {
                risk_assessment(project, feature, effort)?;
            }
            TestKind::Exploratory => {
                found.extend(exploratory_test(project, feature, effort, rng)?);
            }
            TestKind::Functional => {
                found.extend(find_defects(project, feature, DefectCategory::Functionality, effort, rng)?);
            }
            TestKind::Usability => {
                found.extend(find_defects(project, feature, DefectCategory::Usability, effort, rng)?);
            }
            TestKind::Performance => {
                found.extend(find_defects(project, feature, DefectCategory::Performance, effort, rng)?);
            }
            TestKind::Security => {
                found.extend(find_defects(project, feature, DefectCategory::Security, effort, rng)?);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::task::{Defect, RiskProfile, Task, TaskCore};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(test_effort: f64) -> (Project, ChaCha8Rng) {
        let cfg = ProjectConfig {
            test_effort,
            regression_risk: 0.0,
            ..ProjectConfig::default()
        };
        let mut p = Project::with_config(1, "t", cfg).unwrap();
        p.add_to_backlog(Task::Feature(Feature::new(
            TaskId(1),
            "Search",
            4.0,
            2.0,
            RiskProfile::new(1.0, 0.0, 0.0, 0.0),
        )))
        .unwrap();
        (p, ChaCha8Rng::seed_from_u64(42))
    }

    fn plant(p: &mut Project, id: u64, category: DefectCategory, stealth: f64) {
        let d = Defect::new(
            TaskCore::new(TaskId(id), "planted", 1.0, 1.0),
            TaskId(1),
            TaskId(1),
            category,
            1,
            stealth,
        )
        .unwrap();
        p.record_defect(d).unwrap();
    }

    #[test]
    fn effort_is_validated() {
        let (mut p, mut rng) = setup(10.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        for bad in [0.0, -1.0, 10.5, f64::NAN] {
            assert!(matches!(
                gather_knowledge(&mut p, TaskId(1), bad),
                Err(SimError::InvalidEffort { .. })
            ));
        }
        assert!(gather_knowledge(&mut p, TaskId(1), 10.0).is_ok());
    }

    #[test]
    fn testing_requires_done_feature() {
        let (mut p, mut rng) = setup(10.0);
        assert_eq!(
            gather_knowledge(&mut p, TaskId(1), 1.0),
            Err(SimError::TaskNotDone(TaskId(1)))
        );
        assert_eq!(
            find_defects(&mut p, TaskId(1), DefectCategory::Security, 1.0, &mut rng),
            Err(SimError::TaskNotDone(TaskId(1)))
        );
        assert_eq!(
            risk_assessment(&mut p, TaskId(7), 1.0),
            Err(SimError::UnknownTask(TaskId(7)))
        );
    }

    #[test]
    fn knowledge_gain_uses_larger_of_size_and_complexity() {
        let (mut p, mut rng) = setup(10.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        assert_eq!(gather_knowledge(&mut p, TaskId(1), 1.0).unwrap(), 0.25);
        assert_eq!(risk_assessment(&mut p, TaskId(1), 2.0).unwrap(), 0.5);
        assert_eq!(gather_knowledge(&mut p, TaskId(1), 8.0).unwrap(), 1.0);
    }

    #[test]
    fn zero_knowledge_finds_only_zero_stealth() {
        let (mut p, mut rng) = setup(10.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        let mut planted = p.next_id();
        plant(&mut p, planted.0, DefectCategory::Functionality, 0.0);
        let found = find_defects(&mut p, TaskId(1), DefectCategory::Functionality, 5.0, &mut rng).unwrap();
        assert!(found.contains(&planted));
        for id in &found {
            assert_eq!(p.defect(*id).unwrap().stealth(), 0.0);
        }
        planted = p.next_id();
        plant(&mut p, planted.0, DefectCategory::Functionality, 0.01);
        let again = find_defects(&mut p, TaskId(1), DefectCategory::Functionality, 5.0, &mut rng).unwrap();
        assert!(!again.contains(&planted));
    }

    #[test]
    fn found_defects_surface_on_backlog() {
        let (mut p, mut rng) = setup(10.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        p.feature_mut(TaskId(1)).unwrap().set_knowledge(1.0).unwrap();
        let id = p.next_id();
        plant(&mut p, id.0, DefectCategory::Functionality, 0.0);
        let found = find_defects(&mut p, TaskId(1), DefectCategory::Functionality, 4.0, &mut rng).unwrap();
        assert!(found.contains(&id));
        assert!(p.defect(id).unwrap().is_found());
        assert!(p.backlog().contains(&id));
        let second = find_defects(&mut p, TaskId(1), DefectCategory::Functionality, 4.0, &mut rng).unwrap();
        assert!(!second.contains(&id));
    }

    #[test]
    fn matching_category_detects_more() {
        let mut matched = 0;
        let mut mismatched = 0;
        for seed in 0..200u64 {
            let (mut p, _) = setup(10.0);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            p.complete_task(TaskId(1), &mut rng).unwrap();
            p.feature_mut(TaskId(1)).unwrap().set_knowledge(1.0).unwrap();
            let a = p.next_id();
            plant(&mut p, a.0, DefectCategory::Security, 0.5);
            let b = p.next_id();
            plant(&mut p, b.0, DefectCategory::Performance, 0.5);
            let found = find_defects(&mut p, TaskId(1), DefectCategory::Security, 2.0, &mut rng).unwrap();
            matched += usize::from(found.contains(&a));
            mismatched += usize::from(found.contains(&b));
        }
        assert!(matched > mismatched * 3, "matched {matched} vs {mismatched}");
    }

    #[test]
    fn validate_fix_requires_fixed_defect() {
        let (mut p, mut rng) = setup(10.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        let d = p.defect_ledger()[0];
        assert_eq!(
            validate_fix(&mut p, d, 1.0, &mut rng),
            Err(SimError::DefectNotFixed(d))
        );
        p.surface_defect(d).unwrap();
        p.complete_task(d, &mut rng).unwrap();
        assert!(validate_fix(&mut p, d, 1.0, &mut rng).is_ok());
        assert_eq!(
            validate_fix(&mut p, TaskId(1), 1.0, &mut rng),
            Err(SimError::NotADefect(TaskId(1)))
        );
    }

    #[test]
    fn execute_splits_effort_across_features() {
        let (mut p, mut rng) = setup(10.0);
        p.add_to_backlog(Task::Feature(Feature::new(
            TaskId(2),
            "Cart",
            8.0,
            2.0,
            RiskProfile::new(1.0, 0.0, 0.0, 0.0),
        )))
        .unwrap();
        p.complete_task(TaskId(1), &mut rng).unwrap();
        p.complete_task(TaskId(2), &mut rng).unwrap();
        let id = p.next_id();
        let task = TestTask::new(id, TestKind::GatherKnowledge, vec![TaskId(1), TaskId(2)], 4.0);
        execute(&mut p, &task, &mut rng).unwrap();
        assert_eq!(p.feature(TaskId(1)).unwrap().knowledge(), 0.5);
        assert_eq!(p.feature(TaskId(2)).unwrap().knowledge(), 0.25);
    }

    #[test]
    fn exploratory_raises_knowledge() {
        let (mut p, mut rng) = setup(9.0);
        p.complete_task(TaskId(1), &mut rng).unwrap();
        exploratory_test(&mut p, TaskId(1), 6.0, &mut rng).unwrap();
        assert_eq!(p.feature(TaskId(1)).unwrap().knowledge(), 0.5);
    }

    proptest! {
        #[test]
        fn knowledge_monotone_and_capped(efforts in proptest::collection::vec(0.01f64..10.0, 1..30),
                                         seed in any::<u64>()) {
            let (mut p, _) = setup(10.0);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            p.complete_task(TaskId(1), &mut rng).unwrap();
            let mut last = 0.0;
            for (i, e) in efforts.iter().enumerate() {
                if i % 2 == 0 {
                    gather_knowledge(&mut p, TaskId(1), *e).unwrap();
                } else {
                    exploratory_test(&mut p, TaskId(1), *e, &mut rng).unwrap();
                }
                let k = p.feature(TaskId(1)).unwrap().knowledge();
                prop_assert!(k >= last);
                prop_assert!(k <= 1.0);
                last = k;
            }
        }
    }
}
