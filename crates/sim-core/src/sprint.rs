//! Capacity-constrained sprint scheduling.

use rand::Rng;
use tracing::debug;

use crate::error::SimError;
use crate::project::Project;
use crate::task::{ProjectId, SprintId, TaskId, TaskStatus, TestTask};
use crate::testing;

/// Slack for float accumulation in capacity checks.
const CAPACITY_EPSILON: f64 = 1e-9;

/// One iteration of work: dev tasks reference the project's backlog, test
/// tasks are owned by the sprint.
#[derive(Clone, Debug)]
pub struct Sprint {
    id: SprintId,
    project: ProjectId,
    status: TaskStatus,
    dev_tasks: Vec<TaskId>,
    test_tasks: Vec<TestTask>,
}

impl Sprint {
    pub(crate) fn new(id: SprintId, project: ProjectId) -> Self {
        Self {
            id,
            project,
            status: TaskStatus::New,
            dev_tasks: Vec::new(),
            test_tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> SprintId {
        self.id
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn dev_tasks(&self) -> &[TaskId] {
        &self.dev_tasks
    }

    pub fn test_tasks(&self) -> &[TestTask] {
        &self.test_tasks
    }

    /// Dev tasks in this sprint that are not done yet.
    pub fn open_dev_tasks(&self, project: &Project) -> usize {
        self.dev_tasks
            .iter()
            .filter(|id| project.task(**id).map(|t| !t.is_done()).unwrap_or(false))
            .count()
    }

    pub fn dev_load(&self, project: &Project) -> f64 {
        self.dev_tasks
            .iter()
            .filter_map(|id| project.task(*id))
            .map(|t| t.size())
            .sum()
    }

    pub fn test_load(&self) -> f64 {
        self.test_tasks.iter().map(|t| t.effort()).sum()
    }

    pub fn remaining_dev_effort(&self, project: &Project) -> f64 {
        project.dev_effort() - self.dev_load(project)
    }

    pub fn remaining_test_effort(&self, project: &Project) -> f64 {
        project.test_effort() - self.test_load()
    }

    fn check_mutable(&self, project: &Project) -> Result<(), SimError> {
        if project.id() != self.project {
            return Err(SimError::ProjectMismatch {
                expected: self.project,
                found: project.id(),
            });
        }
        if self.is_done() {
            return Err(SimError::SprintDone(self.id));
        }
        Ok(())
    }

    /// Schedule a backlog feature or defect.
    pub fn add_dev_task(&mut self, project: &Project, id: TaskId) -> Result<(), SimError> {
        self.check_mutable(project)?;
        let task = project.task(id).ok_or(SimError::UnknownTask(id))?;
        if !task.is_dev_work() || !project.backlog().contains(&id) {
            return Err(SimError::NotDevWork(id));
        }
        if self.dev_tasks.contains(&id) {
            return Err(SimError::DuplicateTask(id));
        }
        let remaining = self.remaining_dev_effort(project);
        if task.size() > remaining + CAPACITY_EPSILON {
            return Err(SimError::CapacityExceeded {
                id,
                size: task.size(),
                remaining,
            });
        }
        self.dev_tasks.push(id);
        Ok(())
    }

    /// Schedule a test task.
    pub fn add_test_task(&mut self, project: &Project, task: TestTask) -> Result<(), SimError> {
        self.check_mutable(project)?;
        let id = task.core().id();
        if self.test_tasks.iter().any(|t| t.core().id() == id) {
            return Err(SimError::DuplicateTask(id));
        }
        let remaining = self.remaining_test_effort(project);
        if task.effort() > remaining + CAPACITY_EPSILON {
            return Err(SimError::CapacityExceeded {
                id,
                size: task.effort(),
                remaining,
            });
        }
        self.test_tasks.push(task);
        Ok(())
    }

    /// First-fit by ascending size over open backlog work. Returns how many
    /// tasks were admitted.
    pub fn fill_dev_sprint(&mut self, project: &Project) -> Result<usize, SimError> {
        self.check_mutable(project)?;
        let mut candidates: Vec<(TaskId, f64)> = project
            .backlog_tasks()
            .filter(|t| t.is_dev_work() && !t.is_done() && !self.dev_tasks.contains(&t.id()))
            .map(|t| (t.id(), t.size()))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut remaining = self.remaining_dev_effort(project);
        let mut admitted = 0;
        for (id, size) in candidates {
            if size <= remaining + CAPACITY_EPSILON {
                self.dev_tasks.push(id);
                remaining -= size;
                admitted += 1;
            }
        }
        debug!(sprint = %self.id, admitted, remaining, "dev sprint filled");
        Ok(admitted)
    }

    /// Complete every task (dev work first), then close the sprint. Tasks
    /// already done are skipped, and a test task only counts as done once it
    /// ran, so a failed call can be retried. Closing twice is an error.
    pub fn done<R: Rng + ?Sized>(&mut self, project: &mut Project, rng: &mut R) -> Result<(), SimError> {
        self.check_mutable(project)?;
        for id in self.dev_tasks.clone() {
            project.complete_task(id, rng)?;
        }
        for task in &mut self.test_tasks {
            if task.core().is_done() {
                continue;
            }
            let found = testing::execute(project, task, rng)?;
            task.core_mut().mark_done();
            project.sync_test_done(task.core().id());
            if !found.is_empty() {
                debug!(sprint = %self.id, test = %task.core().id(), found = found.len(), "test task found defects");
            }
        }
        self.status = TaskStatus::Done;
        project.record_sprint_done();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::task::{Feature, RiskProfile, Task, TestKind};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn project(dev: f64, test: f64) -> Project {
        let cfg = ProjectConfig {
            dev_effort: dev,
            test_effort: test,
            ..ProjectConfig::default()
        };
        Project::with_config(1, "sprinting", cfg).unwrap()
    }

    fn add_feature(p: &mut Project, size: f64) -> TaskId {
        let id = p.next_id();
        p.add_to_backlog(Task::Feature(Feature::new(
            id,
            &format!("F{}", id.0),
            size,
            2.0,
            RiskProfile::new(0.25, 0.25, 0.25, 0.25),
        )))
        .unwrap()
    }

    #[test]
    fn round_trip_scenario() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let mut p = project(50.0, 30.0);
        let ids = [8.0, 12.0, 6.0].map(|s| add_feature(&mut p, s));

        let mut dev = p.new_sprint();
        assert_eq!(dev.fill_dev_sprint(&p).unwrap(), 3);
        assert_eq!(dev.remaining_dev_effort(&p), 24.0);
        dev.done(&mut p, &mut rng).unwrap();
        for id in ids {
            assert!(p.task(id).unwrap().is_done());
        }

        let mut test = p.new_sprint();
        let features = p.done_features();
        let tasks = [
            (TestKind::GatherKnowledge, 4.0),
            (TestKind::Exploratory, 6.0),
            (TestKind::Exploratory, 5.0),
        ];
        for (i, (kind, size)) in tasks.into_iter().enumerate() {
            let id = TaskId(1000 + i as u64);
            test.add_test_task(&p, TestTask::new(id, kind, features.clone(), size))
                .unwrap();
        }
        assert_eq!(test.remaining_test_effort(&p), 15.0);

        let too_big = TestTask::new(TaskId(2000), TestKind::Functional, features.clone(), 16.0);
        assert!(matches!(
            test.add_test_task(&p, too_big),
            Err(SimError::CapacityExceeded { .. })
        ));
        assert_eq!(test.test_tasks().len(), 3);
        assert_eq!(test.remaining_test_effort(&p), 15.0);
    }

    #[test]
    fn fill_prefers_small_tasks() {
        let mut p = project(10.0, 5.0);
        let big = add_feature(&mut p, 9.0);
        let small_a = add_feature(&mut p, 3.0);
        let small_b = add_feature(&mut p, 4.0);
        let mut s = p.new_sprint();
        assert_eq!(s.fill_dev_sprint(&p).unwrap(), 2);
        assert_eq!(s.dev_tasks(), &[small_a, small_b]);
        assert!(!s.dev_tasks().contains(&big));
        assert_eq!(s.fill_dev_sprint(&p).unwrap(), 0);
    }

    #[test]
    fn rejects_duplicates_unknown_and_oversize() {
        let mut p = project(10.0, 5.0);
        let a = add_feature(&mut p, 6.0);
        let b = add_feature(&mut p, 5.0);
        let mut s = p.new_sprint();
        s.add_dev_task(&p, a).unwrap();
        assert_eq!(s.add_dev_task(&p, a), Err(SimError::DuplicateTask(a)));
        assert!(matches!(
            s.add_dev_task(&p, b),
            Err(SimError::CapacityExceeded { .. })
        ));
        assert_eq!(s.add_dev_task(&p, TaskId(77)), Err(SimError::UnknownTask(TaskId(77))));
        assert_eq!(s.dev_tasks(), &[a]);

        let t = TestTask::new(TaskId(50), TestKind::Functional, vec![a], 2.0);
        s.add_test_task(&p, t.clone()).unwrap();
        assert_eq!(s.add_test_task(&p, t), Err(SimError::DuplicateTask(TaskId(50))));
    }

    #[test]
    fn done_sprint_is_frozen() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut p = project(10.0, 5.0);
        let a = add_feature(&mut p, 2.0);
        let mut s = p.new_sprint();
        s.fill_dev_sprint(&p).unwrap();
        s.done(&mut p, &mut rng).unwrap();
        assert!(s.is_done());
        assert_eq!(p.completed_sprints(), 1);
        assert_eq!(s.done(&mut p, &mut rng), Err(SimError::SprintDone(s.id())));
        assert_eq!(s.add_dev_task(&p, a), Err(SimError::SprintDone(s.id())));
        assert_eq!(p.completed_sprints(), 1);
    }

    #[test]
    fn foreign_project_rejected() {
        let mut p = project(10.0, 5.0);
        let other = Project::new(2, "other", 10.0, 5.0).unwrap();
        add_feature(&mut p, 2.0);
        let mut s = p.new_sprint();
        assert!(matches!(
            s.fill_dev_sprint(&other),
            Err(SimError::ProjectMismatch { .. })
        ));
    }

    #[test]
    fn persisted_test_tasks_are_not_dev_work() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut p = project(10.0, 5.0);
        let a = add_feature(&mut p, 2.0);
        let mut s = p.new_sprint();
        s.fill_dev_sprint(&p).unwrap();
        s.done(&mut p, &mut rng).unwrap();

        let mut next = p.new_sprint();
        let t = TestTask::new(p.next_id(), TestKind::GatherKnowledge, vec![a], 2.0);
        p.persist_test_task(&t).unwrap();
        next.add_test_task(&p, t.clone()).unwrap();
        assert_eq!(next.add_dev_task(&p, t.core().id()), Err(SimError::NotDevWork(t.core().id())));
        next.done(&mut p, &mut rng).unwrap();
        assert!(p.task(t.core().id()).unwrap().is_done());
        assert_eq!(p.feature(a).unwrap().knowledge(), 1.0);
    }

    #[test]
    fn failed_test_task_is_retried() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut p = project(10.0, 5.0);
        let a = add_feature(&mut p, 4.0);
        let b = add_feature(&mut p, 4.0);
        let mut dev = p.new_sprint();
        dev.add_dev_task(&p, a).unwrap();
        dev.done(&mut p, &mut rng).unwrap();

        let mut s = p.new_sprint();
        s.add_test_task(&p, TestTask::new(TaskId(100), TestKind::GatherKnowledge, vec![a], 2.0))
            .unwrap();
        s.add_test_task(&p, TestTask::new(TaskId(101), TestKind::GatherKnowledge, vec![b], 2.0))
            .unwrap();
        assert_eq!(s.done(&mut p, &mut rng), Err(SimError::TaskNotDone(b)));
        assert!(!s.is_done());
        assert_eq!(p.completed_sprints(), 1);
        assert!(s.test_tasks()[0].core().is_done());
        assert!(!s.test_tasks()[1].core().is_done());

        p.complete_task(b, &mut rng).unwrap();
        s.done(&mut p, &mut rng).unwrap();
        assert!(s.is_done());
        assert!(s.test_tasks()[1].core().is_done());
        // the first task ran once, the second ran on retry
        assert_eq!(p.feature(a).unwrap().knowledge(), 0.5);
        assert_eq!(p.feature(b).unwrap().knowledge(), 0.5);
        assert_eq!(p.completed_sprints(), 2);
    }

    proptest! {
        #[test]
        fn capacity_never_exceeded(sizes in proptest::collection::vec(1u32..15, 1..25),
                                   dev in 1u32..40) {
            let mut p = project(f64::from(dev), 5.0);
            for s in &sizes {
                add_feature(&mut p, f64::from(*s));
            }
            let mut sprint = p.new_sprint();
            sprint.fill_dev_sprint(&p).unwrap();
            prop_assert!(sprint.dev_load(&p) <= p.dev_effort());
            for id in p.backlog().to_vec() {
                let before = sprint.dev_tasks().to_vec();
                if sprint.add_dev_task(&p, id).is_err() {
                    prop_assert_eq!(sprint.dev_tasks(), &before[..]);
                }
                prop_assert!(sprint.dev_load(&p) <= p.dev_effort());
            }
        }
    }
}
