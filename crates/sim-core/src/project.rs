//! Project state: task store, backlog, defect ledger and link index.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ProjectConfig;
use crate::defects;
use crate::error::SimError;
use crate::sprint::Sprint;
use crate::task::{Defect, Feature, ProjectId, SprintId, Task, TaskId, TaskKind, TestTask};

/// Why a project run ended without success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossReason {
    /// Features were still open at the deadline.
    Scope,
    /// Too much defect severity escaped into the release.
    Quality,
}

/// Outcome of evaluating a project between sprints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameState {
    InProgress,
    Won,
    Lost(LossReason),
}

impl GameState {
    pub fn is_over(self) -> bool {
        self != GameState::InProgress
    }
}

/// A simulated software project.
#[derive(Clone, Debug)]
pub struct Project {
    id: ProjectId,
    name: String,
    config: ProjectConfig,
    tasks: BTreeMap<TaskId, Task>,
    backlog: Vec<TaskId>,
    defects: Vec<TaskId>,
    links: BTreeMap<TaskId, BTreeSet<TaskId>>,
    sprints: Vec<SprintId>,
    completed_sprints: u32,
}

impl Project {
    /// Creates an empty project using default generation settings.
    pub fn new(id: u64, name: &str, dev_effort: f64, test_effort: f64) -> Result<Self, SimError> {
        let config = ProjectConfig {
            dev_effort,
            test_effort,
            ..ProjectConfig::default()
        };
        Self::with_config(id, name, config)
    }

    /// Creates an empty project carrying `config`. Effort budgets are
    /// checked here; full config validation happens at generation time.
    pub fn with_config(id: u64, name: &str, config: ProjectConfig) -> Result<Self, SimError> {
        if id == 0 {
            return Err(SimError::InvalidProjectId);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SimError::EmptyProjectName);
        }
        for effort in [config.dev_effort, config.test_effort] {
            if effort < 0.0 || effort.is_nan() {
                return Err(SimError::NegativeEffort(effort));
            }
        }
        Ok(Self {
            id: ProjectId(id),
            name: name.to_string(),
            config,
            tasks: BTreeMap::new(),
            backlog: Vec::new(),
            defects: Vec::new(),
            links: BTreeMap::new(),
            sprints: Vec::new(),
            completed_sprints: 0,
        })
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn dev_effort(&self) -> f64 {
        self.config.dev_effort
    }

    pub fn test_effort(&self) -> f64 {
        self.config.test_effort
    }

    pub fn set_dev_effort(&mut self, effort: f64) -> Result<(), SimError> {
        if effort < 0.0 || effort.is_nan() {
            return Err(SimError::NegativeEffort(effort));
        }
        self.config.dev_effort = effort;
        Ok(())
    }

    pub fn set_test_effort(&mut self, effort: f64) -> Result<(), SimError> {
        if effort < 0.0 || effort.is_nan() {
            return Err(SimError::NegativeEffort(effort));
        }
        self.config.test_effort = effort;
        Ok(())
    }

    /// Next free id, derived from what is currently on the backlog and in
    /// the defect ledger. Calling it twice without persisting anything in
    /// between returns the same id.
    pub fn next_id(&self) -> TaskId {
        let max = self
            .backlog
            .iter()
            .chain(self.defects.iter())
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        TaskId(max + 1)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn feature(&self, id: TaskId) -> Option<&Feature> {
        self.tasks.get(&id).and_then(Task::as_feature)
    }

    pub fn feature_mut(&mut self, id: TaskId) -> Option<&mut Feature> {
        self.tasks.get_mut(&id).and_then(Task::as_feature_mut)
    }

    pub fn defect(&self, id: TaskId) -> Option<&Defect> {
        self.tasks.get(&id).and_then(Task::as_defect)
    }

    pub(crate) fn defect_mut(&mut self, id: TaskId) -> Option<&mut Defect> {
        self.tasks.get_mut(&id).and_then(Task::as_defect_mut)
    }

    /// Backlog ids in insertion order.
    pub fn backlog(&self) -> &[TaskId] {
        &self.backlog
    }

    /// Every defect ever generated, found or not.
    pub fn defect_ledger(&self) -> &[TaskId] {
        &self.defects
    }

    pub fn backlog_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.backlog.iter().filter_map(move |id| self.tasks.get(id))
    }

    pub fn ledger_defects(&self) -> impl Iterator<Item = &Defect> + '_ {
        self.defects.iter().filter_map(move |id| self.defect(*id))
    }

    /// Features on the backlog, in backlog order.
    pub fn features(&self) -> impl Iterator<Item = &Feature> + '_ {
        self.backlog_tasks().filter_map(Task::as_feature)
    }

    /// Ids of completed features, ascending.
    pub fn done_features(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .features()
            .filter(|f| f.core().is_done())
            .map(|f| f.core().id())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of features not yet completed, ascending.
    pub fn open_features(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .features()
            .filter(|f| !f.core().is_done())
            .map(|f| f.core().id())
            .collect();
        ids.sort();
        ids
    }

    /// Put a task on the backlog. Defects placed here are also recorded in
    /// the ledger.
    pub fn add_to_backlog(&mut self, task: Task) -> Result<TaskId, SimError> {
        let id = task.id();
        if self.backlog.contains(&id) || self.tasks.contains_key(&id) {
            return Err(SimError::DuplicateTask(id));
        }
        if matches!(task, Task::Defect(_)) {
            self.defects.push(id);
        }
        self.tasks.insert(id, task);
        self.backlog.push(id);
        Ok(id)
    }

    /// Record a defect in the ledger without surfacing it.
    pub fn record_defect(&mut self, defect: Defect) -> Result<TaskId, SimError> {
        let id = defect.core().id();
        if self.tasks.contains_key(&id) {
            return Err(SimError::DuplicateTask(id));
        }
        self.tasks.insert(id, Task::Defect(defect));
        self.defects.push(id);
        Ok(id)
    }

    /// Move a ledger defect onto the backlog. No-op if already there.
    pub fn surface_defect(&mut self, id: TaskId) -> Result<(), SimError> {
        if self.defect(id).is_none() {
            return Err(SimError::NotADefect(id));
        }
        if !self.backlog.contains(&id) {
            self.backlog.push(id);
        }
        Ok(())
    }

    /// Link two tasks symmetrically. Self links are ignored.
    pub fn link(&mut self, a: TaskId, b: TaskId) {
        if a == b {
            return;
        }
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    pub fn linked(&self, id: TaskId) -> Vec<TaskId> {
        self.links
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ledger defects affecting `feature`, including regressions.
    pub fn defect_count(&self, feature: TaskId) -> usize {
        self.ledger_defects()
            .filter(|d| d.affected() == feature)
            .count()
    }

    pub fn found_defect_count(&self) -> usize {
        self.ledger_defects().filter(|d| d.is_found()).count()
    }

    /// Σ severity of ledger defects that are not fixed.
    pub fn escaped_severity(&self) -> f64 {
        self.ledger_defects()
            .filter(|d| !d.core().is_done())
            .map(|d| f64::from(d.severity()))
            .sum()
    }

    /// Mark a task done and apply its variant's side effects. Already done
    /// tasks are skipped. Test tasks are run through their sprint instead.
    pub fn complete_task<R: Rng + ?Sized>(
        &mut self,
        id: TaskId,
        rng: &mut R,
    ) -> Result<Vec<TaskId>, SimError> {
        let task = self.tasks.get_mut(&id).ok_or(SimError::UnknownTask(id))?;
        if !task.core_mut().mark_done() {
            return Ok(Vec::new());
        }
        match task.kind() {
            TaskKind::Feature => defects::on_feature_done(self, id, rng),
            TaskKind::Defect => defects::on_defect_done(self, id, rng),
            TaskKind::Test => Ok(Vec::new()),
        }
    }

    /// Persist a test task on the backlog so that its id is taken.
    pub fn persist_test_task(&mut self, task: &TestTask) -> Result<TaskId, SimError> {
        self.add_to_backlog(Task::Test(task.clone()))
    }

    /// Keep a persisted copy of a test task in step with its sprint.
    pub(crate) fn sync_test_done(&mut self, id: TaskId) {
        if let Some(Task::Test(t)) = self.tasks.get_mut(&id) {
            t.core_mut().mark_done();
        }
    }

    /// Open a new sprint with the next ordinal.
    pub fn new_sprint(&mut self) -> Sprint {
        let id = SprintId(self.sprints.len() as u32 + 1);
        self.sprints.push(id);
        debug!(project = %self.id, sprint = %id, "sprint opened");
        Sprint::new(id, self.id)
    }

    pub fn sprints(&self) -> &[SprintId] {
        &self.sprints
    }

    pub fn completed_sprints(&self) -> u32 {
        self.completed_sprints
    }

    pub(crate) fn record_sprint_done(&mut self) {
        self.completed_sprints += 1;
    }

    /// Decide whether the run has ended. Releasing early requires every
    /// feature done and no unfixed defect left; otherwise the run lasts
    /// until the sprint deadline.
    pub fn game_state(&self) -> GameState {
        let features_done = self.open_features().is_empty() && self.features().next().is_some();
        let escaped = self.escaped_severity();
        if features_done && escaped == 0.0 {
            return GameState::Won;
        }
        if self.completed_sprints < self.config.max_sprints {
            return GameState::InProgress;
        }
        if !features_done {
            GameState::Lost(LossReason::Scope)
        } else if escaped > self.config.max_escaped_severity {
            GameState::Lost(LossReason::Quality)
        } else {
            GameState::Won
        }
    }
}
