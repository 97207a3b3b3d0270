#![deny(warnings)]

//! Testing strategy policies.
//!
//! Each strategy is a pure function of the sprint ordinal and the project's
//! backlog state that fills a freshly opened sprint with test tasks.

use serde::{Deserialize, Serialize};
use sim_core::{DefectCategory, Project, SimError, Sprint, TaskId, TestKind, TestTask};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Share of the budget spent on knowledge in the risk-discovery sprint.
pub const KNOWLEDGE_SHARE: f64 = 0.75;
/// Share of the budget spent on top-risk categories once risks are known.
pub const TARGETED_SHARE: f64 = 0.75;

/// The four scripted testing strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Focused,
    Risk,
    Cycle,
    DumbCycle,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Focused,
        Strategy::Risk,
        Strategy::Cycle,
        Strategy::DumbCycle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Focused => "focused",
            Strategy::Risk => "risk",
            Strategy::Cycle => "cycle",
            Strategy::DumbCycle => "dumbcycle",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown strategy name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown strategy: {0}")]
pub struct StrategyParseError(pub String);

impl FromStr for Strategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Strategy::ALL
            .into_iter()
            .find(|st| st.name() == wanted)
            .ok_or_else(|| StrategyParseError(s.to_string()))
    }
}

/// Adds test tasks to one sprint, optionally persisting them on the backlog.
struct Planner<'a> {
    project: &'a mut Project,
    sprint: &'a mut Sprint,
    persist: bool,
    scheduled: usize,
}

impl Planner<'_> {
    fn schedule(&mut self, kind: TestKind, features: Vec<TaskId>, effort: f64) -> Result<(), SimError> {
        if features.is_empty() || effort <= 0.0 {
            return Ok(());
        }
        let task = TestTask::new(self.project.next_id(), kind, features, effort);
        self.sprint.add_test_task(self.project, task.clone())?;
        if self.persist {
            self.project.persist_test_task(&task)?;
        }
        self.scheduled += 1;
        Ok(())
    }

    fn knowledge(&mut self, features: &[TaskId], effort: f64) -> Result<(), SimError> {
        self.schedule(TestKind::GatherKnowledge, features.to_vec(), effort)
    }

    fn category_pass(&mut self, features: &[TaskId], effort: f64) -> Result<(), SimError> {
        let category = DefectCategory::from_cycle(self.sprint.id().0);
        self.schedule(TestKind::for_category(category), features.to_vec(), effort)
    }

    fn risk_discovery(&mut self, features: &[TaskId], budget: f64) -> Result<(), SimError> {
        let knowledge = budget * KNOWLEDGE_SHARE;
        self.knowledge(features, knowledge)?;
        self.schedule(TestKind::RiskAssessment, features.to_vec(), budget - knowledge)
    }

    /// Spend the targeted share on the risk-assessed features, grouped by
    /// top risk in proportion to group size. The residual is an exploratory
    /// pass over the features nobody has assessed yet.
    fn targeted(&mut self, features: &[TaskId], budget: f64) -> Result<(), SimError> {
        let mut groups: BTreeMap<DefectCategory, Vec<TaskId>> = BTreeMap::new();
        let mut rest = Vec::new();
        for id in features {
            match self.project.feature(*id) {
                Some(f) if f.risk_assessed() => groups.entry(f.top_risk()).or_default().push(*id),
                Some(_) => rest.push(*id),
                None => {}
            }
        }
        let assessed: usize = groups.values().map(Vec::len).sum();
        let targeted = if rest.is_empty() {
            budget
        } else if assessed == 0 {
            0.0
        } else {
            budget * TARGETED_SHARE
        };
        for (category, ids) in groups {
            let effort = targeted * ids.len() as f64 / assessed as f64;
            self.schedule(TestKind::for_category(category), ids, effort)?;
        }
        self.schedule(TestKind::Exploratory, rest, budget - targeted)
    }
}

/// Testing round of a sprint: the first sprint that can test is round 1.
fn testing_round(sprint: &Sprint) -> u32 {
    sprint.id().0.saturating_sub(1)
}

/// Populate `sprint` with the test tasks `strategy` wants this round.
/// Returns the number of tasks scheduled.
pub fn plan_tests(strategy: Strategy, project: &mut Project, sprint: &mut Sprint) -> Result<usize, SimError> {
    let done = project.done_features();
    let budget = sprint.remaining_test_effort(project);
    if done.is_empty() || budget <= 0.0 {
        return Ok(0);
    }
    let round = testing_round(sprint);
    let developing = sprint.open_dev_tasks(project) > 0;
    let mut planner = Planner {
        project,
        sprint,
        persist: matches!(strategy, Strategy::Risk | Strategy::Focused),
        scheduled: 0,
    };

    match strategy {
        Strategy::DumbCycle => {
            if round <= 1 {
                planner.knowledge(&done, budget)?;
            } else {
                planner.category_pass(&done, budget)?;
            }
        }
        Strategy::Cycle => {
            if developing {
                planner.knowledge(&done, budget)?;
            } else {
                planner.category_pass(&done, budget)?;
            }
        }
        Strategy::Risk => match round {
            0 | 1 => planner.knowledge(&done, budget)?,
            2 => planner.risk_discovery(&done, budget)?,
            _ if developing => planner.knowledge(&done, budget)?,
            _ => planner.targeted(&done, budget)?,
        },
        Strategy::Focused => match round {
            0 | 1 => planner.knowledge(&done, budget)?,
            2 => planner.risk_discovery(&done, budget)?,
            _ => {
                let phase = round - 3;
                if phase % 3 == 2 {
                    planner.category_pass(&done, budget)?;
                } else {
                    let focus = (phase - phase / 3) as usize % done.len();
                    let target = done[focus];
                    let category = planner
                        .project
                        .feature(target)
                        .map(|f| f.top_risk())
                        .unwrap_or(DefectCategory::Functionality);
                    planner.schedule(TestKind::for_category(category), vec![target], budget)?;
                }
            }
        },
    }

    debug!(%strategy, sprint = %planner.sprint.id(), round, scheduled = planner.scheduled, "tests planned");
    Ok(planner.scheduled)
}
