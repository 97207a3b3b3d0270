use thiserror::Error;

use crate::task::{ProjectId, SprintId, TaskId};

/// Errors signaled synchronously by the simulation model.
///
/// Soft-validated fields (size, complexity, id, name, severity) never produce
/// these; their setters ignore bad writes instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Stealth must be within [0, 1].
    #[error("stealth must be within [0,1], got {0}")]
    InvalidStealth(f64),
    /// Knowledge must be within [0, 1].
    #[error("knowledge must be within [0,1], got {0}")]
    InvalidKnowledge(f64),
    /// Risk knowledge must be within [0, 1].
    #[error("risk knowledge must be within [0,1], got {0}")]
    InvalidRiskKnowledge(f64),
    /// Testing effort must be in (0, test effort].
    #[error("invalid effort {effort}: must be within (0, {max}]")]
    InvalidEffort { effort: f64, max: f64 },
    /// Testing requires the feature to be done.
    #[error("task {0} is not done")]
    TaskNotDone(TaskId),
    /// Fix validation requires the defect to be done.
    #[error("defect {0} has not been fixed")]
    DefectNotFixed(TaskId),
    /// Id is not present in the project.
    #[error("task {0} not found")]
    UnknownTask(TaskId),
    /// Id refers to something other than a feature.
    #[error("task {0} is not a feature")]
    NotAFeature(TaskId),
    /// Id refers to something other than a defect.
    #[error("task {0} is not a defect")]
    NotADefect(TaskId),
    /// Only features and defects can be scheduled as development work.
    #[error("task {0} is not development work")]
    NotDevWork(TaskId),
    /// The id is already present.
    #[error("task {0} is already present")]
    DuplicateTask(TaskId),
    /// Sprint capacity would be exceeded.
    #[error("task {id} of size {size} exceeds remaining capacity {remaining}")]
    CapacityExceeded {
        id: TaskId,
        size: f64,
        remaining: f64,
    },
    /// Sprint no longer accepts changes.
    #[error("sprint {0} is already done")]
    SprintDone(SprintId),
    /// Sprint and project do not belong together.
    #[error("sprint belongs to project {expected}, got {found}")]
    ProjectMismatch { expected: ProjectId, found: ProjectId },
    /// Project id must be > 0.
    #[error("project id must be > 0")]
    InvalidProjectId,
    /// Project name must not be blank.
    #[error("project name must not be empty")]
    EmptyProjectName,
    /// Effort budgets must be >= 0.
    #[error("effort budget must be >= 0, got {0}")]
    NegativeEffort(f64),
    /// At least one feature must be generated.
    #[error("feature count must be > 0")]
    InvalidFeatureCount,
    /// A batch needs at least one run per strategy.
    #[error("run count must be > 0")]
    InvalidRunCount,
    /// Named parameter does not exist on the configuration.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    /// Any other configuration inconsistency.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
