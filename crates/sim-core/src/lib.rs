#![deny(warnings)]

//! Core domain model for the testing-strategy simulator.
//!
//! A project holds features and defects, sprints schedule work against the
//! project's effort budgets, and the testing operations turn effort into
//! knowledge and probabilistic defect detection. Every stochastic operation
//! takes its random source explicitly so runs can be seeded.

pub mod config;
pub mod defects;
pub mod error;
pub mod project;
pub mod sprint;
pub mod task;
pub mod testing;

pub use config::ProjectConfig;
pub use error::SimError;
pub use project::{GameState, LossReason, Project};
pub use sprint::Sprint;
pub use task::{
    Defect, DefectCategory, Feature, ProjectId, RiskProfile, SprintId, Task, TaskCore, TaskId,
    TaskKind, TaskStatus, TestKind, TestTask,
};
