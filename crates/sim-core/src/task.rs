//! Task hierarchy: features, defects and test tasks share a [`TaskCore`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SimError;

/// Unique identifier of a task within a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

/// Unique identifier of a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub u64);

/// Ordinal of a sprint within its project, starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SprintId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Display for SprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Lifecycle state shared by every task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    New,
    Done,
}

/// Defect categories, also used as the axes of a feature's risk profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectCategory {
    Functionality,
    Usability,
    Performance,
    Security,
}

impl DefectCategory {
    /// Cycle order used by the category-rotating strategies.
    pub const ALL: [DefectCategory; 4] = [
        DefectCategory::Functionality,
        DefectCategory::Usability,
        DefectCategory::Performance,
        DefectCategory::Security,
    ];

    /// Category at position `n mod 4` of [`DefectCategory::ALL`].
    pub fn from_cycle(n: u32) -> Self {
        Self::ALL[(n % 4) as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DefectCategory::Functionality => "functionality",
            DefectCategory::Usability => "usability",
            DefectCategory::Performance => "performance",
            DefectCategory::Security => "security",
        }
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity, effort and status common to all task variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskCore {
    id: TaskId,
    name: String,
    size: f64,
    complexity: f64,
    status: TaskStatus,
}

impl TaskCore {
    /// Builds a core by running the soft setters over defaults, so invalid
    /// inputs leave `id 0`, `"untitled"`, size 1 or complexity 1 in place.
    pub fn new(id: TaskId, name: &str, size: f64, complexity: f64) -> Self {
        let mut core = Self {
            id: TaskId(0),
            name: "untitled".to_string(),
            size: 1.0,
            complexity: 1.0,
            status: TaskStatus::New,
        };
        core.set_id(id);
        core.set_name(name);
        core.set_size(size);
        core.set_complexity(complexity);
        core
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn complexity(&self) -> f64 {
        self.complexity
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Ignored for `0` and once a valid id has been assigned.
    pub fn set_id(&mut self, id: TaskId) {
        if id.0 > 0 && self.id.0 == 0 {
            self.id = id;
        }
    }

    /// Ignored for blank names.
    pub fn set_name(&mut self, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.name = trimmed.to_string();
        }
    }

    /// Ignored unless finite and > 0.
    pub fn set_size(&mut self, size: f64) {
        if size.is_finite() && size > 0.0 {
            self.size = size;
        }
    }

    /// Ignored unless finite and > 0.
    pub fn set_complexity(&mut self, complexity: f64) {
        if complexity.is_finite() && complexity > 0.0 {
            self.complexity = complexity;
        }
    }

    /// Returns `true` when the status actually changed.
    pub(crate) fn mark_done(&mut self) -> bool {
        if self.status == TaskStatus::Done {
            return false;
        }
        self.status = TaskStatus::Done;
        true
    }
}

/// Relative defect likelihood per category. Weights need not sum to 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub functionality: f64,
    pub usability: f64,
    pub performance: f64,
    pub security: f64,
}

impl RiskProfile {
    /// Negative or non-finite weights are clamped to 0.
    pub fn new(functionality: f64, usability: f64, performance: f64, security: f64) -> Self {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        Self {
            functionality: clean(functionality),
            usability: clean(usability),
            performance: clean(performance),
            security: clean(security),
        }
    }

    pub fn weight(&self, category: DefectCategory) -> f64 {
        match category {
            DefectCategory::Functionality => self.functionality,
            DefectCategory::Usability => self.usability,
            DefectCategory::Performance => self.performance,
            DefectCategory::Security => self.security,
        }
    }

    /// Weights in [`DefectCategory::ALL`] order.
    pub fn weights(&self) -> [f64; 4] {
        DefectCategory::ALL.map(|c| self.weight(c))
    }

    /// Highest-weighted category; earlier categories win ties.
    pub fn top(&self) -> DefectCategory {
        let mut best = DefectCategory::Functionality;
        for c in DefectCategory::ALL {
            if self.weight(c) > self.weight(best) {
                best = c;
            }
        }
        best
    }
}

/// A unit of product work that spawns defects when completed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feature {
    core: TaskCore,
    knowledge: f64,
    risk_knowledge: f64,
    risks: RiskProfile,
}

impl Feature {
    pub fn new(id: TaskId, name: &str, size: f64, complexity: f64, risks: RiskProfile) -> Self {
        Self {
            core: TaskCore::new(id, name, size, complexity),
            knowledge: 0.0,
            risk_knowledge: 0.0,
            risks,
        }
    }

    pub fn core(&self) -> &TaskCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    pub fn knowledge(&self) -> f64 {
        self.knowledge
    }

    pub fn risk_knowledge(&self) -> f64 {
        self.risk_knowledge
    }

    pub fn risks(&self) -> &RiskProfile {
        &self.risks
    }

    pub fn set_risks(&mut self, risks: RiskProfile) {
        self.risks = risks;
    }

    pub fn set_knowledge(&mut self, value: f64) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(SimError::InvalidKnowledge(value));
        }
        self.knowledge = value;
        Ok(())
    }

    pub fn set_risk_knowledge(&mut self, value: f64) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(SimError::InvalidRiskKnowledge(value));
        }
        self.risk_knowledge = value;
        Ok(())
    }

    /// Category with the highest risk weight.
    pub fn top_risk(&self) -> DefectCategory {
        self.risks.top()
    }

    /// Whether any risk assessment has been spent on this feature.
    pub fn risk_assessed(&self) -> bool {
        self.risk_knowledge > 0.0
    }
}

/// A fault introduced by completing some task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Defect {
    core: TaskCore,
    cause: TaskId,
    affected: TaskId,
    severity: u8,
    category: DefectCategory,
    stealth: f64,
    found: bool,
}

impl Defect {
    /// `severity` falls back to 1 when out of range; `stealth` must be valid.
    pub fn new(
        core: TaskCore,
        cause: TaskId,
        affected: TaskId,
        category: DefectCategory,
        severity: u8,
        stealth: f64,
    ) -> Result<Self, SimError> {
        let mut defect = Self {
            core,
            cause,
            affected,
            severity: 1,
            category,
            stealth: 0.0,
            found: false,
        };
        defect.set_severity(severity);
        defect.set_stealth(stealth)?;
        Ok(defect)
    }

    pub fn core(&self) -> &TaskCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    pub fn cause(&self) -> TaskId {
        self.cause
    }

    pub fn affected(&self) -> TaskId {
        self.affected
    }

    pub fn severity(&self) -> u8 {
        self.severity
    }

    pub fn category(&self) -> DefectCategory {
        self.category
    }

    pub fn stealth(&self) -> f64 {
        self.stealth
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn is_regression(&self) -> bool {
        self.cause != self.affected
    }

    /// Ignored outside [1, 10].
    pub fn set_severity(&mut self, severity: u8) {
        if (1..=10).contains(&severity) {
            self.severity = severity;
        }
    }

    pub fn set_stealth(&mut self, stealth: f64) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&stealth) {
            return Err(SimError::InvalidStealth(stealth));
        }
        self.stealth = stealth;
        Ok(())
    }

    pub(crate) fn mark_found(&mut self) {
        self.found = true;
    }
}

/// What a test task does when its sprint completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestKind {
    GatherKnowledge,
    Exploratory,
    Functional,
    Performance,
    Security,
    Usability,
    RiskAssessment,
}

impl TestKind {
    /// Single-category detection test for `category`.
    pub fn for_category(category: DefectCategory) -> Self {
        match category {
            DefectCategory::Functionality => TestKind::Functional,
            DefectCategory::Usability => TestKind::Usability,
            DefectCategory::Performance => TestKind::Performance,
            DefectCategory::Security => TestKind::Security,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TestKind::GatherKnowledge => "knowledge gathering",
            TestKind::Exploratory => "exploratory testing",
            TestKind::Functional => "functional testing",
            TestKind::Performance => "performance testing",
            TestKind::Security => "security testing",
            TestKind::Usability => "usability testing",
            TestKind::RiskAssessment => "risk assessment",
        }
    }
}

/// Testing work scheduled into a sprint. Its effort is its size.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestTask {
    core: TaskCore,
    kind: TestKind,
    features: Vec<TaskId>,
}

impl TestTask {
    pub fn new(id: TaskId, kind: TestKind, features: Vec<TaskId>, effort: f64) -> Self {
        let name = format!("{} ({} features)", kind.label(), features.len());
        Self {
            core: TaskCore::new(id, &name, effort, 1.0),
            kind,
            features,
        }
    }

    pub fn core(&self) -> &TaskCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn features(&self) -> &[TaskId] {
        &self.features
    }

    pub fn effort(&self) -> f64 {
        self.core.size()
    }

    /// Effort each target receives; zero when there are no targets.
    pub fn effort_per_feature(&self) -> f64 {
        if self.features.is_empty() {
            0.0
        } else {
            self.effort() / self.features.len() as f64
        }
    }
}

/// Discriminant replacing runtime type inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Feature,
    Defect,
    Test,
}

/// Any task a project can hold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    Feature(Feature),
    Defect(Defect),
    Test(TestTask),
}

impl Task {
    pub fn core(&self) -> &TaskCore {
        match self {
            Task::Feature(f) => f.core(),
            Task::Defect(d) => d.core(),
            Task::Test(t) => t.core(),
        }
    }

    pub fn core_mut(&mut self) -> &mut TaskCore {
        match self {
            Task::Feature(f) => f.core_mut(),
            Task::Defect(d) => d.core_mut(),
            Task::Test(t) => t.core_mut(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Feature(_) => TaskKind::Feature,
            Task::Defect(_) => TaskKind::Defect,
            Task::Test(_) => TaskKind::Test,
        }
    }

    pub fn id(&self) -> TaskId {
        self.core().id()
    }

    pub fn size(&self) -> f64 {
        self.core().size()
    }

    pub fn is_done(&self) -> bool {
        self.core().is_done()
    }

    /// Features and defects are development work; tests are not.
    pub fn is_dev_work(&self) -> bool {
        !matches!(self, Task::Test(_))
    }

    pub fn as_feature(&self) -> Option<&Feature> {
        match self {
            Task::Feature(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_feature_mut(&mut self) -> Option<&mut Feature> {
        match self {
            Task::Feature(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_defect(&self) -> Option<&Defect> {
        match self {
            Task::Defect(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_defect_mut(&mut self) -> Option<&mut Defect> {
        match self {
            Task::Defect(d) => Some(d),
            _ => None,
        }
    }
}
