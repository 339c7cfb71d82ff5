//! Persisted data model for a workflow instance.
//!
//! A `WorkflowInstance` owns everything the coordinator knows about one
//! feature or epic: the ordered phase lifecycle, the sprint set for the
//! implementation phase, and the interface contracts flowing between
//! execution layers. Instances are mutated only through the state machine
//! and persisted as a single JSON document by the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether the instance tracks a single feature or a larger epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Feature,
    Epic,
}

/// Overall lifecycle status of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Completed,
    Blocked,
    Abandoned,
}

/// The nine delivery phases, in the order they must complete.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Specification,
    Clarification,
    Planning,
    Tasks,
    Validation,
    Implementation,
    Optimization,
    Deployment,
    Finalization,
}

impl PhaseName {
    /// All phases in their declared order.
    pub const ORDERED: [PhaseName; 9] = [
        PhaseName::Specification,
        PhaseName::Clarification,
        PhaseName::Planning,
        PhaseName::Tasks,
        PhaseName::Validation,
        PhaseName::Implementation,
        PhaseName::Optimization,
        PhaseName::Deployment,
        PhaseName::Finalization,
    ];

    /// Position of this phase in the declared order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The phase that follows this one, or `None` for finalization.
    pub fn next(self) -> Option<PhaseName> {
        Self::ORDERED.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Specification => "specification",
            PhaseName::Clarification => "clarification",
            PhaseName::Planning => "planning",
            PhaseName::Tasks => "tasks",
            PhaseName::Validation => "validation",
            PhaseName::Implementation => "implementation",
            PhaseName::Optimization => "optimization",
            PhaseName::Deployment => "deployment",
            PhaseName::Finalization => "finalization",
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
}

/// A blocking approval checkpoint attached to a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub kind: GateKind,
    pub status: GateStatus,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Gate {
    pub fn new(kind: GateKind) -> Self {
        Self {
            kind,
            status: GateStatus::Pending,
            approved_at: None,
        }
    }

    /// Resets the gate to pending, e.g. when its phase is retried.
    pub fn rearm(&mut self) {
        self.status = GateStatus::Pending;
        self.approved_at = None;
    }
}

/// One ordered step of the delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the phase failed, if it did. Also records gate rejections.
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub gate: Option<Gate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

/// A unit of parallelizable work inside the implementation phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub estimated_hours: f64,
    pub status: SprintStatus,
    /// Assigned by the layer scheduler when the plan is attached.
    pub layer_index: Option<usize>,
    #[serde(default)]
    pub contracts_produced: BTreeSet<String>,
    #[serde(default)]
    pub contracts_consumed: BTreeSet<String>,
}

/// A named interface artifact shared across sprint layer boundaries.
/// Once locked it is immutable for the rest of the workflow; a change
/// requires a new contract id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub producing_sprint_id: String,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

/// One feature or epic moving through the delivery lifecycle.
///
/// Invariant: `phases` always holds the nine phases of
/// [`PhaseName::ORDERED`] in declared order, so phases can be addressed by
/// index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub kind: WorkflowKind,
    pub title: String,
    pub status: InstanceStatus,
    pub current_phase: PhaseName,
    /// Monotonic document version used for the optimistic save check.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub sprints: Vec<Sprint>,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl WorkflowInstance {
    /// Creates a fresh instance: specification in progress, everything else
    /// pending. `gates` declares which phases carry a gate and of what kind.
    pub fn new(
        id: &str,
        title: &str,
        kind: WorkflowKind,
        gates: &BTreeMap<PhaseName, GateKind>,
    ) -> Self {
        let now = Utc::now();
        let phases = PhaseName::ORDERED
            .iter()
            .enumerate()
            .map(|(i, name)| Phase {
                name: *name,
                status: if i == 0 {
                    PhaseStatus::InProgress
                } else {
                    PhaseStatus::Pending
                },
                started_at: if i == 0 { Some(now) } else { None },
                completed_at: None,
                failure_reason: None,
                gate: gates.get(name).map(|kind| Gate::new(*kind)),
            })
            .collect();

        Self {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            status: InstanceStatus::InProgress,
            current_phase: PhaseName::Specification,
            version: 0,
            created_at: now,
            updated_at: now,
            phases,
            sprints: Vec::new(),
            contracts: Vec::new(),
        }
    }

    pub fn phase(&self, name: PhaseName) -> &Phase {
        &self.phases[name.index()]
    }

    pub fn phase_mut(&mut self, name: PhaseName) -> &mut Phase {
        &mut self.phases[name.index()]
    }

    pub fn sprint(&self, id: &str) -> Option<&Sprint> {
        self.sprints.iter().find(|s| s.id == id)
    }

    pub fn sprint_mut(&mut self, id: &str) -> Option<&mut Sprint> {
        self.sprints.iter_mut().find(|s| s.id == id)
    }

    pub fn contract(&self, id: &str) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    /// The first phase that has not completed, in declared order.
    /// `None` once finalization is done.
    pub fn first_incomplete_phase(&self) -> Option<PhaseName> {
        self.phases
            .iter()
            .find(|p| p.status != PhaseStatus::Completed)
            .map(|p| p.name)
    }

    /// Sprint ids in the given layer, in lexical order.
    pub fn sprints_in_layer(&self, layer_index: usize) -> Vec<&Sprint> {
        self.sprints
            .iter()
            .filter(|s| s.layer_index == Some(layer_index))
            .collect()
    }

    /// Refreshes the updated-at timestamp; called by the state machine
    /// after every applied command.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
