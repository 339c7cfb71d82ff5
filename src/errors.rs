//! Error types for workflow coordination.
//!
//! Fatal errors always name the offending sprint or contract ids so a plan
//! author can correct the input without digging through logs.

use std::fmt::{Display, Formatter};

use crate::instance::PhaseName;

/// Errors that can occur while coordinating a workflow instance.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// A sprint declared a dependency on an id that is not in the plan.
    UnknownDependency { sprint_id: String, missing: String },
    /// The declared dependencies contain a cycle.
    CyclicDependency { cycle: Vec<String> },
    /// Two declarations share the same sprint id.
    DuplicateSprint { sprint_id: String },
    /// Two sprints both claim to produce the same contract.
    DuplicateProducer {
        contract_id: String,
        first_sprint: String,
        second_sprint: String,
    },
    /// A sprint consumes a contract no sprint in the plan produces.
    UnknownContract {
        sprint_id: String,
        contract_id: String,
    },
    /// A sprint consumes a contract that is not produced in an earlier layer.
    PrematureConsumption {
        sprint_id: String,
        contract_id: String,
        producing_sprint: String,
    },
    /// Optimistic version check failed on save: a concurrent writer won.
    VersionConflict { expected: u64, actual: u64 },
    /// A sprint tried to consume a contract whose producing layer has not
    /// completed yet.
    ContractNotLocked {
        contract_id: String,
        consuming_layer: usize,
    },
    /// The phase gate was rejected; advancement halts until an explicit retry.
    GateRejected { phase: PhaseName },
    /// The phase gate is still awaiting approval.
    GateStillPending { phase: PhaseName },
    /// The requested transition is not allowed from the current state.
    InvalidTransition { message: String },
    /// No stored instance with the given id.
    InstanceNotFound { id: String },
    /// The instance was abandoned; no further mutation is permitted.
    InstanceAbandoned { id: String },
    /// The referenced sprint does not exist on this instance.
    UnknownSprint { sprint_id: String },
    /// Underlying storage failure.
    Storage { message: String },
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDependency { sprint_id, missing } => {
                write!(f, "sprint {} depends on unknown sprint {}", sprint_id, missing)
            }
            Self::CyclicDependency { cycle } => {
                write!(f, "cyclic sprint dependencies: {}", cycle.join(" -> "))
            }
            Self::DuplicateSprint { sprint_id } => {
                write!(f, "sprint {} is declared more than once", sprint_id)
            }
            Self::DuplicateProducer {
                contract_id,
                first_sprint,
                second_sprint,
            } => write!(
                f,
                "contract {} is produced by both sprint {} and sprint {}",
                contract_id, first_sprint, second_sprint
            ),
            Self::UnknownContract {
                sprint_id,
                contract_id,
            } => write!(
                f,
                "sprint {} consumes contract {} which no sprint produces",
                sprint_id, contract_id
            ),
            Self::PrematureConsumption {
                sprint_id,
                contract_id,
                producing_sprint,
            } => write!(
                f,
                "sprint {} consumes contract {} but is not scheduled after its producer {}",
                sprint_id, contract_id, producing_sprint
            ),
            Self::VersionConflict { expected, actual } => write!(
                f,
                "stored version {} does not match expected version {}",
                actual, expected
            ),
            Self::ContractNotLocked {
                contract_id,
                consuming_layer,
            } => write!(
                f,
                "contract {} is not locked yet; layer {} cannot consume it",
                contract_id, consuming_layer
            ),
            Self::GateRejected { phase } => {
                write!(f, "gate for phase {} was rejected; retry the phase after remediation", phase)
            }
            Self::GateStillPending { phase } => {
                write!(f, "gate for phase {} is still pending approval", phase)
            }
            Self::InvalidTransition { message } => write!(f, "invalid transition: {}", message),
            Self::InstanceNotFound { id } => write!(f, "no workflow instance named {}", id),
            Self::InstanceAbandoned { id } => {
                write!(f, "workflow instance {} was abandoned and cannot be mutated", id)
            }
            Self::UnknownSprint { sprint_id } => {
                write!(f, "no sprint named {} on this instance", sprint_id)
            }
            Self::Storage { message } => write!(f, "storage failure: {}", message),
        }
    }
}

impl std::error::Error for CoordinatorError {}
