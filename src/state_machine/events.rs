//! Events emitted by the state machine after processing commands.
//!
//! Events exist for the journal and for CLI reporting; the instance
//! document itself is the source of truth.

use serde::Serialize;

use crate::instance::PhaseName;

/// Events emitted by the state machine after processing commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StateEvent {
    /// A phase moved to in-progress
    PhaseStarted { phase: PhaseName },
    /// A phase completed
    PhaseCompleted { phase: PhaseName },
    /// A phase failed; downstream phases are blocked
    PhaseFailed { phase: PhaseName, reason: String },
    /// A failed phase was reset (or its rejected gate re-armed)
    PhaseRetried { phase: PhaseName },
    /// A gate was approved, manually or by the automatic pass at
    /// phase-completion time
    GateApproved { phase: PhaseName, auto_approved: bool },
    /// A gate was rejected
    GateRejected { phase: PhaseName },
    /// The sprint plan was attached and layered
    SprintsPlanned {
        sprint_count: usize,
        layer_count: usize,
    },
    /// A sprint moved to in-progress
    SprintStarted {
        sprint_id: String,
        layer_index: usize,
    },
    /// A sprint completed
    SprintCompleted { sprint_id: String },
    /// A completed layer locked the contracts it produced
    ContractsLocked {
        layer_index: usize,
        contract_ids: Vec<String>,
    },
    /// A phase failure blocked the instance
    InstanceBlocked { phase: PhaseName },
    /// Finalization completed; the instance is done
    InstanceCompleted,
    /// The instance was abandoned
    InstanceAbandoned,
}

impl StateEvent {
    /// One-line human description for CLI output.
    pub fn describe(&self) -> String {
        match self {
            Self::PhaseStarted { phase } => format!("phase {} started", phase),
            Self::PhaseCompleted { phase } => format!("phase {} completed", phase),
            Self::PhaseFailed { phase, reason } => {
                format!("phase {} failed: {}", phase, reason)
            }
            Self::PhaseRetried { phase } => format!("phase {} reset for retry", phase),
            Self::GateApproved {
                phase,
                auto_approved: true,
            } => format!("gate for {} approved automatically", phase),
            Self::GateApproved { phase, .. } => format!("gate for {} approved", phase),
            Self::GateRejected { phase } => format!("gate for {} rejected", phase),
            Self::SprintsPlanned {
                sprint_count,
                layer_count,
            } => format!(
                "planned {} sprints across {} execution layers",
                sprint_count, layer_count
            ),
            Self::SprintStarted {
                sprint_id,
                layer_index,
            } => format!("sprint {} started (layer {})", sprint_id, layer_index),
            Self::SprintCompleted { sprint_id } => format!("sprint {} completed", sprint_id),
            Self::ContractsLocked {
                layer_index,
                contract_ids,
            } => format!(
                "layer {} locked contracts: {}",
                layer_index,
                contract_ids.join(", ")
            ),
            Self::InstanceBlocked { phase } => {
                format!("instance blocked by failed phase {}", phase)
            }
            Self::InstanceCompleted => "workflow completed".to_string(),
            Self::InstanceAbandoned => "workflow abandoned".to_string(),
        }
    }
}
