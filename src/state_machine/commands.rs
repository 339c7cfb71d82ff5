//! Commands that can mutate workflow state.
//!
//! All state changes MUST go through the state machine's `apply()` method.
//! This is the only way to mutate an instance, ensuring a single source of
//! truth.

use serde::Serialize;

use crate::instance::PhaseName;
use crate::plan_input::SprintDeclaration;

/// Commands that can mutate workflow state.
#[derive(Debug, Clone, Serialize)]
pub enum StateCommand {
    // Phase lifecycle
    /// Start a pending phase; every prior phase must be completed
    ///
    /// Constructed only by tests today: the production CLI auto-starts the
    /// next phase on completion. The variant remains a supported command.
    #[allow(dead_code)]
    StartPhase { phase: PhaseName },
    /// Complete an in-progress phase and auto-start the next one
    CompletePhase { phase: PhaseName },
    /// Mark an in-progress phase failed, blocking everything downstream
    FailPhase { phase: PhaseName, reason: String },
    /// Reset a failed phase (or re-arm a rejected gate) and run it again
    RetryPhase { phase: PhaseName },

    // Gate decisions
    /// Approve the pending gate of an in-progress phase
    ApproveGate { phase: PhaseName },
    /// Reject the pending gate of an in-progress phase
    RejectGate { phase: PhaseName },

    // Sprint execution
    /// Register the sprint plan: builds the dependency graph, assigns
    /// execution layers and registers contracts. All-or-nothing.
    AttachSprints { declarations: Vec<SprintDeclaration> },
    /// An executor picked up a sprint
    StartSprint { sprint_id: String },
    /// An executor finished a sprint; completing a layer locks the
    /// contracts that layer produced
    CompleteSprint { sprint_id: String },

    /// Abandon the instance. One-way; nothing can be applied afterwards.
    Abandon,
}
