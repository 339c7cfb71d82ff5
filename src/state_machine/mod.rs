//! Centralized state machine for workflow instances.
//!
//! This module provides the ONLY place where instance mutations happen.
//! The machine owns the instance, validates commands, applies them, and
//! journals every command and event. Callers persist the result through
//! the state store and retry on version conflicts.

mod commands;
mod events;

pub use commands::StateCommand;
pub use events::StateEvent;

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contracts;
use crate::errors::CoordinatorError;
use crate::graph::SprintGraph;
use crate::instance::{
    Contract, GateKind, GateStatus, InstanceStatus, PhaseName, PhaseStatus, Sprint, SprintStatus,
    WorkflowInstance,
};
use crate::plan_input::SprintDeclaration;
use crate::scheduler;
use crate::structured_logger::StructuredLogger;

/// The only place workflow state transitions happen.
pub struct PhaseStateMachine {
    instance: WorkflowInstance,
    logger: Arc<StructuredLogger>,
    seq: u64,
}

impl PhaseStateMachine {
    pub fn new(instance: WorkflowInstance, logger: Arc<StructuredLogger>) -> Self {
        Self {
            instance,
            logger,
            seq: 0,
        }
    }

    /// All mutations go through this single method.
    ///
    /// Validates and applies the command, journals it together with the
    /// events it produced, and returns those events. On error the caller
    /// must discard the machine instead of persisting the instance.
    pub fn apply(&mut self, command: StateCommand) -> Result<Vec<StateEvent>, CoordinatorError> {
        self.seq += 1;
        self.logger.log_command(self.seq, &command);

        let events = self.apply_internal(command)?;

        for event in &events {
            self.logger.log_event(self.seq, event);
        }
        self.instance.touch();
        Ok(events)
    }

    /// The current instance, for persisting or inspection.
    pub fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    fn apply_internal(
        &mut self,
        command: StateCommand,
    ) -> Result<Vec<StateEvent>, CoordinatorError> {
        // Abandonment is one-way: nothing applies afterwards.
        if self.instance.status == InstanceStatus::Abandoned {
            return Err(CoordinatorError::InstanceAbandoned {
                id: self.instance.id.clone(),
            });
        }

        match command {
            StateCommand::StartPhase { phase } => self.start_phase(phase),
            StateCommand::CompletePhase { phase } => self.complete_phase(phase),
            StateCommand::FailPhase { phase, reason } => self.fail_phase(phase, reason),
            StateCommand::RetryPhase { phase } => self.retry_phase(phase),
            StateCommand::ApproveGate { phase } => self.approve_gate(phase),
            StateCommand::RejectGate { phase } => self.reject_gate(phase),
            StateCommand::AttachSprints { declarations } => self.attach_sprints(&declarations),
            StateCommand::StartSprint { sprint_id } => self.start_sprint(sprint_id),
            StateCommand::CompleteSprint { sprint_id } => self.complete_sprint(sprint_id),
            StateCommand::Abandon => self.abandon(),
        }
    }

    fn start_phase(&mut self, phase: PhaseName) -> Result<Vec<StateEvent>, CoordinatorError> {
        for prior in PhaseName::ORDERED.iter().take(phase.index()) {
            let status = self.instance.phase(*prior).status;
            if status != PhaseStatus::Completed {
                return Err(invalid(format!(
                    "cannot start {}: prior phase {} is {:?}",
                    phase, prior, status
                )));
            }
        }

        let entry = self.instance.phase_mut(phase);
        if entry.status != PhaseStatus::Pending {
            return Err(invalid(format!(
                "cannot start {}: phase is {:?}",
                phase, entry.status
            )));
        }
        entry.status = PhaseStatus::InProgress;
        entry.started_at = Some(Utc::now());
        self.instance.current_phase = phase;

        Ok(vec![StateEvent::PhaseStarted { phase }])
    }

    fn complete_phase(&mut self, phase: PhaseName) -> Result<Vec<StateEvent>, CoordinatorError> {
        let status = self.instance.phase(phase).status;
        if status != PhaseStatus::InProgress {
            return Err(invalid(format!(
                "cannot complete {}: phase is {:?}",
                phase, status
            )));
        }

        // The implementation phase owns the sprint set; it is not done
        // until every sprint is.
        if phase == PhaseName::Implementation {
            let unfinished: Vec<String> = self
                .instance
                .sprints
                .iter()
                .filter(|s| s.status != SprintStatus::Completed)
                .map(|s| s.id.clone())
                .collect();
            if !unfinished.is_empty() {
                return Err(invalid(format!(
                    "cannot complete implementation: sprints not completed: {}",
                    unfinished.join(", ")
                )));
            }
        }

        let mut events = Vec::new();
        if let Some(gate) = self.instance.phase_mut(phase).gate.as_mut() {
            match (gate.kind, gate.status) {
                (_, GateStatus::Approved) => {}
                (_, GateStatus::Rejected) => {
                    return Err(CoordinatorError::GateRejected { phase })
                }
                (GateKind::Manual, GateStatus::Pending) => {
                    return Err(CoordinatorError::GateStillPending { phase })
                }
                // An automatic gate passes when the driving process asks
                // for completion.
                (GateKind::Automatic, GateStatus::Pending) => {
                    gate.status = GateStatus::Approved;
                    gate.approved_at = Some(Utc::now());
                    events.push(StateEvent::GateApproved {
                        phase,
                        auto_approved: true,
                    });
                }
            }
        }

        let entry = self.instance.phase_mut(phase);
        entry.status = PhaseStatus::Completed;
        entry.completed_at = Some(Utc::now());
        events.push(StateEvent::PhaseCompleted { phase });

        // No idle gap between phases: completing one starts the next.
        match phase.next() {
            Some(next) => {
                let entry = self.instance.phase_mut(next);
                entry.status = PhaseStatus::InProgress;
                entry.started_at = Some(Utc::now());
                self.instance.current_phase = next;
                events.push(StateEvent::PhaseStarted { phase: next });
            }
            None => {
                self.instance.status = InstanceStatus::Completed;
                events.push(StateEvent::InstanceCompleted);
            }
        }

        Ok(events)
    }

    fn fail_phase(
        &mut self,
        phase: PhaseName,
        reason: String,
    ) -> Result<Vec<StateEvent>, CoordinatorError> {
        let entry = self.instance.phase_mut(phase);
        if entry.status != PhaseStatus::InProgress {
            return Err(invalid(format!(
                "cannot fail {}: phase is {:?}",
                phase, entry.status
            )));
        }
        entry.status = PhaseStatus::Failed;
        entry.failure_reason = Some(reason.clone());

        for later in PhaseName::ORDERED.iter().skip(phase.index() + 1) {
            let downstream = self.instance.phase_mut(*later);
            if downstream.status == PhaseStatus::Pending {
                downstream.status = PhaseStatus::Blocked;
            }
        }
        if phase == PhaseName::Implementation {
            for sprint in &mut self.instance.sprints {
                if sprint.status == SprintStatus::InProgress {
                    sprint.status = SprintStatus::Blocked;
                }
            }
        }
        self.instance.status = InstanceStatus::Blocked;

        Ok(vec![
            StateEvent::PhaseFailed { phase, reason },
            StateEvent::InstanceBlocked { phase },
        ])
    }

    fn retry_phase(&mut self, phase: PhaseName) -> Result<Vec<StateEvent>, CoordinatorError> {
        let status = self.instance.phase(phase).status;
        let gate_rejected = self
            .instance
            .phase(phase)
            .gate
            .as_ref()
            .is_some_and(|gate| gate.status == GateStatus::Rejected);

        if status == PhaseStatus::Failed {
            let entry = self.instance.phase_mut(phase);
            entry.status = PhaseStatus::InProgress;
            entry.started_at = Some(Utc::now());
            entry.completed_at = None;
            entry.failure_reason = None;
            if let Some(gate) = entry.gate.as_mut() {
                gate.rearm();
            }

            for later in PhaseName::ORDERED.iter().skip(phase.index() + 1) {
                let downstream = self.instance.phase_mut(*later);
                if downstream.status == PhaseStatus::Blocked {
                    downstream.status = PhaseStatus::Pending;
                }
            }
            if phase == PhaseName::Implementation {
                for sprint in &mut self.instance.sprints {
                    if sprint.status == SprintStatus::Blocked {
                        sprint.status = SprintStatus::Pending;
                    }
                }
            }
            self.instance.status = InstanceStatus::InProgress;
            self.instance.current_phase = phase;

            Ok(vec![
                StateEvent::PhaseRetried { phase },
                StateEvent::PhaseStarted { phase },
            ])
        } else if status == PhaseStatus::InProgress && gate_rejected {
            if let Some(gate) = self.instance.phase_mut(phase).gate.as_mut() {
                gate.rearm();
            }
            Ok(vec![StateEvent::PhaseRetried { phase }])
        } else {
            Err(invalid(format!(
                "cannot retry {}: only a failed phase or a rejected gate can be retried",
                phase
            )))
        }
    }

    fn approve_gate(&mut self, phase: PhaseName) -> Result<Vec<StateEvent>, CoordinatorError> {
        self.decide_gate(phase, GateStatus::Approved)
    }

    fn reject_gate(&mut self, phase: PhaseName) -> Result<Vec<StateEvent>, CoordinatorError> {
        self.decide_gate(phase, GateStatus::Rejected)
    }

    /// Gate decisions are only meaningful while the phase runs and the
    /// gate is still pending.
    fn decide_gate(
        &mut self,
        phase: PhaseName,
        decision: GateStatus,
    ) -> Result<Vec<StateEvent>, CoordinatorError> {
        let status = self.instance.phase(phase).status;
        if status != PhaseStatus::InProgress {
            return Err(invalid(format!(
                "cannot decide gate for {}: phase is {:?}",
                phase, status
            )));
        }

        match self.instance.phase_mut(phase).gate.as_mut() {
            None => Err(invalid(format!("phase {} has no gate", phase))),
            Some(gate) if gate.status == GateStatus::Pending => {
                gate.status = decision;
                if decision == GateStatus::Approved {
                    gate.approved_at = Some(Utc::now());
                    Ok(vec![StateEvent::GateApproved {
                        phase,
                        auto_approved: false,
                    }])
                } else {
                    Ok(vec![StateEvent::GateRejected { phase }])
                }
            }
            Some(gate) => Err(invalid(format!(
                "gate for {} is {:?}, not pending",
                phase, gate.status
            ))),
        }
    }

    fn attach_sprints(
        &mut self,
        declarations: &[SprintDeclaration],
    ) -> Result<Vec<StateEvent>, CoordinatorError> {
        let tasks_status = self.instance.phase(PhaseName::Tasks).status;
        if tasks_status != PhaseStatus::InProgress {
            return Err(invalid(format!(
                "sprints can only be attached while the tasks phase is in progress (it is {:?})",
                tasks_status
            )));
        }
        if !self.instance.sprints.is_empty() {
            return Err(invalid(
                "sprints are already attached to this instance".to_string(),
            ));
        }

        // Validate everything before mutating anything: graph, layers and
        // contract wiring are all-or-nothing.
        let graph = SprintGraph::build(declarations)?;
        if graph.is_empty() {
            return Err(invalid("the plan declares no sprints".to_string()));
        }
        let layers = scheduler::compute_layers(&graph);
        let assignments = scheduler::layer_assignments(&layers);

        let mut producers: BTreeMap<&str, &str> = BTreeMap::new();
        for declaration in declarations {
            for contract_id in &declaration.produces {
                if let Some(first) =
                    producers.insert(contract_id.as_str(), declaration.id.as_str())
                {
                    return Err(CoordinatorError::DuplicateProducer {
                        contract_id: contract_id.clone(),
                        first_sprint: first.to_string(),
                        second_sprint: declaration.id.clone(),
                    });
                }
            }
        }
        for declaration in declarations {
            for contract_id in &declaration.consumes {
                match producers.get(contract_id.as_str()) {
                    None => {
                        return Err(CoordinatorError::UnknownContract {
                            sprint_id: declaration.id.clone(),
                            contract_id: contract_id.clone(),
                        })
                    }
                    // A consumer scheduled at or before its producer could
                    // never see the contract locked.
                    Some(producer) if assignments[*producer] >= assignments[&declaration.id] => {
                        return Err(CoordinatorError::PrematureConsumption {
                            sprint_id: declaration.id.clone(),
                            contract_id: contract_id.clone(),
                            producing_sprint: (*producer).to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let sprint_count = graph.len();
        let layer_count = layers.len();

        self.instance.contracts = producers
            .iter()
            .map(|(contract_id, sprint_id)| Contract {
                id: (*contract_id).to_string(),
                producing_sprint_id: (*sprint_id).to_string(),
                locked_at: None,
            })
            .collect();
        let mut sprints: Vec<Sprint> = declarations
            .iter()
            .map(|declaration| Sprint {
                id: declaration.id.clone(),
                dependencies: declaration.depends_on.iter().cloned().collect(),
                estimated_hours: declaration.estimated_hours,
                status: SprintStatus::Pending,
                layer_index: assignments.get(&declaration.id).copied(),
                contracts_produced: declaration.produces.iter().cloned().collect(),
                contracts_consumed: declaration.consumes.iter().cloned().collect(),
            })
            .collect();
        sprints.sort_by(|a, b| a.id.cmp(&b.id));
        self.instance.sprints = sprints;

        Ok(vec![StateEvent::SprintsPlanned {
            sprint_count,
            layer_count,
        }])
    }

    fn start_sprint(&mut self, sprint_id: String) -> Result<Vec<StateEvent>, CoordinatorError> {
        let implementation = self.instance.phase(PhaseName::Implementation).status;
        if implementation != PhaseStatus::InProgress {
            return Err(invalid(format!(
                "sprints can only start while the implementation phase is in progress (it is {:?})",
                implementation
            )));
        }

        let (layer_index, dependencies, consumed) = {
            let sprint = self.instance.sprint(&sprint_id).ok_or_else(|| {
                CoordinatorError::UnknownSprint {
                    sprint_id: sprint_id.clone(),
                }
            })?;
            if sprint.status != SprintStatus::Pending {
                return Err(invalid(format!(
                    "sprint {} is {:?}, not pending",
                    sprint_id, sprint.status
                )));
            }
            (
                sprint.layer_index.unwrap_or(0),
                sprint.dependencies.clone(),
                sprint.contracts_consumed.clone(),
            )
        };

        let unfinished: Vec<String> = dependencies
            .iter()
            .filter(|dep| {
                self.instance
                    .sprint(dep)
                    .map(|s| s.status != SprintStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if !unfinished.is_empty() {
            return Err(invalid(format!(
                "sprint {} cannot start: dependencies not completed: {}",
                sprint_id,
                unfinished.join(", ")
            )));
        }

        for contract_id in &consumed {
            contracts::assert_available(&self.instance, contract_id, layer_index)?;
        }

        if let Some(sprint) = self.instance.sprint_mut(&sprint_id) {
            sprint.status = SprintStatus::InProgress;
        }

        Ok(vec![StateEvent::SprintStarted {
            sprint_id,
            layer_index,
        }])
    }

    fn complete_sprint(&mut self, sprint_id: String) -> Result<Vec<StateEvent>, CoordinatorError> {
        let layer_index = {
            let sprint = self.instance.sprint(&sprint_id).ok_or_else(|| {
                CoordinatorError::UnknownSprint {
                    sprint_id: sprint_id.clone(),
                }
            })?;
            if sprint.status != SprintStatus::InProgress {
                return Err(invalid(format!(
                    "sprint {} is {:?}, not in progress",
                    sprint_id, sprint.status
                )));
            }
            sprint.layer_index.unwrap_or(0)
        };

        if let Some(sprint) = self.instance.sprint_mut(&sprint_id) {
            sprint.status = SprintStatus::Completed;
        }
        let mut events = vec![StateEvent::SprintCompleted { sprint_id }];

        let layer_done = self
            .instance
            .sprints_in_layer(layer_index)
            .iter()
            .all(|s| s.status == SprintStatus::Completed);
        if layer_done {
            let locked = contracts::lock_layer(&mut self.instance, layer_index, Utc::now())?;
            if !locked.is_empty() {
                events.push(StateEvent::ContractsLocked {
                    layer_index,
                    contract_ids: locked,
                });
            }
        }

        Ok(events)
    }

    fn abandon(&mut self) -> Result<Vec<StateEvent>, CoordinatorError> {
        if self.instance.status == InstanceStatus::Completed {
            return Err(invalid(
                "a completed instance cannot be abandoned".to_string(),
            ));
        }
        self.instance.status = InstanceStatus::Abandoned;
        Ok(vec![StateEvent::InstanceAbandoned])
    }
}

fn invalid(message: String) -> CoordinatorError {
    CoordinatorError::InvalidTransition { message }
}
