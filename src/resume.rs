//! Resume planning for interrupted workflows.
//!
//! The sole entry point for re-continuing work: given a persisted
//! instance, compute the minimal remaining work. Pure and idempotent -
//! planning a resume twice over the same document yields the same plan,
//! and a completed sprint is never scheduled again.

use serde::Serialize;

use crate::errors::CoordinatorError;
use crate::graph::SprintGraph;
use crate::instance::{PhaseName, SprintStatus, WorkflowInstance};
use crate::plan_input::SprintDeclaration;
use crate::scheduler;

/// The minimal remaining work for an interrupted workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePlan {
    pub instance_id: String,
    /// First phase that has not completed; `None` when the workflow is
    /// fully done.
    pub phase: Option<PhaseName>,
    /// Execution layer to resume inside the implementation phase.
    pub layer_index: Option<usize>,
    /// The incomplete sprints of that layer, lexical order. Completed
    /// sprints in the same layer are skipped, not re-run.
    pub sprint_ids: Vec<String>,
}

/// Computes the resume point for an instance.
///
/// Phases are scanned in declared order; the first one not completed is
/// the resume point. Inside the implementation phase, execution layers are
/// recomputed deterministically from the stored sprint declarations and
/// the first layer containing any incomplete sprint is selected.
///
/// # Errors
///
/// Propagates graph-construction errors if the stored sprint data is
/// inconsistent; a document written by the state machine never is.
pub fn plan_resume(instance: &WorkflowInstance) -> Result<ResumePlan, CoordinatorError> {
    let phase = instance.first_incomplete_phase();

    let mut plan = ResumePlan {
        instance_id: instance.id.clone(),
        phase,
        layer_index: None,
        sprint_ids: Vec::new(),
    };

    if phase == Some(PhaseName::Implementation) && !instance.sprints.is_empty() {
        let declarations: Vec<SprintDeclaration> =
            instance.sprints.iter().map(SprintDeclaration::from).collect();
        let graph = SprintGraph::build(&declarations)?;
        let layers = scheduler::compute_layers(&graph);

        for layer in &layers {
            let incomplete: Vec<String> = layer
                .sprint_ids
                .iter()
                .filter(|id| {
                    instance
                        .sprint(id)
                        .map(|s| s.status != SprintStatus::Completed)
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if !incomplete.is_empty() {
                tracing::debug!(
                    instance = %instance.id,
                    layer = layer.index,
                    sprints = incomplete.len(),
                    "resume point inside implementation"
                );
                plan.layer_index = Some(layer.index);
                plan.sprint_ids = incomplete;
                break;
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{GateKind, PhaseStatus, Sprint, WorkflowKind};
    use std::collections::{BTreeMap, BTreeSet};

    fn sprint(id: &str, deps: &[&str], layer: usize, status: SprintStatus) -> Sprint {
        Sprint {
            id: id.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            estimated_hours: 0.0,
            status,
            layer_index: Some(layer),
            contracts_produced: BTreeSet::new(),
            contracts_consumed: BTreeSet::new(),
        }
    }

    fn complete_through(instance: &mut WorkflowInstance, last: PhaseName) {
        for name in PhaseName::ORDERED.iter().take(last.index() + 1) {
            instance.phase_mut(*name).status = PhaseStatus::Completed;
        }
        if let Some(next) = last.next() {
            instance.phase_mut(next).status = PhaseStatus::InProgress;
            instance.current_phase = next;
        }
    }

    #[test]
    fn test_resume_points_at_first_incomplete_phase() {
        // Specification done, planning running with a pending gate: the
        // resume point is planning.
        let mut gates = BTreeMap::new();
        gates.insert(PhaseName::Planning, GateKind::Manual);
        let mut instance =
            WorkflowInstance::new("gated", "Gated feature", WorkflowKind::Feature, &gates);
        complete_through(&mut instance, PhaseName::Clarification);

        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.phase, Some(PhaseName::Planning));
        assert_eq!(plan.layer_index, None);
        assert!(plan.sprint_ids.is_empty());
    }

    #[test]
    fn test_resume_skips_completed_sprints_within_a_layer() {
        // Layers [[S01, S03], [S02]] with S01 already done: resume layer 0
        // with only S03.
        let mut instance =
            WorkflowInstance::new("mid-flight", "Mid flight", WorkflowKind::Feature, &BTreeMap::new());
        complete_through(&mut instance, PhaseName::Validation);
        instance.sprints = vec![
            sprint("S01", &[], 0, SprintStatus::Completed),
            sprint("S02", &["S01"], 1, SprintStatus::Pending),
            sprint("S03", &[], 0, SprintStatus::Pending),
        ];

        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.phase, Some(PhaseName::Implementation));
        assert_eq!(plan.layer_index, Some(0));
        assert_eq!(plan.sprint_ids, vec!["S03".to_string()]);
    }

    #[test]
    fn test_resume_moves_to_next_layer_once_earlier_layers_complete() {
        let mut instance =
            WorkflowInstance::new("later", "Later layer", WorkflowKind::Feature, &BTreeMap::new());
        complete_through(&mut instance, PhaseName::Validation);
        instance.sprints = vec![
            sprint("S01", &[], 0, SprintStatus::Completed),
            sprint("S02", &["S01"], 1, SprintStatus::InProgress),
            sprint("S03", &[], 0, SprintStatus::Completed),
        ];

        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.layer_index, Some(1));
        assert_eq!(plan.sprint_ids, vec!["S02".to_string()]);
    }

    #[test]
    fn test_resume_is_idempotent() {
        let mut instance =
            WorkflowInstance::new("stable", "Stable", WorkflowKind::Epic, &BTreeMap::new());
        complete_through(&mut instance, PhaseName::Validation);
        instance.sprints = vec![
            sprint("S01", &[], 0, SprintStatus::Completed),
            sprint("S02", &["S01"], 1, SprintStatus::Pending),
            sprint("S03", &[], 0, SprintStatus::Pending),
        ];

        let first = plan_resume(&instance).unwrap();
        let second = plan_resume(&instance).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resume_on_fresh_instance() {
        let instance =
            WorkflowInstance::new("fresh", "Fresh", WorkflowKind::Feature, &BTreeMap::new());
        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.phase, Some(PhaseName::Specification));
        assert_eq!(plan.layer_index, None);
    }

    #[test]
    fn test_resume_on_completed_workflow_is_empty() {
        let mut instance =
            WorkflowInstance::new("done", "Done", WorkflowKind::Feature, &BTreeMap::new());
        for phase in &mut instance.phases {
            phase.status = PhaseStatus::Completed;
        }

        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.phase, None);
        assert_eq!(plan.layer_index, None);
        assert!(plan.sprint_ids.is_empty());
    }

    #[test]
    fn test_resume_ignores_sprints_outside_implementation() {
        // Sprints exist already during the tasks phase, but resume only
        // descends into layers once implementation is the resume point.
        let mut instance =
            WorkflowInstance::new("tasks", "Tasks", WorkflowKind::Feature, &BTreeMap::new());
        complete_through(&mut instance, PhaseName::Planning);
        instance.sprints = vec![sprint("S01", &[], 0, SprintStatus::Pending)];

        let plan = plan_resume(&instance).unwrap();
        assert_eq!(plan.phase, Some(PhaseName::Tasks));
        assert_eq!(plan.layer_index, None);
        assert!(plan.sprint_ids.is_empty());
    }
}
