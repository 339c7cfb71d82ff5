//! Contract locking at layer boundaries.
//!
//! Contracts are interface artifacts produced by one layer and consumed by
//! later ones. A layer's contracts lock when its last sprint completes;
//! from then on the contract definition is immutable for the rest of the
//! workflow. Downstream sprints must see their consumed contracts locked
//! before they may start - that check is what prevents premature parallel
//! execution across an unresolved boundary.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::errors::CoordinatorError;
use crate::instance::{SprintStatus, WorkflowInstance};

/// Locks every contract produced by the given layer.
///
/// Returns the ids that were locked (lexical order). Contracts already
/// locked are left untouched.
///
/// # Errors
///
/// Returns an invalid-transition error naming the unfinished sprints when
/// the layer has not fully completed.
pub fn lock_layer(
    instance: &mut WorkflowInstance,
    layer_index: usize,
    now: DateTime<Utc>,
) -> Result<Vec<String>, CoordinatorError> {
    let incomplete: Vec<String> = instance
        .sprints_in_layer(layer_index)
        .iter()
        .filter(|s| s.status != SprintStatus::Completed)
        .map(|s| s.id.clone())
        .collect();
    if !incomplete.is_empty() {
        return Err(CoordinatorError::InvalidTransition {
            message: format!(
                "cannot lock contracts of layer {}: sprints not completed: {}",
                layer_index,
                incomplete.join(", ")
            ),
        });
    }

    let producers: BTreeSet<String> = instance
        .sprints_in_layer(layer_index)
        .iter()
        .map(|s| s.id.clone())
        .collect();

    let mut locked = Vec::new();
    for contract in &mut instance.contracts {
        if producers.contains(&contract.producing_sprint_id) && !contract.is_locked() {
            contract.locked_at = Some(now);
            locked.push(contract.id.clone());
        }
    }
    locked.sort();
    Ok(locked)
}

/// Checks that a contract is locked before a sprint in `consuming_layer`
/// consumes it.
///
/// # Errors
///
/// [`CoordinatorError::ContractNotLocked`] when the producing layer has not
/// completed (or the contract is unknown to this instance).
pub fn assert_available(
    instance: &WorkflowInstance,
    contract_id: &str,
    consuming_layer: usize,
) -> Result<(), CoordinatorError> {
    match instance.contract(contract_id) {
        Some(contract) if contract.is_locked() => Ok(()),
        _ => Err(CoordinatorError::ContractNotLocked {
            contract_id: contract_id.to_string(),
            consuming_layer,
        }),
    }
}
