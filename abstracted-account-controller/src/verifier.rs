//! Reversal check for delegating calls
//!
//! Runs over the whole batch before any effect is applied. Every call that
//! moves authority away from the controller must be followed, later in the
//! same batch, by a rekey of the managed account back to the controller or
//! by a `VerifyAuthority` call on this controller.

use abstracted_account_api::{Address, Batch, Operation};

use crate::error::ControllerError;

/// Check that every delegation in `batch` has a later reversal step
///
/// `controller` is this controller's address and `managed` the account it
/// controls. Operations aimed at other controllers are not inspected.
pub fn verify_reversals(
    batch: &Batch,
    controller: &Address,
    managed: &Address,
) -> Result<(), ControllerError> {
    let operations = batch.operations();

    for (index, operation) in operations.iter().enumerate() {
        if !delegates_from(operation, controller) {
            continue;
        }

        let reversed = operations[index + 1..].iter().any(|later| {
            later.returns_authority(managed, controller) || later.verifies_authority_of(controller)
        });

        if !reversed {
            tracing::warn!(index, "Delegation without a later reversal step");
            return Err(ControllerError::SelfDelegationInvariantViolated { index });
        }
    }

    Ok(())
}

fn delegates_from(operation: &Operation, controller: &Address) -> bool {
    matches!(
        operation,
        Operation::Invoke { controller: target, call, .. }
            if target == controller && call.delegates_authority()
    )
}
