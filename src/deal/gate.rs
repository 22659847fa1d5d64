// Role/capability gate: a pure decision table, no I/O.
//
// Denial is a boolean, not an error: callers translate `false` into
// `DealError::Unauthorized`.

use serde::{Deserialize, Serialize};

use crate::deal::stage::DealStage;

/// Closed set of roles supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Estimator,
    Admin,
    Owner,
    Dispatch,
}

impl Role {
    /// The three roles that may edit pricing and invoke approval.
    pub fn is_approver(self) -> bool {
        matches!(self, Role::Estimator | Role::Admin | Role::Owner)
    }
}

/// Actions the gate decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealAction {
    /// Request a stage transition to `to`.
    Transition { to: DealStage },
    /// Mutate the active version's pricing payload.
    EditPricing,
    /// Invoke the approval transaction.
    Approve,
    /// Dispatch-side work on a handed-off deal.
    Dispatch,
}

/// `(role, action, current stage) -> permitted`.
///
/// Policy:
/// - USER may only request entry into IN_ESTIMATING from DRAFT; never edits
///   pricing, never approves.
/// - ESTIMATOR / ADMIN / OWNER edit pricing while IN_ESTIMATING and are the
///   only roles that may approve; they may request any tabled transition.
/// - DISPATCH acts only once the stage is DISPATCHED or later.
pub fn can_perform(role: Role, action: DealAction, stage: DealStage) -> bool {
    match role {
        Role::User => match action {
            DealAction::Transition { to } => {
                stage == DealStage::Draft && to == DealStage::InEstimating
            }
            DealAction::EditPricing | DealAction::Approve | DealAction::Dispatch => false,
        },
        Role::Estimator | Role::Admin | Role::Owner => match action {
            DealAction::Transition { .. } => true,
            DealAction::EditPricing => stage == DealStage::InEstimating,
            DealAction::Approve => true,
            DealAction::Dispatch => false,
        },
        Role::Dispatch => match action {
            DealAction::Transition { .. } | DealAction::Dispatch => {
                stage.is_dispatched_or_later()
            }
            DealAction::EditPricing | DealAction::Approve => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DealStage::*;

    #[test]
    fn user_may_only_enter_estimating_from_draft() {
        let enter = DealAction::Transition { to: InEstimating };
        assert!(can_perform(Role::User, enter, Draft));
        assert!(!can_perform(Role::User, enter, InEstimating));
        assert!(!can_perform(Role::User, enter, PendingApproval));
        assert!(!can_perform(
            Role::User,
            DealAction::Transition { to: PendingApproval },
            Draft
        ));
    }

    #[test]
    fn user_cannot_cancel_even_their_own_draft() {
        // Cancellation always goes through an approver-role actor.
        let cancel = DealAction::Transition { to: Cancelled };
        for stage in DealStage::ALL {
            assert!(!can_perform(Role::User, cancel, stage), "{stage}");
        }
        assert!(can_perform(Role::Admin, cancel, Draft));
    }

    #[test]
    fn user_never_approves_or_edits_pricing() {
        for stage in DealStage::ALL {
            assert!(!can_perform(Role::User, DealAction::Approve, stage));
            assert!(!can_perform(Role::User, DealAction::EditPricing, stage));
        }
    }

    #[test]
    fn approver_roles_edit_pricing_only_while_estimating() {
        for role in [Role::Estimator, Role::Admin, Role::Owner] {
            assert!(can_perform(role, DealAction::EditPricing, InEstimating));
            assert!(!can_perform(role, DealAction::EditPricing, Draft));
            assert!(!can_perform(role, DealAction::EditPricing, PendingApproval));
            assert!(!can_perform(role, DealAction::EditPricing, Dispatched));
        }
    }

    #[test]
    fn only_approver_roles_may_approve() {
        for stage in DealStage::ALL {
            assert!(can_perform(Role::Estimator, DealAction::Approve, stage));
            assert!(can_perform(Role::Admin, DealAction::Approve, stage));
            assert!(can_perform(Role::Owner, DealAction::Approve, stage));
            assert!(!can_perform(Role::User, DealAction::Approve, stage));
            assert!(!can_perform(Role::Dispatch, DealAction::Approve, stage));
        }
    }

    #[test]
    fn dispatch_acts_only_after_handoff() {
        assert!(!can_perform(Role::Dispatch, DealAction::Dispatch, PendingApproval));
        assert!(!can_perform(Role::Dispatch, DealAction::Dispatch, InEstimating));
        assert!(can_perform(Role::Dispatch, DealAction::Dispatch, Dispatched));
        assert!(can_perform(Role::Dispatch, DealAction::Dispatch, Delivered));

        let deliver = DealAction::Transition { to: Delivered };
        assert!(can_perform(Role::Dispatch, deliver, Dispatched));
        assert!(!can_perform(Role::Dispatch, deliver, PendingApproval));
    }

    #[test]
    fn gate_never_consults_transition_legality() {
        // The gate is pure capability; edge legality belongs to the table.
        // An approver may *request* an illegal edge; the table rejects it.
        assert!(can_perform(
            Role::Admin,
            DealAction::Transition { to: Delivered },
            Draft
        ));
    }
}
