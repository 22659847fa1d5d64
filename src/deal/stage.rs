// Deal stage enum and the fixed transition table.
//
// Every stage write in the crate funnels through `can_transition_to`; the
// state machine and the approval coordinator are the only writers of
// `Deal.stage`, and both consult this table first.

use serde::{Deserialize, Serialize};

/// Lifecycle stages of a Deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStage {
    /// Created at intake, nothing priced yet
    Draft,
    /// Pricing is being worked on
    InEstimating,
    /// Submitted, waiting for an approval decision
    PendingApproval,
    /// Approval committed; never durably observed on its own (collapsed
    /// into the same commit as Dispatched)
    Approved,
    /// Handed off to fulfillment
    Dispatched,
    /// Fulfilled (terminal)
    Delivered,
    /// Abandoned at any point before delivery (terminal)
    Cancelled,
    /// Approval was declined; loops back to estimating
    Rejected,
}

impl DealStage {
    /// Stages reachable from `self` in a single legal transition.
    pub fn legal_transitions(self) -> &'static [DealStage] {
        use DealStage::*;
        match self {
            Draft => &[InEstimating, Cancelled],
            InEstimating => &[PendingApproval, Cancelled],
            PendingApproval => &[Approved, Rejected, Cancelled],
            Approved => &[Dispatched, Cancelled],
            Dispatched => &[Delivered, Cancelled],
            Rejected => &[InEstimating, Cancelled],
            Delivered | Cancelled => &[],
        }
    }

    /// Whether `(self, to)` is an edge in the transition table.
    ///
    /// Re-requesting the current stage is not a legal edge: self-loops are
    /// rejected like any other untabled pair.
    pub fn can_transition_to(self, to: DealStage) -> bool {
        self.legal_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.legal_transitions().is_empty()
    }

    /// Dispatch-side work is only valid from here on.
    pub fn is_dispatched_or_later(self) -> bool {
        matches!(self, DealStage::Dispatched | DealStage::Delivered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DealStage::Draft => "DRAFT",
            DealStage::InEstimating => "IN_ESTIMATING",
            DealStage::PendingApproval => "PENDING_APPROVAL",
            DealStage::Approved => "APPROVED",
            DealStage::Dispatched => "DISPATCHED",
            DealStage::Delivered => "DELIVERED",
            DealStage::Cancelled => "CANCELLED",
            DealStage::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<DealStage> {
        match s {
            "DRAFT" => Some(DealStage::Draft),
            "IN_ESTIMATING" => Some(DealStage::InEstimating),
            "PENDING_APPROVAL" => Some(DealStage::PendingApproval),
            "APPROVED" => Some(DealStage::Approved),
            "DISPATCHED" => Some(DealStage::Dispatched),
            "DELIVERED" => Some(DealStage::Delivered),
            "CANCELLED" => Some(DealStage::Cancelled),
            "REJECTED" => Some(DealStage::Rejected),
            _ => None,
        }
    }

    pub const ALL: [DealStage; 8] = [
        DealStage::Draft,
        DealStage::InEstimating,
        DealStage::PendingApproval,
        DealStage::Approved,
        DealStage::Dispatched,
        DealStage::Delivered,
        DealStage::Cancelled,
        DealStage::Rejected,
    ];
}

impl std::fmt::Display for DealStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DealStage::*;

    #[test]
    fn happy_path_edges_are_legal() {
        assert!(Draft.can_transition_to(InEstimating));
        assert!(InEstimating.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Delivered));
    }

    #[test]
    fn rejection_loops_back_to_estimating() {
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(InEstimating));
    }

    #[test]
    fn cancel_is_legal_from_every_non_terminal_stage() {
        for from in DealStage::ALL {
            if from.is_terminal() {
                assert!(!from.can_transition_to(Cancelled), "{from} is terminal");
            } else {
                assert!(from.can_transition_to(Cancelled), "{from} should cancel");
            }
        }
    }

    #[test]
    fn self_loops_are_never_legal() {
        for stage in DealStage::ALL {
            assert!(!stage.can_transition_to(stage), "{stage} self-loop");
        }
    }

    #[test]
    fn terminal_stages_have_no_outgoing_edges() {
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Delivered.legal_transitions().is_empty());
        assert!(Cancelled.legal_transitions().is_empty());
    }

    #[test]
    fn untabled_pairs_are_rejected() {
        // Exhaustive complement check: anything not listed is illegal.
        for from in DealStage::ALL {
            for to in DealStage::ALL {
                let tabled = from.legal_transitions().contains(&to);
                assert_eq!(from.can_transition_to(to), tabled);
            }
        }
        // A few pairs that look plausible but must stay illegal.
        assert!(!Draft.can_transition_to(PendingApproval));
        assert!(!InEstimating.can_transition_to(Approved));
        assert!(!PendingApproval.can_transition_to(Dispatched));
        assert!(!Dispatched.can_transition_to(InEstimating));
        assert!(!Rejected.can_transition_to(PendingApproval));
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in DealStage::ALL {
            assert_eq!(DealStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(DealStage::parse("WON"), None);
    }
}
