// Deal lifecycle engine: stage table, role gate, audit trail, the state
// machine, and the approval transaction coordinator.

pub mod activity;
pub mod approval;
pub mod artifact;
pub mod errors;
pub mod gate;
pub mod hash;
pub mod mocks;
pub mod stage;
pub mod state_machine;
pub mod traits;
pub mod types;

pub use activity::{ActivityDraft, ActivityKind, DealActivity};
pub use approval::ApprovalCoordinator;
pub use artifact::UriArtifactGenerator;
pub use errors::DealError;
pub use gate::{can_perform, DealAction, Role};
pub use stage::DealStage;
pub use state_machine::DealStateMachine;
pub use traits::{ApprovalCommit, ArtifactGenerator, DealStore, LockOutcome, TransitionCommit};
pub use types::{
    Actor, ApprovalOutcome, ArtifactRef, Deal, DealVersion, DispatchHandoff, LineItem, NewDeal,
    VersionPayload,
};
