// Dealflow Library - Deal Lifecycle Engine
// This exposes the core components for testing and integration

pub mod config;
pub mod deal;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{config, init_config, DealflowConfig};
pub use deal::{
    can_perform, Actor, ApprovalCoordinator, ApprovalOutcome, ArtifactGenerator, ArtifactRef,
    Deal, DealAction, DealActivity, DealError, DealStage, DealStateMachine, DealStore,
    DealVersion, DispatchHandoff, LineItem, NewDeal, Role, UriArtifactGenerator, VersionPayload,
};
pub use store::MemoryStore;
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use telemetry::init_telemetry;
