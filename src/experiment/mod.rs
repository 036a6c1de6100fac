//! Sample cycle sequencing.
//!
//! - [`state`]: cycle states, events, and outcomes
//! - [`orchestrator`]: the loop that drives the station

pub mod orchestrator;
pub mod state;

pub use orchestrator::{CycleOrchestrator, OperatorCommand, OperatorPrompt};
pub use state::{CycleEvent, CycleState, CycleStatus};
