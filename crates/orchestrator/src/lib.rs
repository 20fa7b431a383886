//! Event-driven authentication-flow orchestration.
//!
//! The orchestrator sits between an opaque auth engine and a UI layer. The
//! [`registry`] owns the single subscription to the engine's event stream and
//! fans each event out to a prioritized handler chain; the [`gateway`] turns
//! fire-and-ack engine commands into `Result`s with the engine's full
//! acknowledgement preserved on failure; the [`flow`] module reduces events
//! into an explicit flow state whose derived side effect is screen
//! navigation, applied through [`navigation`]'s navigate-or-update stack.

pub mod config;
pub mod flow;
pub mod gateway;
pub mod navigation;
pub mod registry;

pub use config::load_profile;
pub use flow::{install_step_up_interceptor, Alert, FlowOrchestrator, FlowPhase, FlowState};
pub use gateway::{expect_event, CommandGateway};
pub use navigation::{NavDirective, NavParams, NavStack, Screen};
pub use registry::{Dispatch, EventRegistry, HandlerGuard};

#[cfg(test)]
mod tests;
