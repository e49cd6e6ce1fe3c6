//! Core types for botwright
//!
//! This crate provides the fundamental types used throughout the engine:
//! Context, Trigger, ActionOutcome, and the state Scope model.

mod context;
mod outcome;
mod scope;
mod trigger;

pub use context::Context;
pub use outcome::ActionOutcome;
pub use scope::{Scope, ScopeKey};
pub use trigger::{Trigger, TriggerKind};

/// Well-known trigger names fired by the engine itself
pub mod triggers {
    /// Fired by the `reply` action on its way to the gateway collaborator
    pub const ACTION_REPLY: &str = "action.reply";
}
