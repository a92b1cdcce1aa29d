//! Core workflow coordinator for the courier client.
//!
//! This crate turns the realtime event stream and the backend order API into
//! a consistent local view of the user's active orders. Events are treated as
//! hints: every lifecycle event triggers an authoritative re-fetch, and the
//! fetched order drives the role-specific side effects (escalation timers,
//! chat navigation, rating prompts, notifications) published on the effect
//! bus.

pub mod builder;
pub mod engine;
pub mod error;
pub mod gating;
pub mod handlers;
pub mod monitoring;
pub mod state;
pub mod subscriptions;
pub mod timers;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::{BuilderError, CoordinatorBuilder, CoordinatorFactories};
pub use engine::{effect_bus::EffectBus, CoordinatorEngine, EngineError};
pub use error::WorkflowError;
pub use handlers::PlacedOrder;
pub use state::WorkflowSnapshot;
pub use subscriptions::{Subscription, SubscriptionError, SubscriptionManager};
pub use timers::EscalationTimers;
