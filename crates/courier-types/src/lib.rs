//! Common types module for the courier order-workflow client.
//!
//! This module defines the core data types shared by every component of the
//! client: orders and their lifecycle, session identity, the realtime wire
//! protocol, and the workflow effects published to presentation layers.

/// Session identity and roles.
pub mod account;
/// Request and response types for the local HTTP API.
pub mod api;
/// Workflow effects published on the effect bus.
pub mod events;
/// Order lifecycle types.
pub mod order;
/// Realtime wire protocol: inbound events, outbound commands and topics.
pub mod realtime;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Secure string type for bearer credentials.
pub mod secret_string;
/// Utility functions for formatting and timestamps.
pub mod utils;
/// Schema validation for implementation configuration tables.
pub mod validation;

// Re-export all types for convenient access
pub use account::*;
pub use api::*;
pub use events::*;
pub use order::*;
pub use realtime::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use utils::{current_timestamp, current_timestamp_millis, format_price, truncate_id};
pub use validation::*;
