//! Utility functions for formatting and timestamps.

pub mod formatting;
pub mod helpers;

pub use formatting::{format_price, truncate_id};
pub use helpers::{current_timestamp, current_timestamp_millis};
