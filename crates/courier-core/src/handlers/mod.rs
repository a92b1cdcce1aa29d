//! Handlers for the order workflow.
//!
//! The status handler owns reconciliation and every status-driven side
//! effect; the order and payment handlers implement user operations on top
//! of it.

pub mod order;
pub mod payment;
pub mod status;

pub use order::OrderHandler;
pub use payment::PaymentHandler;
pub use status::{StatusHandler, StatusHint};

use courier_types::{Order, PaymentSession};
use serde::Serialize;

/// Result of placing an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
	pub order: Order,
	/// Present when an online payment was started.
	pub payment: Option<PaymentSession>,
}
