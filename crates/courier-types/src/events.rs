//! Workflow effects published to presentation layers.
//!
//! The coordinator never drives a UI directly. Every side effect of an order
//! transition is published on the effect bus as a [`WorkflowEffect`]; the
//! presentation layer decides how to render or act on it.

use serde::{Deserialize, Serialize};

use crate::{GeoPoint, Order, OrderStatus, RealtimeEvent, Role};

/// Side effect produced by the workflow coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEffect {
	/// User-facing notification.
	Notify(Notification),
	/// Open the chat screen of an order.
	NavigateToChat { order_id: String },
	/// Ask the customer to rate a delivered order.
	PromptRating { order_id: String },
	/// Reload the customer's loyalty summary.
	RefreshLoyalty { customer_id: String },
	/// A payment was verified and the order advanced.
	PaymentConfirmed { order_id: String },
	/// An order in the active set changed.
	OrderUpdated { order: Order },
	/// An order left the active set.
	OrderRemoved {
		order_id: String,
		status: OrderStatus,
	},
	/// A subscribed rider moved.
	RiderLocation {
		rider_id: String,
		order_id: Option<String>,
		location: GeoPoint,
	},
	/// Chat traffic on a subscribed conversation.
	ChatActivity { event: RealtimeEvent },
}

impl WorkflowEffect {
	/// Short name used in log fields.
	pub fn name(&self) -> &'static str {
		match self {
			WorkflowEffect::Notify(_) => "notify",
			WorkflowEffect::NavigateToChat { .. } => "navigate_to_chat",
			WorkflowEffect::PromptRating { .. } => "prompt_rating",
			WorkflowEffect::RefreshLoyalty { .. } => "refresh_loyalty",
			WorkflowEffect::PaymentConfirmed { .. } => "payment_confirmed",
			WorkflowEffect::OrderUpdated { .. } => "order_updated",
			WorkflowEffect::OrderRemoved { .. } => "order_removed",
			WorkflowEffect::RiderLocation { .. } => "rider_location",
			WorkflowEffect::ChatActivity { .. } => "chat_activity",
		}
	}
}

/// A notification routed to observers of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	/// Role whose observers should see the notification.
	pub audience: Role,
	pub level: NotificationLevel,
	pub title: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub order_id: Option<String>,
	/// Follow-up the observer can take directly from the notification.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub action: Option<NotificationAction>,
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
	Info,
	Success,
	Warning,
	Error,
}

/// Action attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationAction {
	/// Assign a rider to an order that found none.
	AssignRider { order_id: String },
	/// Retry a payment that could not be confirmed.
	RetryPayment { order_id: String },
	/// Open an order's details.
	ViewOrder { order_id: String },
}
