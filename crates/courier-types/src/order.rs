//! Order lifecycle types.
//!
//! This module defines the order record as the backend reports it, the
//! lifecycle statuses, and the payloads used to place and pay for orders.
//! The backend is the source of truth; the client only ever stores what an
//! authoritative fetch returned.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Identity, Role};

/// An order as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	/// Unique identifier for this order.
	#[serde(alias = "orderId")]
	pub id: String,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Customer who placed the order.
	pub customer_id: String,
	/// Restaurant preparing the order.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub restaurant_id: Option<String>,
	/// Assigned rider, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rider: Option<RiderRef>,
	/// Ordered line items.
	#[serde(default)]
	pub items: Vec<OrderItem>,
	/// Total charged to the customer.
	pub total_price: Decimal,
	/// Free-form delivery address.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivery_address: Option<String>,
	/// How the customer pays.
	#[serde(default)]
	pub payment_method: PaymentMethod,
	/// Settlement state of the payment.
	#[serde(default)]
	pub payment_status: PaymentStatus,
	/// Rating left by the customer after delivery.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_rating: Option<u8>,
	/// Set when no rider was found in time and support must assign one.
	#[serde(default)]
	pub requires_manual_assignment: bool,
	/// Customer notes for the restaurant or rider.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	/// Creation time in milliseconds since the UNIX epoch.
	pub created_at: u64,
	/// Last backend mutation in milliseconds since the UNIX epoch.
	#[serde(default)]
	pub updated_at: u64,
}

impl Order {
	/// Whether a rider is attached to the order.
	pub fn has_rider(&self) -> bool {
		self.rider.is_some()
	}

	/// Ready for pickup with nobody to pick it up.
	pub fn awaiting_rider(&self) -> bool {
		self.status == OrderStatus::Ready && self.rider.is_none()
	}

	/// Whether the order still belongs in the active set.
	pub fn is_active(&self) -> bool {
		self.status.is_active()
	}

	/// Whether the customer already rated the order.
	pub fn is_rated(&self) -> bool {
		self.customer_rating.is_some()
	}
}

/// Reference to the rider carrying an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderRef {
	/// Backend identifier of the rider.
	#[serde(alias = "riderId")]
	pub id: String,
	/// Display name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Contact number.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone: Option<String>,
}

impl RiderRef {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: None,
			phone: None,
		}
	}
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
	/// Menu item identifier.
	pub menu_item_id: String,
	/// Display name of the item.
	pub name: String,
	/// Number of units ordered.
	pub quantity: u32,
	/// Price per unit.
	pub unit_price: Decimal,
}

impl OrderItem {
	/// Line total.
	pub fn subtotal(&self) -> Decimal {
		self.unit_price * Decimal::from(self.quantity)
	}
}

/// Lifecycle status of an order.
///
/// The happy path runs `pending → accepted → preparing → ready → on_the_way →
/// awaiting_confirmation → delivered`; `cancelled` is reachable from every
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Placed, waiting for the restaurant.
	Pending,
	/// Accepted by the restaurant.
	Accepted,
	/// Being prepared.
	Preparing,
	/// Ready for pickup.
	Ready,
	/// Picked up and on its way.
	OnTheWay,
	/// Handed over, waiting for the customer to confirm.
	AwaitingConfirmation,
	/// Delivered and confirmed.
	Delivered,
	/// Cancelled before delivery.
	Cancelled,
}

impl OrderStatus {
	/// Every status in lifecycle order.
	pub const ALL: [OrderStatus; 8] = [
		OrderStatus::Pending,
		OrderStatus::Accepted,
		OrderStatus::Preparing,
		OrderStatus::Ready,
		OrderStatus::OnTheWay,
		OrderStatus::AwaitingConfirmation,
		OrderStatus::Delivered,
		OrderStatus::Cancelled,
	];

	/// Statuses that keep an order in the active set.
	pub const ACTIVE: [OrderStatus; 6] = [
		OrderStatus::Pending,
		OrderStatus::Accepted,
		OrderStatus::Preparing,
		OrderStatus::Ready,
		OrderStatus::OnTheWay,
		OrderStatus::AwaitingConfirmation,
	];

	/// Returns the wire name of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Accepted => "accepted",
			OrderStatus::Preparing => "preparing",
			OrderStatus::Ready => "ready",
			OrderStatus::OnTheWay => "on_the_way",
			OrderStatus::AwaitingConfirmation => "awaiting_confirmation",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	pub fn is_active(&self) -> bool {
		Self::ACTIVE.contains(self)
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::ALL
			.iter()
			.find(|status| status.as_str() == s)
			.copied()
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
	/// Paid to the rider on delivery.
	#[default]
	Cash,
	/// Card payment through the payment provider.
	Card,
	/// Mobile-money payment through the payment provider.
	MobileMoney,
}

impl PaymentMethod {
	/// Whether placement must go through payment initiation.
	pub fn requires_online_payment(&self) -> bool {
		!matches!(self, PaymentMethod::Cash)
	}
}

/// Settlement state of an order's payment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	#[default]
	Pending,
	Paid,
	Failed,
}

/// Order as entered by the customer, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
	pub restaurant_id: String,
	pub items: Vec<OrderItem>,
	pub delivery_address: String,
	#[serde(default)]
	pub payment_method: PaymentMethod,
	#[serde(default)]
	pub delivery_fee: Decimal,
	#[serde(default)]
	pub notes: Option<String>,
}

/// Normalized creation payload sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	pub customer_id: String,
	pub restaurant_id: String,
	pub items: Vec<OrderItem>,
	pub delivery_address: String,
	pub payment_method: PaymentMethod,
	pub total_price: Decimal,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
}

/// Out-of-band payment started for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
	/// Order being paid for.
	pub order_id: String,
	/// Provider reference used for verification.
	pub reference: String,
	/// Where the customer completes the payment, if the provider uses a redirect.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization_url: Option<String>,
}

/// Outcome of one payment verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
	pub reference: String,
	pub state: PaymentState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// Provider-side state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
	/// The customer has not completed the payment yet.
	Pending,
	/// Funds captured.
	Success,
	/// Definitively declined or abandoned.
	Failed,
}

/// Loyalty standing of a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltySummary {
	pub customer_id: String,
	pub points: u64,
	#[serde(default)]
	pub tier: Option<String>,
}

/// Filter for listing orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customer_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rider_id: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub statuses: Vec<OrderStatus>,
}

impl OrderFilter {
	/// Orders a user should see in their active set.
	///
	/// Customers see their own orders, riders their assignments, and support
	/// every order waiting for a rider.
	pub fn for_identity(identity: &Identity) -> Self {
		match identity.role {
			Role::Customer => Self {
				customer_id: Some(identity.user_id.clone()),
				rider_id: None,
				statuses: OrderStatus::ACTIVE.to_vec(),
			},
			Role::Rider => Self {
				customer_id: None,
				rider_id: Some(identity.user_id.clone()),
				statuses: OrderStatus::ACTIVE.to_vec(),
			},
			Role::Support => Self {
				customer_id: None,
				rider_id: None,
				statuses: vec![OrderStatus::Ready],
			},
		}
	}

	/// Whether an order satisfies the filter.
	pub fn matches(&self, order: &Order) -> bool {
		if let Some(customer_id) = &self.customer_id {
			if &order.customer_id != customer_id {
				return false;
			}
		}
		if let Some(rider_id) = &self.rider_id {
			if order.rider.as_ref().map(|r| &r.id) != Some(rider_id) {
				return false;
			}
		}
		self.statuses.is_empty() || self.statuses.contains(&order.status)
	}
}
