//! In-memory implementation of the backend order API.
//!
//! Enforces the same business rules as the real backend so the coordinator
//! can run end to end without a network. Clones share state, which lets a
//! test keep a handle for inspecting and mutating the backend while the
//! coordinator owns another.

use crate::{ApiError, OrderApiInterface};
use async_trait::async_trait;
use courier_types::{
	current_timestamp_millis, ConfigSchema, CreateOrderRequest, Field, FieldType, LoyaltySummary,
	Order, OrderFilter, OrderStatus, PaymentSession, PaymentState, PaymentStatus,
	PaymentVerification, RiderRef, Schema, ValidationError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Points credited to a customer per delivered order.
const LOYALTY_POINTS_PER_ORDER: u64 = 10;

#[derive(Debug, Clone)]
struct PaymentRecord {
	order_id: String,
	remaining_pending: u32,
	outcome: PaymentState,
}

#[derive(Debug, Default)]
struct MemoryBackend {
	orders: HashMap<String, Order>,
	payments: HashMap<String, PaymentRecord>,
	loyalty: HashMap<String, u64>,
	calls: HashMap<&'static str, usize>,
	last_version: u64,
	offline: bool,
	failing: HashSet<String>,
	pending_polls: u32,
	decline_payments: bool,
}

impl MemoryBackend {
	/// Strictly increasing mutation timestamp.
	fn next_version(&mut self) -> u64 {
		self.last_version = current_timestamp_millis().max(self.last_version + 1);
		self.last_version
	}

	fn enter(&mut self, operation: &'static str) -> Result<(), ApiError> {
		*self.calls.entry(operation).or_default() += 1;
		if self.offline || self.failing.contains(operation) {
			return Err(ApiError::Unavailable("backend offline".into()));
		}
		Ok(())
	}

	fn order_mut(&mut self, order_id: &str) -> Result<&mut Order, ApiError> {
		self.orders
			.get_mut(order_id)
			.ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_id)))
	}
}

fn rejected(status: u16, message: impl Into<String>) -> ApiError {
	ApiError::Rejected {
		status,
		message: message.into(),
	}
}

/// Shared in-memory backend.
#[derive(Clone, Default)]
pub struct MemoryOrderApi {
	inner: Arc<RwLock<MemoryBackend>>,
}

impl MemoryOrderApi {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores an order as-is, stamping `updated_at` when it is unset.
	pub async fn insert(&self, mut order: Order) {
		let mut backend = self.inner.write().await;
		if order.updated_at == 0 {
			order.updated_at = backend.next_version();
		} else {
			backend.last_version = backend.last_version.max(order.updated_at);
		}
		backend.orders.insert(order.id.clone(), order);
	}

	/// Returns the stored state of an order.
	pub async fn order(&self, order_id: &str) -> Option<Order> {
		self.inner.read().await.orders.get(order_id).cloned()
	}

	/// Mutates an order out of band, as another client would.
	pub async fn update<F>(&self, order_id: &str, f: F) -> Option<Order>
	where
		F: FnOnce(&mut Order),
	{
		let mut backend = self.inner.write().await;
		let version = backend.next_version();
		let order = backend.orders.get_mut(order_id)?;
		f(order);
		order.updated_at = version;
		Some(order.clone())
	}

	/// Makes every call fail with `Unavailable` until cleared.
	pub async fn set_offline(&self, offline: bool) {
		self.inner.write().await.offline = offline;
	}

	/// Makes one operation fail with `Unavailable` until cleared.
	pub async fn fail_operation(&self, operation: &str, fail: bool) {
		let mut backend = self.inner.write().await;
		if fail {
			backend.failing.insert(operation.to_string());
		} else {
			backend.failing.remove(operation);
		}
	}

	/// Number of verification polls answered `pending` before a payment settles.
	pub async fn set_pending_polls(&self, polls: u32) {
		self.inner.write().await.pending_polls = polls;
	}

	/// Makes newly initiated payments fail verification.
	pub async fn decline_payments(&self, decline: bool) {
		self.inner.write().await.decline_payments = decline;
	}

	/// How many times an operation was called.
	pub async fn call_count(&self, operation: &str) -> usize {
		self.inner
			.read()
			.await
			.calls
			.get(operation)
			.copied()
			.unwrap_or(0)
	}
}

#[async_trait]
impl OrderApiInterface for MemoryOrderApi {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryOrderApiSchema)
	}

	async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("fetch_order")?;
		backend.order_mut(order_id).map(|order| order.clone())
	}

	async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("list_orders")?;
		let mut orders: Vec<Order> = backend
			.orders
			.values()
			.filter(|order| filter.matches(order))
			.cloned()
			.collect();
		orders.sort_by_key(|order| order.created_at);
		Ok(orders)
	}

	async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("create_order")?;
		if request.items.is_empty() {
			return Err(rejected(422, "An order needs at least one item"));
		}

		let version = backend.next_version();
		let order = Order {
			id: format!("ord_{}", uuid::Uuid::new_v4().simple()),
			status: OrderStatus::Pending,
			customer_id: request.customer_id.clone(),
			restaurant_id: Some(request.restaurant_id.clone()),
			rider: None,
			items: request.items.clone(),
			total_price: request.total_price,
			delivery_address: Some(request.delivery_address.clone()),
			payment_method: request.payment_method,
			payment_status: PaymentStatus::Pending,
			customer_rating: None,
			requires_manual_assignment: false,
			notes: request.notes.clone(),
			created_at: version,
			updated_at: version,
		};
		backend.orders.insert(order.id.clone(), order.clone());
		Ok(order)
	}

	async fn update_order_status(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("update_order_status")?;
		let version = backend.next_version();
		let order = backend.order_mut(order_id)?;
		if order.status.is_terminal() {
			return Err(rejected(409, format!("Order is already {}", order.status)));
		}

		order.status = status;
		order.updated_at = version;
		if status != OrderStatus::Ready {
			order.requires_manual_assignment = false;
		}
		let order = order.clone();

		if status == OrderStatus::Delivered {
			*backend.loyalty.entry(order.customer_id.clone()).or_default() +=
				LOYALTY_POINTS_PER_ORDER;
		}
		Ok(order)
	}

	async fn assign_rider(&self, order_id: &str, rider_id: &str) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("assign_rider")?;
		let version = backend.next_version();
		let order = backend.order_mut(order_id)?;
		if order.status.is_terminal() {
			return Err(rejected(409, format!("Order is already {}", order.status)));
		}
		match &order.rider {
			Some(rider) if rider.id != rider_id => {
				return Err(rejected(409, "Order already has a rider"));
			},
			_ => {},
		}

		order.rider = Some(RiderRef::new(rider_id));
		order.requires_manual_assignment = false;
		order.updated_at = version;
		Ok(order.clone())
	}

	async fn flag_manual_assignment(&self, order_id: &str) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("flag_manual_assignment")?;
		let version = backend.next_version();
		let order = backend.order_mut(order_id)?;
		if !order.awaiting_rider() {
			return Err(rejected(409, "Order no longer needs a rider"));
		}

		order.requires_manual_assignment = true;
		order.updated_at = version;
		Ok(order.clone())
	}

	async fn initiate_payment(&self, order_id: &str) -> Result<PaymentSession, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("initiate_payment")?;
		let order = backend.order_mut(order_id)?;
		if !order.payment_method.requires_online_payment() {
			return Err(rejected(400, "Cash orders are paid on delivery"));
		}
		if order.payment_status == PaymentStatus::Paid {
			return Err(rejected(409, "Order is already paid"));
		}

		let reference = format!("pay_{}", uuid::Uuid::new_v4().simple());
		let record = PaymentRecord {
			order_id: order_id.to_string(),
			remaining_pending: backend.pending_polls,
			outcome: if backend.decline_payments {
				PaymentState::Failed
			} else {
				PaymentState::Success
			},
		};
		backend.payments.insert(reference.clone(), record);

		Ok(PaymentSession {
			order_id: order_id.to_string(),
			authorization_url: Some(format!("https://pay.example.com/{}", reference)),
			reference,
		})
	}

	async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("verify_payment")?;
		let record = backend
			.payments
			.get_mut(reference)
			.ok_or_else(|| ApiError::NotFound(format!("Payment {} not found", reference)))?;

		if record.remaining_pending > 0 {
			record.remaining_pending -= 1;
			return Ok(PaymentVerification {
				reference: reference.to_string(),
				state: PaymentState::Pending,
				message: None,
			});
		}

		let record = record.clone();
		let version = backend.next_version();
		let order = backend.order_mut(&record.order_id)?;
		order.payment_status = match record.outcome {
			PaymentState::Success => PaymentStatus::Paid,
			_ => PaymentStatus::Failed,
		};
		order.updated_at = version;

		Ok(PaymentVerification {
			reference: reference.to_string(),
			state: record.outcome,
			message: (record.outcome == PaymentState::Failed)
				.then(|| "Payment declined".to_string()),
		})
	}

	async fn submit_rating(
		&self,
		order_id: &str,
		rating: u8,
		_comment: Option<&str>,
	) -> Result<Order, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("submit_rating")?;
		if !(1..=5).contains(&rating) {
			return Err(rejected(400, "Rating must be between 1 and 5"));
		}
		let version = backend.next_version();
		let order = backend.order_mut(order_id)?;
		if order.status != OrderStatus::Delivered {
			return Err(rejected(422, "Only delivered orders can be rated"));
		}
		if order.is_rated() {
			return Err(rejected(409, "Order has already been rated"));
		}

		order.customer_rating = Some(rating);
		order.updated_at = version;
		Ok(order.clone())
	}

	async fn loyalty_summary(&self, customer_id: &str) -> Result<LoyaltySummary, ApiError> {
		let mut backend = self.inner.write().await;
		backend.enter("loyalty_summary")?;
		let points = backend.loyalty.get(customer_id).copied().unwrap_or(0);
		Ok(LoyaltySummary {
			customer_id: customer_id.to_string(),
			points,
			tier: Some(if points >= 100 { "gold" } else { "standard" }.to_string()),
		})
	}
}

/// Configuration schema for MemoryOrderApi.
pub struct MemoryOrderApiSchema;

impl ConfigSchema for MemoryOrderApiSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"pending_polls",
				FieldType::Integer {
					min: Some(0),
					max: Some(1000),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create an in-memory backend.
///
/// Optional configuration parameters:
/// - `pending_polls`: verification polls answered `pending` before a payment settles (default: 0)
pub fn create_order_api(config: &toml::Value) -> Result<Box<dyn OrderApiInterface>, ApiError> {
	MemoryOrderApiSchema
		.validate(config)
		.map_err(|e| ApiError::Configuration(format!("Invalid configuration: {}", e)))?;

	let pending_polls = config
		.get("pending_polls")
		.and_then(|v| v.as_integer())
		.unwrap_or(0) as u32;

	let backend = MemoryBackend {
		pending_polls,
		..Default::default()
	};
	Ok(Box::new(MemoryOrderApi {
		inner: Arc::new(RwLock::new(backend)),
	}))
}

/// Registry for the in-memory backend implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::OrderApiFactory;

	fn factory() -> Self::Factory {
		create_order_api
	}
}

impl crate::OrderApiRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use courier_types::{OrderItem, PaymentMethod};
	use rust_decimal::Decimal;

	fn request(payment_method: PaymentMethod) -> CreateOrderRequest {
		CreateOrderRequest {
			customer_id: "cust-1".into(),
			restaurant_id: "rest-1".into(),
			items: vec![OrderItem {
				menu_item_id: "m-1".into(),
				name: "Waakye".into(),
				quantity: 1,
				unit_price: Decimal::new(1500, 2),
			}],
			delivery_address: "12 Ring Road".into(),
			payment_method,
			total_price: Decimal::new(1500, 2),
			notes: None,
		}
	}

	#[tokio::test]
	async fn test_lifecycle_rules() {
		let api = MemoryOrderApi::new();
		let order = api.create_order(&request(PaymentMethod::Cash)).await.unwrap();
		assert_eq!(order.status, OrderStatus::Pending);

		let ready = api
			.update_order_status(&order.id, OrderStatus::Ready)
			.await
			.unwrap();
		assert!(ready.updated_at > order.updated_at);

		let flagged = api.flag_manual_assignment(&order.id).await.unwrap();
		assert!(flagged.requires_manual_assignment);

		let assigned = api.assign_rider(&order.id, "rider-1").await.unwrap();
		assert!(!assigned.requires_manual_assignment);
		assert!(matches!(
			api.assign_rider(&order.id, "rider-2").await,
			Err(ApiError::Rejected { status: 409, .. })
		));
		assert!(matches!(
			api.flag_manual_assignment(&order.id).await,
			Err(ApiError::Rejected { .. })
		));

		assert!(matches!(
			api.submit_rating(&order.id, 5, None).await,
			Err(ApiError::Rejected { status: 422, .. })
		));
		api.update_order_status(&order.id, OrderStatus::Delivered)
			.await
			.unwrap();
		assert!(matches!(
			api.submit_rating(&order.id, 6, None).await,
			Err(ApiError::Rejected { status: 400, .. })
		));
		let rated = api.submit_rating(&order.id, 4, Some("hot")).await.unwrap();
		assert_eq!(rated.customer_rating, Some(4));

		let loyalty = api.loyalty_summary("cust-1").await.unwrap();
		assert_eq!(loyalty.points, LOYALTY_POINTS_PER_ORDER);
	}

	#[tokio::test]
	async fn test_payment_settles_after_pending_polls() {
		let api = MemoryOrderApi::new();
		api.set_pending_polls(2).await;
		let order = api.create_order(&request(PaymentMethod::Card)).await.unwrap();
		let session = api.initiate_payment(&order.id).await.unwrap();

		for _ in 0..2 {
			let verification = api.verify_payment(&session.reference).await.unwrap();
			assert_eq!(verification.state, PaymentState::Pending);
		}
		let verification = api.verify_payment(&session.reference).await.unwrap();
		assert_eq!(verification.state, PaymentState::Success);
		assert_eq!(
			api.order(&order.id).await.unwrap().payment_status,
			PaymentStatus::Paid
		);
	}

	#[tokio::test]
	async fn test_cash_orders_need_no_payment() {
		let api = MemoryOrderApi::new();
		let order = api.create_order(&request(PaymentMethod::Cash)).await.unwrap();
		assert!(matches!(
			api.initiate_payment(&order.id).await,
			Err(ApiError::Rejected { status: 400, .. })
		));
	}

	#[tokio::test]
	async fn test_offline_backend_is_transient() {
		let api = MemoryOrderApi::new();
		api.set_offline(true).await;
		let err = api.fetch_order("ord-1").await.unwrap_err();
		assert!(err.is_transient());
		assert_eq!(api.call_count("fetch_order").await, 1);
	}
}
