//! User-initiated order operations.
//!
//! Placing, rating and assigning orders all follow the same shape: validate
//! locally, call the backend under the order's lock, then hand the returned
//! order to the status handler so local state and side effects follow the
//! backend's answer.

use super::status::{notify, StatusHandler, StatusHint};
use super::PlacedOrder;
use crate::engine::context::WorkflowContext;
use crate::error::WorkflowError;
use courier_types::{
	format_price, truncate_id, CreateOrderRequest, NewOrder, NotificationAction,
	NotificationLevel, Order, OrderItem, Role, WorkflowEffect,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

/// Keeps `is_placing_order` raised while a placement is in flight.
struct PlacingGuard<'a> {
	ctx: &'a WorkflowContext,
}

impl<'a> PlacingGuard<'a> {
	fn enter(ctx: &'a WorkflowContext) -> Self {
		let mut state = ctx.state.lock();
		state.placing += 1;
		ctx.publish_snapshot(&state);
		Self { ctx }
	}
}

impl Drop for PlacingGuard<'_> {
	fn drop(&mut self) {
		let mut state = self.ctx.state.lock();
		state.placing = state.placing.saturating_sub(1);
		self.ctx.publish_snapshot(&state);
	}
}

/// Handler for orders the signed-in user acts on.
pub struct OrderHandler {
	ctx: Arc<WorkflowContext>,
	status: StatusHandler,
}

impl OrderHandler {
	pub fn new(status: StatusHandler) -> Self {
		Self {
			ctx: status.context().clone(),
			status,
		}
	}

	/// Places an order for the signed-in customer.
	///
	/// Online payments are initiated right after creation. If that fails the
	/// order is kept and the customer is offered a retry.
	pub async fn place_order(&self, new_order: NewOrder) -> Result<PlacedOrder, WorkflowError> {
		let identity = self.ctx.require_identity()?;
		let request = normalize(new_order, &identity.user_id)?;
		let _placing = PlacingGuard::enter(&self.ctx);

		let order = self.ctx.api.create_order(&request).await?;
		tracing::info!(
			order_id = %truncate_id(&order.id),
			total = %format_price(order.total_price),
			payment_method = ?order.payment_method,
			"Order placed"
		);

		let _lock = self.ctx.locks.lock(&order.id).await;
		let order = self.status.apply(order, StatusHint::default());
		if !order.payment_method.requires_online_payment() {
			return Ok(PlacedOrder {
				order,
				payment: None,
			});
		}

		match self.ctx.api.initiate_payment(&order.id).await {
			Ok(session) => Ok(PlacedOrder {
				order,
				payment: Some(session),
			}),
			Err(e) => {
				let error = WorkflowError::from(e);
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %error,
					"Payment could not be started"
				);
				self.ctx.publish(notify(
					Role::Customer,
					NotificationLevel::Error,
					"Payment not started",
					error.user_message(),
					&order.id,
					Some(NotificationAction::RetryPayment {
						order_id: order.id.clone(),
					}),
				));
				Ok(PlacedOrder {
					order,
					payment: None,
				})
			},
		}
	}

	/// Rates a delivered order and retires it from the active set.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn rate_order(
		&self,
		order_id: &str,
		rating: u8,
		comment: Option<String>,
	) -> Result<Order, WorkflowError> {
		if !(1..=5).contains(&rating) {
			return Err(WorkflowError::Validation(
				"Rating must be between 1 and 5".into(),
			));
		}
		self.ctx.require_identity()?;
		let comment = comment
			.map(|comment| comment.trim().to_string())
			.filter(|comment| !comment.is_empty());

		let lock = self.ctx.locks.lock(order_id).await;
		let order = self
			.ctx
			.api
			.submit_rating(order_id, rating, comment.as_deref())
			.await?;

		let (released, removed) = {
			let mut state = self.ctx.state.lock();
			state.timers.disarm(order_id);
			let removed = state.orders.remove(order_id).is_some();
			state.retire(&order);
			let released: Vec<_> = state
				.order_subscriptions
				.remove(order_id)
				.into_iter()
				.chain(state.rider_tracking.remove(order_id))
				.collect();
			self.ctx.publish_snapshot(&state);
			(released, removed)
		};
		drop(released);
		self.status.queues().remove(order_id);
		drop(lock);
		self.ctx.locks.release(order_id);

		tracing::info!(rating, "Order rated");
		if removed {
			self.ctx.publish(WorkflowEffect::OrderRemoved {
				order_id: order_id.to_string(),
				status: order.status,
			});
		}
		Ok(order)
	}

	/// Assigns the signed-in rider to an order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn accept_order_as_rider(&self, order_id: &str) -> Result<Order, WorkflowError> {
		let identity = self.ctx.require_identity()?;
		if identity.role != Role::Rider {
			return Err(WorkflowError::BusinessRule(
				"Only riders can accept deliveries".into(),
			));
		}
		self.assign(order_id, &identity.user_id).await
	}

	/// Assigns a rider on behalf of support, typically after an escalation.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn manually_assign_rider(
		&self,
		order_id: &str,
		rider_id: &str,
	) -> Result<Order, WorkflowError> {
		let identity = self.ctx.require_identity()?;
		if identity.role != Role::Support {
			return Err(WorkflowError::BusinessRule(
				"Only support can assign riders".into(),
			));
		}
		let rider_id = rider_id.trim();
		if rider_id.is_empty() {
			return Err(WorkflowError::Validation("rider id is required".into()));
		}
		self.assign(order_id, rider_id).await
	}

	async fn assign(&self, order_id: &str, rider_id: &str) -> Result<Order, WorkflowError> {
		let _lock = self.ctx.locks.lock(order_id).await;
		let order = self.ctx.api.assign_rider(order_id, rider_id).await?;
		tracing::info!(rider_id = %rider_id, "Rider assigned");
		Ok(self.status.apply(order, StatusHint::default()))
	}
}

/// Validates a new order and computes its total.
fn normalize(new_order: NewOrder, customer_id: &str) -> Result<CreateOrderRequest, WorkflowError> {
	let restaurant_id = new_order.restaurant_id.trim().to_string();
	if restaurant_id.is_empty() {
		return Err(WorkflowError::Validation("restaurant is required".into()));
	}
	if new_order.items.is_empty() {
		return Err(WorkflowError::Validation(
			"An order needs at least one item".into(),
		));
	}
	if let Some(item) = new_order.items.iter().find(|item| item.quantity == 0) {
		return Err(WorkflowError::Validation(format!(
			"Quantity of {} must be at least 1",
			item.name
		)));
	}
	if new_order
		.items
		.iter()
		.any(|item| item.unit_price < Decimal::ZERO)
		|| new_order.delivery_fee < Decimal::ZERO
	{
		return Err(WorkflowError::Validation("prices cannot be negative".into()));
	}
	let delivery_address = new_order.delivery_address.trim().to_string();
	if delivery_address.is_empty() {
		return Err(WorkflowError::Validation(
			"delivery address is required".into(),
		));
	}

	let subtotal: Decimal = new_order.items.iter().map(OrderItem::subtotal).sum();
	Ok(CreateOrderRequest {
		customer_id: customer_id.to_string(),
		restaurant_id,
		items: new_order.items,
		delivery_address,
		payment_method: new_order.payment_method,
		total_price: (subtotal + new_order.delivery_fee).round_dp(2),
		notes: new_order
			.notes
			.map(|notes| notes.trim().to_string())
			.filter(|notes| !notes.is_empty()),
	})
}
