//! Payment handler.
//!
//! Starts out-of-band payments and runs one verification monitor per order.

use super::status::StatusHandler;
use crate::engine::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::monitoring::PaymentMonitor;
use courier_types::{truncate_id, PaymentSession};
use std::sync::Arc;
use tracing::instrument;

pub struct PaymentHandler {
	ctx: Arc<WorkflowContext>,
	status: StatusHandler,
}

impl PaymentHandler {
	pub fn new(status: StatusHandler) -> Self {
		Self {
			ctx: status.context().clone(),
			status,
		}
	}

	/// Starts a new payment for an order, e.g. after a failed attempt.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn start_payment(&self, order_id: &str) -> Result<PaymentSession, WorkflowError> {
		self.ctx.require_identity()?;
		let session = self.ctx.api.initiate_payment(order_id).await?;
		tracing::info!("Payment started");
		Ok(session)
	}

	/// Starts polling verification of a payment in the background.
	///
	/// Returns once the monitor is running. Calling it again while a monitor
	/// for the order is running does nothing.
	pub fn process_payment(&self, order_id: &str, reference: &str) -> Result<(), WorkflowError> {
		self.ctx.require_identity()?;
		let reference = reference.trim();
		if reference.is_empty() {
			return Err(WorkflowError::Validation(
				"payment reference is required".into(),
			));
		}

		let mut state = self.ctx.state.lock();
		if !state.orders.contains_key(order_id) {
			return Err(WorkflowError::NotFound(format!(
				"Order {} is not active",
				order_id
			)));
		}
		if state.payments.contains_key(order_id) {
			tracing::debug!(order_id = %truncate_id(order_id), "Payment already being verified");
			return Ok(());
		}

		let monitor = PaymentMonitor::new(
			self.status.clone(),
			self.ctx.config.payment_poll_interval(),
			self.ctx.config.payment_poll_max_attempts,
		);
		let ctx = self.ctx.clone();
		let id = order_id.to_string();
		let reference = reference.to_string();
		let handle = tokio::spawn(async move {
			let outcome = monitor.monitor(id.clone(), reference).await;
			tracing::debug!(order_id = %truncate_id(&id), outcome = ?outcome, "Payment monitor finished");
			let mut state = ctx.state.lock();
			state.payments.remove(&id);
			ctx.publish_snapshot(&state);
		})
		.abort_handle();

		state.payments.insert(order_id.to_string(), handle);
		self.ctx.publish_snapshot(&state);
		tracing::info!(order_id = %truncate_id(order_id), "Verifying payment");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::error::WorkflowError;
	use crate::test_support::{harness, new_order, Harness};
	use courier_types::{
		NotificationAction, NotificationLevel, OrderStatus, PaymentMethod, PaymentStatus, Role,
		WorkflowEffect,
	};
	use std::time::Duration;

	async fn placed_card_order(harness: &Harness) -> (String, String) {
		harness.engine.initialize().await.unwrap();
		let placed = harness
			.engine
			.place_order(new_order(PaymentMethod::Card))
			.await
			.unwrap();
		let session = placed.payment.unwrap();
		(placed.order.id, session.reference)
	}

	fn levels(effects: &[WorkflowEffect]) -> Vec<NotificationLevel> {
		effects
			.iter()
			.filter_map(|effect| match effect {
				WorkflowEffect::Notify(n) => Some(n.level),
				_ => None,
			})
			.collect()
	}

	#[tokio::test(start_paused = true)]
	async fn test_payment_success_advances_order() {
		let mut harness = harness(Role::Customer, "cust-1").await;
		harness.api.set_pending_polls(2).await;
		let (order_id, reference) = placed_card_order(&harness).await;

		harness.engine.process_payment(&order_id, &reference).unwrap();
		assert!(harness.engine.snapshot().is_processing_payment);
		// A second call while polling is a no-op
		harness.engine.process_payment(&order_id, &reference).unwrap();

		tokio::time::sleep(Duration::from_secs(16)).await;
		harness.settle().await;

		assert_eq!(harness.api.call_count("verify_payment").await, 3);
		let stored = harness.api.order(&order_id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Accepted);
		assert_eq!(stored.payment_status, PaymentStatus::Paid);

		let snapshot = harness.engine.snapshot();
		assert!(!snapshot.is_processing_payment);
		assert_eq!(snapshot.active_orders[0].status, OrderStatus::Accepted);

		let effects = harness.drain_effects();
		assert!(effects.contains(&WorkflowEffect::PaymentConfirmed {
			order_id: order_id.clone()
		}));
		assert_eq!(levels(&effects), vec![NotificationLevel::Success]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_declined_payment_stops_polling() {
		let mut harness = harness(Role::Customer, "cust-1").await;
		harness.api.decline_payments(true).await;
		let (order_id, reference) = placed_card_order(&harness).await;

		harness.engine.process_payment(&order_id, &reference).unwrap();
		tokio::time::sleep(Duration::from_secs(60)).await;
		harness.settle().await;

		assert_eq!(harness.api.call_count("verify_payment").await, 1);
		let effects = harness.drain_effects();
		let notice = effects
			.iter()
			.find_map(|effect| match effect {
				WorkflowEffect::Notify(n) => Some(n),
				_ => None,
			})
			.unwrap();
		assert_eq!(notice.level, NotificationLevel::Error);
		assert_eq!(
			notice.action,
			Some(NotificationAction::RetryPayment { order_id })
		);
		assert!(!harness.engine.snapshot().is_processing_payment);
	}

	#[tokio::test(start_paused = true)]
	async fn test_polling_gives_up_after_max_attempts() {
		let mut harness = harness(Role::Customer, "cust-1").await;
		harness.api.set_pending_polls(1000).await;
		let (order_id, reference) = placed_card_order(&harness).await;

		harness.engine.process_payment(&order_id, &reference).unwrap();
		tokio::time::sleep(Duration::from_secs(5 * 60 + 10)).await;
		harness.settle().await;

		assert_eq!(harness.api.call_count("verify_payment").await, 60);
		assert_eq!(levels(&harness.drain_effects()), vec![NotificationLevel::Warning]);
		assert_eq!(
			harness.api.order(&order_id).await.unwrap().status,
			OrderStatus::Pending
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unknown_order_is_rejected() {
		let harness = harness(Role::Customer, "cust-1").await;
		let result = harness.engine.process_payment("missing", "pay_1");
		assert!(matches!(result, Err(WorkflowError::NotFound(_))));
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_stops_polling() {
		let harness = harness(Role::Customer, "cust-1").await;
		harness.api.set_pending_polls(1000).await;
		let (order_id, reference) = placed_card_order(&harness).await;

		harness.engine.process_payment(&order_id, &reference).unwrap();
		tokio::time::sleep(Duration::from_secs(12)).await;
		harness.engine.shutdown().await.unwrap();
		let polls = harness.api.call_count("verify_payment").await;

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert_eq!(harness.api.call_count("verify_payment").await, polls);
		assert!(!harness.engine.snapshot().is_processing_payment);
	}
}
