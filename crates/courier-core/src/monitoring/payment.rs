//! Payment verification polling.
//!
//! Out-of-band payments settle whenever the customer finishes with the
//! provider, so the monitor polls verification at a fixed interval until the
//! payment succeeds, is declined, or the attempts run out.

use crate::engine::context::WorkflowContext;
use crate::handlers::status::{notify, StatusHandler, StatusHint};
use courier_types::{
	truncate_id, NotificationAction, NotificationLevel, OrderStatus, PaymentState, Role,
	WorkflowEffect,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// How a monitored payment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
	Confirmed,
	Declined,
	TimedOut,
}

pub struct PaymentMonitor {
	ctx: Arc<WorkflowContext>,
	status: StatusHandler,
	poll_interval: Duration,
	max_attempts: u32,
}

impl PaymentMonitor {
	pub fn new(status: StatusHandler, poll_interval: Duration, max_attempts: u32) -> Self {
		Self {
			ctx: status.context().clone(),
			status,
			poll_interval,
			max_attempts,
		}
	}

	/// Polls a payment until it settles or the attempts run out.
	///
	/// Verification errors count as a pending answer.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order_id)))]
	pub async fn monitor(&self, order_id: String, reference: String) -> PaymentOutcome {
		for attempt in 1..=self.max_attempts {
			tokio::time::sleep(self.poll_interval).await;

			match self.ctx.api.verify_payment(&reference).await {
				Ok(verification) => match verification.state {
					PaymentState::Success => {
						self.confirm(&order_id).await;
						return PaymentOutcome::Confirmed;
					},
					PaymentState::Failed => {
						let message = verification
							.message
							.unwrap_or_else(|| "Your payment was declined".to_string());
						tracing::warn!(attempt, reason = %message, "Payment declined");
						self.ctx.publish(notify(
							Role::Customer,
							NotificationLevel::Error,
							"Payment failed",
							message,
							&order_id,
							Some(NotificationAction::RetryPayment {
								order_id: order_id.clone(),
							}),
						));
						return PaymentOutcome::Declined;
					},
					PaymentState::Pending => {
						tracing::debug!(attempt, "Payment still pending");
					},
				},
				Err(e) => {
					tracing::debug!(attempt, error = %e, "Checking payment status");
				},
			}
		}

		tracing::warn!(
			attempts = self.max_attempts,
			"Payment not confirmed before polling stopped"
		);
		self.ctx.publish(notify(
			Role::Customer,
			NotificationLevel::Warning,
			"Payment pending",
			"We could not confirm your payment yet. You can check again.".to_string(),
			&order_id,
			Some(NotificationAction::RetryPayment {
				order_id: order_id.clone(),
			}),
		));
		PaymentOutcome::TimedOut
	}

	/// Advances a paid order and tells the customer.
	async fn confirm(&self, order_id: &str) {
		let _lock = self.ctx.locks.lock(order_id).await;
		match self
			.ctx
			.api
			.update_order_status(order_id, OrderStatus::Accepted)
			.await
		{
			Ok(order) => {
				self.status.apply(order, StatusHint::default());
			},
			Err(e) => {
				// The payment stands even if the transition was refused
				tracing::warn!(error = %e, "Failed to advance paid order");
				self.status
					.refresh_locked(order_id, StatusHint::default())
					.await
					.ok();
			},
		}

		tracing::info!("Payment confirmed");
		self.ctx.publish(WorkflowEffect::PaymentConfirmed {
			order_id: order_id.to_string(),
		});
		self.ctx.publish(notify(
			Role::Customer,
			NotificationLevel::Success,
			"Payment confirmed",
			"Your payment was received and your order is on its way to the kitchen.".to_string(),
			order_id,
			Some(NotificationAction::ViewOrder {
				order_id: order_id.to_string(),
			}),
		));
	}
}
