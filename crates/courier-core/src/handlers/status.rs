//! Order status reconciliation.
//!
//! Lifecycle events only say that something changed. The handler re-fetches
//! the order, merges it into local state and derives the role-specific side
//! effects from the fetched status. Events of one order are queued and
//! handled one at a time; different orders never wait on each other.

use crate::engine::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::gating::keeps_in_active_set;
use crate::state::{DeferredKind, WorkflowState};
use courier_api::ApiError;
use courier_types::{
	truncate_id, Notification, NotificationAction, NotificationLevel, Order, OrderStatus,
	RealtimeEvent, RiderRef, Role, WorkflowEffect,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// What a lifecycle event claimed about an order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusHint {
	pub status: Option<OrderStatus>,
	pub rider: Option<RiderRef>,
}

impl StatusHint {
	/// Hint carried by a lifecycle event, or `None` for other events.
	pub fn from_event(event: &RealtimeEvent) -> Option<Self> {
		match event {
			RealtimeEvent::OrderStatusUpdated { status, rider, .. } => Some(Self {
				status: Some(*status),
				rider: rider.clone(),
			}),
			RealtimeEvent::RiderAssigned { rider, .. } => Some(Self {
				status: None,
				rider: Some(rider.clone()),
			}),
			RealtimeEvent::OrderDelivered { .. } => Some(Self {
				status: Some(OrderStatus::Delivered),
				rider: None,
			}),
			RealtimeEvent::OrderRated { .. } => Some(Self::default()),
			_ => None,
		}
	}
}

struct HintQueue {
	sender: mpsc::UnboundedSender<StatusHint>,
	worker: AbortHandle,
}

/// Per-order FIFO queues of pending hints, each drained by one worker task.
#[derive(Default)]
pub(crate) struct HintQueues {
	queues: Mutex<HashMap<String, HintQueue>>,
}

impl HintQueues {
	fn queues(&self) -> MutexGuard<'_, HashMap<String, HintQueue>> {
		self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Closes the queue of one order once its pending hints are handled.
	pub(crate) fn remove(&self, order_id: &str) {
		self.queues().remove(order_id);
	}

	/// Stops every worker, dropping the hints still queued.
	pub(crate) fn clear(&self) {
		for (_, queue) in self.queues().drain() {
			queue.worker.abort();
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.queues().len()
	}
}


/// Reconciles orders with the backend and drives their side effects.
#[derive(Clone)]
pub struct StatusHandler {
	ctx: Arc<WorkflowContext>,
	queues: Arc<HintQueues>,
}

impl StatusHandler {
	pub fn new(ctx: Arc<WorkflowContext>) -> Self {
		Self {
			ctx,
			queues: Arc::new(HintQueues::default()),
		}
	}

	pub(crate) fn context(&self) -> &Arc<WorkflowContext> {
		&self.ctx
	}

	pub(crate) fn queues(&self) -> &HintQueues {
		&self.queues
	}

	/// Routes a lifecycle event from an order subscription.
	///
	/// A rider assignment cancels the escalation timer right away, before the
	/// re-fetch, so a timer that is about to fire cannot escalate an order a
	/// rider already took.
	pub fn on_order_event(&self, event: &RealtimeEvent) {
		let (Some(order_id), Some(hint)) = (event.order_id(), StatusHint::from_event(event)) else {
			return;
		};
		if let RealtimeEvent::RiderAssigned { rider, .. } = event {
			let mut state = self.ctx.state.lock();
			if state.timers.disarm(order_id) {
				tracing::info!(
					order_id = %truncate_id(order_id),
					rider_id = %rider.id,
					"Rider assigned, escalation cancelled"
				);
			}
		}
		self.enqueue(order_id, hint);
	}

	fn enqueue(&self, order_id: &str, hint: StatusHint) {
		if self.ctx.state.lock().closed {
			return;
		}
		let mut queues = self.queues.queues();
		if let Some(queue) = queues.get(order_id) {
			if queue.sender.send(hint.clone()).is_ok() {
				return;
			}
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		// The receiver is alive until the worker below starts
		sender.send(hint).ok();
		let worker = tokio::spawn(self.clone().drain_queue(order_id.to_string(), receiver));
		queues.insert(
			order_id.to_string(),
			HintQueue {
				sender,
				worker: worker.abort_handle(),
			},
		);
	}

	async fn drain_queue(self, order_id: String, mut receiver: mpsc::UnboundedReceiver<StatusHint>) {
		while let Some(hint) = receiver.recv().await {
			if let Err(e) = self.handle_status_change(&order_id, hint).await {
				tracing::debug!(order_id = %truncate_id(&order_id), error = %e, "Status event not applied");
			}
		}
	}

	/// Re-fetches an order and applies the result.
	///
	/// When the fetch fails the local state is left untouched and the error
	/// is returned; the next event for the order retries.
	pub async fn handle_status_change(
		&self,
		order_id: &str,
		hint: StatusHint,
	) -> Result<Order, WorkflowError> {
		let guard = self.ctx.locks.lock(order_id).await;
		let result = self.refresh_locked(order_id, hint).await;
		drop(guard);
		if !self.ctx.state.lock().orders.contains_key(order_id) {
			self.ctx.locks.release(order_id);
		}
		result
	}

	/// Fetch and apply. The caller holds the order lock.
	pub(crate) async fn refresh_locked(
		&self,
		order_id: &str,
		hint: StatusHint,
	) -> Result<Order, WorkflowError> {
		let fetched = match self.ctx.api.fetch_order(order_id).await {
			Ok(order) => order,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(order_id),
					error = %e,
					"Failed to re-fetch order, keeping local state"
				);
				return Err(e.into());
			},
		};
		if let Some(status) = hint.status.filter(|status| *status != fetched.status) {
			tracing::debug!(
				order_id = %truncate_id(order_id),
				event_status = %status,
				fetched_status = %fetched.status,
				"Event status differs from backend"
			);
		}
		Ok(self.apply(fetched, hint))
	}

	/// Merges an authoritative order into local state and runs its side
	/// effects. The caller holds the order lock.
	pub(crate) fn apply(&self, fetched: Order, hint: StatusHint) -> Order {
		let ctx = &self.ctx;
		let role = ctx.role();
		let order_id = fetched.id.clone();
		let mut effects = Vec::new();
		let mut released = Vec::new();
		let mut track_rider = None;

		let (order, tracked, needs_subscription) = {
			let mut state = ctx.state.lock();
			if state.closed {
				tracing::debug!(order_id = %truncate_id(&order_id), "Coordinator stopped, order state dropped");
				return fetched;
			}
			if let Some(current) = state.orders.get(&order_id) {
				if fetched.updated_at < current.updated_at {
					tracing::debug!(order_id = %truncate_id(&order_id), "Ignoring stale order state");
					return current.clone();
				}
			}
			if let Some(finished) = state.finished.get(&order_id) {
				if fetched.updated_at <= finished.updated_at {
					tracing::debug!(order_id = %truncate_id(&order_id), "Ignoring state of a retired order");
					return fetched;
				}
			}
			let previous = state
				.orders
				.get(&order_id)
				.map(|order| order.status)
				.or_else(|| state.finished.get(&order_id).map(|finished| finished.status));

			let mut order = fetched;
			if order.rider.is_none() && !order.status.is_terminal() {
				order.rider = hint.rider;
			}
			if !order.awaiting_rider() {
				order.requires_manual_assignment = false;
			}
			let entered = previous != Some(order.status);
			if entered {
				tracing::info!(
					order_id = %truncate_id(&order_id),
					status = %order.status,
					previous = ?previous,
					"Order status changed"
				);
			}

			if order.awaiting_rider() && !order.requires_manual_assignment {
				self.arm_escalation(&mut state, &order_id);
			} else {
				state.timers.disarm(&order_id);
			}

			if order.is_rated() {
				state.rated.insert(order_id.clone());
				state.cancel_deferred(&order_id, DeferredKind::PromptRating);
			}

			match order.status {
				OrderStatus::AwaitingConfirmation if role.is_some_and(|r| r.participates_in_chat()) => {
					self.schedule_once(
						&mut state,
						&order_id,
						DeferredKind::NavigateToChat,
						ctx.config.chat_navigation_delay(),
						WorkflowEffect::NavigateToChat {
							order_id: order_id.clone(),
						},
					);
				},
				OrderStatus::Delivered => match role {
					Some(Role::Customer) => {
						if !state.rated.contains(&order_id) {
							self.schedule_once(
								&mut state,
								&order_id,
								DeferredKind::PromptRating,
								ctx.config.rating_prompt_delay(),
								WorkflowEffect::PromptRating {
									order_id: order_id.clone(),
								},
							);
						}
						if entered && ctx.config.refresh_loyalty_on_delivery {
							effects.push(WorkflowEffect::RefreshLoyalty {
								customer_id: order.customer_id.clone(),
							});
						}
					},
					Some(Role::Rider) if entered => {
						effects.push(notify(
							Role::Rider,
							NotificationLevel::Success,
							"Delivery complete",
							format!("Order {} was delivered", truncate_id(&order_id)),
							&order_id,
							None,
						));
					},
					_ => {},
				},
				OrderStatus::Cancelled if entered => {
					effects.push(notify(
						role.unwrap_or(Role::Customer),
						NotificationLevel::Warning,
						"Order cancelled",
						format!("Order {} was cancelled", truncate_id(&order_id)),
						&order_id,
						Some(NotificationAction::ViewOrder {
							order_id: order_id.clone(),
						}),
					));
				},
				_ => {},
			}

			match (&order.rider, order.status) {
				(Some(rider), OrderStatus::OnTheWay) if role == Some(Role::Customer) => {
					if !state.rider_tracking.contains_key(&order_id) {
						track_rider = Some(rider.id.clone());
					}
				},
				_ => released.extend(state.rider_tracking.remove(&order_id)),
			}

			let rated = state.rated.contains(&order_id);
			let tracked = keeps_in_active_set(&order, ctx.identity.as_ref(), rated);
			let mut needs_subscription = false;
			if tracked {
				if state.orders.get(&order_id) != Some(&order) {
					effects.push(WorkflowEffect::OrderUpdated {
						order: order.clone(),
					});
				}
				state.orders.insert(order_id.clone(), order.clone());
				state.finished.remove(&order_id);
				needs_subscription = !state.order_subscriptions.contains_key(&order_id);
			} else {
				state.timers.disarm(&order_id);
				if state.orders.remove(&order_id).is_some() {
					effects.push(WorkflowEffect::OrderRemoved {
						order_id: order_id.clone(),
						status: order.status,
					});
				}
				if order.status.is_terminal() {
					state.retire(&order);
				}
				released.extend(state.order_subscriptions.remove(&order_id));
				released.extend(state.rider_tracking.remove(&order_id));
				track_rider = None;
			}
			ctx.publish_snapshot(&state);
			(order, tracked, needs_subscription)
		};

		// Unsubscribing sends commands, so it happens outside the state lock
		drop(released);
		if !tracked {
			self.queues.remove(&order_id);
		}
		if needs_subscription {
			self.subscribe_order(&order_id);
		}
		if let Some(rider_id) = track_rider {
			self.track_rider(&order_id, &rider_id);
		}
		for effect in effects {
			ctx.publish(effect);
		}
		order
	}

	fn subscribe_order(&self, order_id: &str) {
		let handler = self.clone();
		let subscription = self
			.ctx
			.subscriptions
			.subscribe_to_order(order_id, move |event: &RealtimeEvent| handler.on_order_event(event));
		match subscription {
			Ok(subscription) => {
				let unused = {
					let mut state = self.ctx.state.lock();
					if state.closed {
						Some(subscription)
					} else {
						state
							.order_subscriptions
							.insert(order_id.to_string(), subscription)
					}
				};
				drop(unused);
			},
			Err(e) => {
				tracing::warn!(order_id = %truncate_id(order_id), error = %e, "Failed to subscribe to order");
			},
		}
	}

	fn track_rider(&self, order_id: &str, rider_id: &str) {
		let ctx = self.ctx.clone();
		let subscription = self.ctx.subscriptions.subscribe_to_rider_location(
			rider_id,
			move |event: &RealtimeEvent| {
				if let RealtimeEvent::LocationUpdated {
					rider_id,
					order_id,
					location,
				} = event
				{
					ctx.publish(WorkflowEffect::RiderLocation {
						rider_id: rider_id.clone(),
						order_id: order_id.clone(),
						location: *location,
					});
				}
			},
		);
		match subscription {
			Ok(subscription) => {
				let unused = {
					let mut state = self.ctx.state.lock();
					if state.closed {
						Some(subscription)
					} else {
						state.rider_tracking.insert(order_id.to_string(), subscription)
					}
				};
				drop(unused);
			},
			Err(e) => {
				tracing::warn!(rider_id = %rider_id, error = %e, "Failed to track rider location");
			},
		}
	}

	fn arm_escalation(&self, state: &mut WorkflowState, order_id: &str) {
		if state.closed {
			return;
		}
		let handler = self.clone();
		let id = order_id.to_string();
		if state
			.timers
			.arm(order_id, move |generation| async move { handler.escalate(id, generation).await })
		{
			tracing::info!(
				order_id = %truncate_id(order_id),
				timeout_secs = self.ctx.config.escalation_timeout().as_secs(),
				"Waiting for a rider"
			);
		}
	}

	/// Runs when an escalation timer fires.
	///
	/// Flags the order for manual assignment and tells support, exactly once
	/// per arming. A firing whose timer was disarmed in the meantime does
	/// nothing.
	pub(crate) async fn escalate(&self, order_id: String, generation: u64) {
		let _guard = self.ctx.locks.lock(&order_id).await;
		{
			let mut state = self.ctx.state.lock();
			if !state.timers.complete(&order_id, generation) {
				tracing::debug!(order_id = %truncate_id(&order_id), generation, "Stale escalation ignored");
				return;
			}
			if !state.orders.get(&order_id).is_some_and(Order::awaiting_rider) {
				return;
			}
		}

		let minutes = self.ctx.config.escalation_timeout().as_secs() / 60;
		tracing::warn!(
			order_id = %truncate_id(&order_id),
			minutes,
			"No rider found in time, escalating to support"
		);

		match self.ctx.api.flag_manual_assignment(&order_id).await {
			Ok(order) => {
				self.apply(order, StatusHint::default());
			},
			Err(e @ ApiError::Rejected { .. }) => {
				// The order moved on while the timer was running
				tracing::info!(order_id = %truncate_id(&order_id), error = %e, "Escalation no longer needed");
				self.refresh_locked(&order_id, StatusHint::default()).await.ok();
				return;
			},
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order_id),
					error = %e,
					"Failed to flag order, escalating locally"
				);
				let updated = {
					let mut state = self.ctx.state.lock();
					let updated = state.orders.get_mut(&order_id).map(|order| {
						order.requires_manual_assignment = true;
						order.clone()
					});
					self.ctx.publish_snapshot(&state);
					updated
				};
				if let Some(order) = updated {
					self.ctx.publish(WorkflowEffect::OrderUpdated { order });
				}
			},
		}

		self.ctx.publish(notify(
			Role::Support,
			NotificationLevel::Warning,
			"Rider needed",
			format!(
				"Order {} has been ready for {} minutes without a rider",
				truncate_id(&order_id),
				minutes
			),
			&order_id,
			Some(NotificationAction::AssignRider {
				order_id: order_id.clone(),
			}),
		));
	}

	/// Schedules an effect that fires once per order, ever.
	fn schedule_once(
		&self,
		state: &mut WorkflowState,
		order_id: &str,
		kind: DeferredKind,
		delay: Duration,
		effect: WorkflowEffect,
	) {
		let key = (order_id.to_string(), kind);
		if !state.scheduled_once.insert(key.clone()) {
			return;
		}
		tracing::debug!(order_id = %truncate_id(order_id), kind = ?kind, delay_ms = delay.as_millis() as u64, "Deferred effect scheduled");

		let ctx = self.ctx.clone();
		let task_key = key.clone();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let fire = {
				let mut state = ctx.state.lock();
				state.deferred.remove(&task_key).is_some()
					&& !(kind == DeferredKind::PromptRating && state.rated.contains(&task_key.0))
			};
			if fire {
				ctx.publish(effect);
			}
		})
		.abort_handle();
		state.deferred.insert(key, handle);
	}
}

pub(crate) fn notify(
	audience: Role,
	level: NotificationLevel,
	title: &str,
	message: String,
	order_id: &str,
	action: Option<NotificationAction>,
) -> WorkflowEffect {
	WorkflowEffect::Notify(Notification {
		audience,
		level,
		title: title.to_string(),
		message,
		order_id: Some(order_id.to_string()),
		action,
	})
}
