//! Lifecycle management for the coordinator engine.
//!
//! Initialization connects the session and hydrates the active set;
//! shutdown undoes everything the session started. Both are idempotent.

use super::{CoordinatorEngine, EngineError};
use crate::handlers::StatusHint;
use courier_types::{OrderFilter, RealtimeEvent, Role, WorkflowEffect};
use std::sync::atomic::Ordering;

impl CoordinatorEngine {
	/// Connects the session and loads the observer's active orders.
	///
	/// Hydration failures are logged; the active set then fills up from
	/// later operations and events.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		if self.lifecycle.initialized.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		tracing::info!("Initializing coordinator");

		let credential = self.account.credential().await;
		self.context.api.authorize(credential.clone()).await;
		self.transport.connect(credential).await;

		let Some(identity) = self.context.identity.clone() else {
			tracing::warn!("No signed-in user, active orders not loaded");
			return Ok(());
		};

		match self
			.context
			.api
			.list_orders(&OrderFilter::for_identity(&identity))
			.await
		{
			Ok(orders) => {
				let count = orders.len();
				for order in orders {
					let _lock = self.context.locks.lock(&order.id).await;
					self.status_handler.apply(order, StatusHint::default());
				}
				tracing::info!(orders = count, role = %identity.role, "Loaded active orders");
			},
			Err(e) => {
				tracing::warn!(error = %e, "Failed to load active orders");
			},
		}

		if identity.role == Role::Rider {
			let context = self.context.clone();
			let subscription = self.context.subscriptions.subscribe_to_rider_location(
				&identity.user_id,
				move |event: &RealtimeEvent| {
					if let RealtimeEvent::LocationUpdated {
						rider_id,
						order_id,
						location,
					} = event
					{
						context.publish(WorkflowEffect::RiderLocation {
							rider_id: rider_id.clone(),
							order_id: order_id.clone(),
							location: *location,
						});
					}
				},
			);
			match subscription {
				Ok(subscription) => {
					if let Ok(mut slot) = self.lifecycle.rider_topic.lock() {
						*slot = Some(subscription);
					}
				},
				Err(e) => tracing::warn!(error = %e, "Failed to subscribe to rider topic"),
			}
		}

		Ok(())
	}

	/// Cancels timers, deferred effects, payment monitors and subscriptions,
	/// then disconnects the transport.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		if self.lifecycle.shut_down.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		tracing::info!("Shutting down coordinator");
		self.lifecycle.stop.cancel();

		let subscriptions = {
			let mut state = self.context.state.lock();
			let subscriptions = state.teardown();
			self.context.publish_snapshot(&state);
			subscriptions
		};
		let released = subscriptions.len();
		drop(subscriptions);
		let rider_topic = self
			.lifecycle
			.rider_topic
			.lock()
			.ok()
			.and_then(|mut slot| slot.take());
		drop(rider_topic);
		self.status_handler.queues().clear();

		self.context.subscriptions.close().await;
		self.transport.disconnect().await;
		tracing::info!(subscriptions = released, "Coordinator stopped");
		Ok(())
	}
}
