//! Workflow coordinator engine.
//!
//! `CoordinatorEngine` wires the account, backend API and realtime transport
//! into the handlers, and is the single entry point presentation layers use:
//! it exposes the user operations, the observable snapshot, the effect bus,
//! and the gating predicates evaluated against the signed-in observer.

pub mod context;
pub mod effect_bus;
pub mod lifecycle;

use crate::gating::{
	order_status_text, should_notify_customer_care, should_open_chat, should_rate_order,
};
use crate::handlers::{OrderHandler, PaymentHandler, PlacedOrder, StatusHandler};
use crate::state::WorkflowSnapshot;
use crate::subscriptions::{Subscription, SubscriptionError, SubscriptionManager};
use crate::WorkflowError;
use context::WorkflowContext;
use courier_account::AccountService;
use courier_api::OrderApiService;
use courier_config::Config;
use courier_transport::EventTransport;
use courier_types::{
	ConnectionState, GeoPoint, Identity, NewOrder, Order, OrderGatesResponse, PaymentSession,
	RealtimeEvent, Role, WorkflowEffect,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// Start/stop bookkeeping shared by engine clones.
#[derive(Default)]
pub(crate) struct Lifecycle {
	pub(crate) initialized: AtomicBool,
	pub(crate) shut_down: AtomicBool,
	pub(crate) stop: CancellationToken,
	/// A rider's subscription to its own location topic.
	pub(crate) rider_topic: Mutex<Option<Subscription>>,
}

/// Client-side coordinator of the order workflow.
#[derive(Clone)]
pub struct CoordinatorEngine {
	/// Coordinator configuration.
	pub(crate) config: Config,
	/// Source of the signed-in identity and credential.
	pub(crate) account: Arc<AccountService>,
	/// Realtime connection shared by all subscriptions.
	pub(crate) transport: Arc<EventTransport>,
	/// State and collaborators shared with the handlers.
	pub(crate) context: Arc<WorkflowContext>,
	/// Status handler
	pub(crate) status_handler: StatusHandler,
	/// Order handler
	pub(crate) order_handler: Arc<OrderHandler>,
	/// Payment handler
	pub(crate) payment_handler: Arc<PaymentHandler>,
	pub(crate) lifecycle: Arc<Lifecycle>,
}

impl CoordinatorEngine {
	/// Creates a coordinator for the given identity.
	///
	/// Must be called from within a tokio runtime. Nothing is fetched or
	/// connected until [`CoordinatorEngine::initialize`].
	pub fn new(
		config: Config,
		identity: Option<Identity>,
		account: Arc<AccountService>,
		api: Arc<OrderApiService>,
		transport: Arc<EventTransport>,
	) -> Self {
		let subscriptions = Arc::new(SubscriptionManager::new(transport.clone()));
		let context = Arc::new(WorkflowContext::new(
			config.workflow.clone(),
			identity,
			api,
			subscriptions,
		));

		let status_handler = StatusHandler::new(context.clone());
		let order_handler = Arc::new(OrderHandler::new(status_handler.clone()));
		let payment_handler = Arc::new(PaymentHandler::new(status_handler.clone()));

		Self {
			config,
			account,
			transport,
			context,
			status_handler,
			order_handler,
			payment_handler,
			lifecycle: Arc::new(Lifecycle::default()),
		}
	}

	/// Initializes the coordinator and runs until stopped or interrupted.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.initialize().await?;

		let mut connection = self.transport.watch_state();
		loop {
			tokio::select! {
				changed = connection.changed() => {
					if changed.is_err() {
						break;
					}
					let state = *connection.borrow_and_update();
					tracing::info!(state = ?state, "Realtime connection changed");
				}

				_ = self.lifecycle.stop.cancelled() => {
					break;
				}

				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received shutdown signal");
					break;
				}
			}
		}

		self.shutdown().await
	}

	/// Asks a running [`CoordinatorEngine::run`] loop to return.
	pub fn stop(&self) {
		self.lifecycle.stop.cancel();
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn identity(&self) -> Option<&Identity> {
		self.context.identity.as_ref()
	}

	pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
		&self.context.subscriptions
	}

	pub fn status_handler(&self) -> &StatusHandler {
		&self.status_handler
	}

	pub fn connection_state(&self) -> ConnectionState {
		self.transport.state()
	}

	/// Receives every effect published from now on.
	pub fn subscribe_effects(&self) -> broadcast::Receiver<WorkflowEffect> {
		self.context.effects.subscribe()
	}

	/// Observes the snapshot as it changes.
	pub fn watch_snapshot(&self) -> watch::Receiver<WorkflowSnapshot> {
		self.context.snapshot.subscribe()
	}

	/// Current view of the workflow.
	pub fn snapshot(&self) -> WorkflowSnapshot {
		self.context.state.lock().snapshot()
	}

	pub fn order(&self, order_id: &str) -> Option<Order> {
		self.context.state.lock().order(order_id).cloned()
	}

	/// Whether an escalation timer is live for the order.
	pub fn is_escalation_armed(&self, order_id: &str) -> bool {
		self.context.state.lock().timers().is_armed(order_id)
	}

	pub async fn place_order(&self, new_order: NewOrder) -> Result<PlacedOrder, WorkflowError> {
		self.order_handler.place_order(new_order).await
	}

	pub async fn start_payment(&self, order_id: &str) -> Result<PaymentSession, WorkflowError> {
		self.payment_handler.start_payment(order_id).await
	}

	pub fn process_payment(&self, order_id: &str, reference: &str) -> Result<(), WorkflowError> {
		self.payment_handler.process_payment(order_id, reference)
	}

	pub async fn rate_order(
		&self,
		order_id: &str,
		rating: u8,
		comment: Option<String>,
	) -> Result<Order, WorkflowError> {
		self.order_handler.rate_order(order_id, rating, comment).await
	}

	pub async fn accept_order_as_rider(&self, order_id: &str) -> Result<Order, WorkflowError> {
		self.order_handler.accept_order_as_rider(order_id).await
	}

	pub async fn manually_assign_rider(
		&self,
		order_id: &str,
		rider_id: &str,
	) -> Result<Order, WorkflowError> {
		self.order_handler
			.manually_assign_rider(order_id, rider_id)
			.await
	}

	/// Evaluates the gating predicates of an active order for the observer.
	pub fn order_gates(&self, order_id: &str) -> Option<OrderGatesResponse> {
		let role = self.context.role().unwrap_or(Role::Customer);
		let state = self.context.state.lock();
		let order = state.order(order_id)?;
		let rated = order.is_rated() || state.rated.contains(order_id);
		Some(OrderGatesResponse {
			order_id: order.id.clone(),
			status: order.status,
			status_text: order_status_text(order.status, role).to_string(),
			can_open_chat: should_open_chat(order.status, order.has_rider()),
			can_rate: role == Role::Customer && should_rate_order(order.status, rated),
			needs_customer_care: should_notify_customer_care(
				order.status,
				order.has_rider(),
				order.requires_manual_assignment,
			),
		})
	}

	/// Opens the chat of an order; its traffic is published as
	/// [`WorkflowEffect::ChatActivity`].
	pub fn open_chat(&self, order_id: &str) -> Result<Subscription, WorkflowError> {
		let identity = self.context.require_identity()?;
		if !identity.role.participates_in_chat() {
			return Err(WorkflowError::BusinessRule(
				"Only customers and riders can chat".into(),
			));
		}
		let context = self.context.clone();
		self.context
			.subscriptions
			.subscribe_to_chat(
				order_id,
				&identity.user_id,
				identity.role,
				move |event: &RealtimeEvent| {
					context.publish(WorkflowEffect::ChatActivity {
						event: event.clone(),
					});
				},
			)
			.map_err(subscription_error)
	}

	pub fn send_chat_message(&self, order_id: &str, body: &str) -> Result<(), WorkflowError> {
		let identity = self.context.require_identity()?;
		self.context
			.subscriptions
			.send_message(order_id, &identity.user_id, identity.role, body)
			.map_err(subscription_error)
	}

	/// Publishes the signed-in rider's position.
	pub fn update_rider_location(
		&self,
		order_id: Option<&str>,
		location: GeoPoint,
	) -> Result<(), WorkflowError> {
		let identity = self.context.require_identity()?;
		if identity.role != Role::Rider {
			return Err(WorkflowError::BusinessRule(
				"Only riders report their location".into(),
			));
		}
		self.context
			.subscriptions
			.update_rider_location(&identity.user_id, order_id, location)
			.map_err(subscription_error)
	}
}

fn subscription_error(error: SubscriptionError) -> WorkflowError {
	match error {
		SubscriptionError::Closed => WorkflowError::Transient(error.to_string()),
		SubscriptionError::InvalidPayload(message) => WorkflowError::Validation(message),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::handlers::StatusHint;
	use crate::test_support::{harness, order};
	use courier_types::{OrderStatus, RiderRef, Topic};
	use std::time::Duration;

	#[tokio::test(start_paused = true)]
	async fn test_initialize_hydrates_and_subscribes() {
		let harness = harness(Role::Customer, "cust-1").await;
		harness.api.insert(order("o-1", OrderStatus::Preparing)).await;
		harness.api.insert(order("o-2", OrderStatus::Ready)).await;
		let mut foreign = order("o-3", OrderStatus::Preparing);
		foreign.customer_id = "cust-2".into();
		harness.api.insert(foreign).await;

		harness.engine.initialize().await.unwrap();
		harness.engine.initialize().await.unwrap();
		harness.settle().await;

		let ids: Vec<_> = harness
			.engine
			.snapshot()
			.active_orders
			.into_iter()
			.map(|order| order.id)
			.collect();
		assert_eq!(ids, vec!["o-1", "o-2"]);
		assert_eq!(harness.api.call_count("list_orders").await, 1);
		assert_eq!(harness.transport.open_count(), 1);
		assert_eq!(harness.engine.connection_state(), ConnectionState::Connected);

		let subscriptions = harness.engine.subscriptions();
		assert_eq!(subscriptions.topic_count(&Topic::Order("o-1".into())), 1);
		assert_eq!(subscriptions.topic_count(&Topic::Order("o-2".into())), 1);
		// Ready without a rider
		assert!(harness.engine.is_escalation_armed("o-2"));
		assert!(!harness.engine.is_escalation_armed("o-1"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_timer_tracks_ready_without_rider() {
		let harness = harness(Role::Support, "support-1").await;
		harness.api.insert(order("o-1", OrderStatus::Ready)).await;
		harness.engine.initialize().await.unwrap();
		let handler = harness.engine.status_handler().clone();

		let cases = [
			(OrderStatus::Ready, None, true),
			(OrderStatus::Ready, Some("r-1"), false),
			(OrderStatus::Ready, None, true),
			(OrderStatus::OnTheWay, Some("r-1"), false),
		];
		for (status, rider, armed) in cases {
			harness
				.api
				.update("o-1", |order| {
					order.status = status;
					order.rider = rider.map(RiderRef::new);
				})
				.await;
			handler
				.handle_status_change("o-1", Default::default())
				.await
				.unwrap();
			assert_eq!(harness.engine.is_escalation_armed("o-1"), armed, "{:?} {:?}", status, rider);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_customer_chat_navigation_once() {
		let mut harness = harness(Role::Customer, "cust-1").await;
		let mut assigned = order("o-1", OrderStatus::OnTheWay);
		assigned.rider = Some(RiderRef::new("r-1"));
		harness.api.insert(assigned).await;
		harness.engine.initialize().await.unwrap();

		harness
			.api
			.update("o-1", |order| order.status = OrderStatus::AwaitingConfirmation)
			.await;
		for _ in 0..3 {
			harness.transport.inject(RealtimeEvent::OrderStatusUpdated {
				order_id: "o-1".into(),
				status: OrderStatus::AwaitingConfirmation,
				rider: None,
			});
		}
		harness.settle().await;
		tokio::time::sleep(Duration::from_secs(10)).await;
		harness.settle().await;

		let navigations = harness
			.drain_effects()
			.into_iter()
			.filter(|effect| matches!(effect, WorkflowEffect::NavigateToChat { .. }))
			.count();
		assert_eq!(navigations, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_customer_tracks_rider_on_the_way() {
		let mut harness = harness(Role::Customer, "cust-1").await;
		let mut assigned = order("o-1", OrderStatus::OnTheWay);
		assigned.rider = Some(RiderRef::new("r-1"));
		harness.api.insert(assigned).await;
		harness.engine.initialize().await.unwrap();
		harness.settle().await;
		harness.drain_effects();

		let location = GeoPoint {
			latitude: 5.6,
			longitude: -0.18,
			heading: None,
			speed: None,
		};
		harness.transport.inject(RealtimeEvent::LocationUpdated {
			rider_id: "r-1".into(),
			order_id: Some("o-1".into()),
			location,
		});
		harness.settle().await;

		assert!(harness.drain_effects().contains(&WorkflowEffect::RiderLocation {
			rider_id: "r-1".into(),
			order_id: Some("o-1".into()),
			location,
		}));
	}

	#[tokio::test(start_paused = true)]
	async fn test_gates_follow_role() {
		let harness = harness(Role::Customer, "cust-1").await;
		let mut delivered = order("o-1", OrderStatus::Delivered);
		delivered.rider = Some(RiderRef::new("r-1"));
		harness.api.insert(delivered.clone()).await;
		harness
			.engine
			.status_handler()
			.apply(delivered, Default::default());

		let gates = harness.engine.order_gates("o-1").unwrap();
		assert!(gates.can_rate);
		assert!(!gates.can_open_chat);
		assert!(!gates.needs_customer_care);
		assert!(harness.engine.order_gates("missing").is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_is_idempotent() {
		let harness = harness(Role::Support, "support-1").await;
		harness.api.insert(order("o-1", OrderStatus::Ready)).await;
		harness.api.insert(order("o-2", OrderStatus::Ready)).await;
		harness.engine.initialize().await.unwrap();
		assert!(harness.engine.is_escalation_armed("o-1"));

		harness.engine.shutdown().await.unwrap();
		harness.engine.shutdown().await.unwrap();

		assert!(!harness.engine.is_escalation_armed("o-1"));
		assert!(!harness.engine.is_escalation_armed("o-2"));
		assert_eq!(harness.transport.close_count(), 1);
		assert_eq!(harness.engine.connection_state(), ConnectionState::Disconnected);

		// Nothing fires after teardown
		tokio::time::sleep(Duration::from_secs(600)).await;
		assert_eq!(harness.api.call_count("flag_manual_assignment").await, 0);
		assert_eq!(harness.engine.snapshot().active_orders.len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_queued_status_change_dropped_at_shutdown() {
		let harness = harness(Role::Customer, "cust-1").await;
		harness.api.insert(order("o-1", OrderStatus::Preparing)).await;
		harness.engine.initialize().await.unwrap();
		assert!(!harness.engine.is_escalation_armed("o-1"));

		// Hold the order so the event waits in its queue
		let busy = harness.engine.context.locks.lock("o-1").await;
		harness
			.api
			.update("o-1", |order| order.status = OrderStatus::Ready)
			.await;
		harness.transport.inject(RealtimeEvent::OrderStatusUpdated {
			order_id: "o-1".into(),
			status: OrderStatus::Ready,
			rider: None,
		});
		harness.settle().await;
		assert_eq!(harness.engine.status_handler().queues().len(), 1);

		harness.engine.shutdown().await.unwrap();
		drop(busy);
		harness.settle().await;

		assert!(!harness.engine.is_escalation_armed("o-1"));
		assert_eq!(harness.engine.status_handler().queues().len(), 0);
		tokio::time::sleep(Duration::from_secs(301)).await;
		harness.settle().await;
		assert_eq!(harness.api.call_count("flag_manual_assignment").await, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_reconciliation_after_shutdown_changes_nothing() {
		let harness = harness(Role::Support, "support-1").await;
		harness.engine.initialize().await.unwrap();
		harness.engine.shutdown().await.unwrap();

		harness
			.engine
			.status_handler()
			.apply(order("o-9", OrderStatus::Ready), StatusHint::default());

		assert!(!harness.engine.is_escalation_armed("o-9"));
		assert!(harness.engine.order("o-9").is_none());
		assert_eq!(
			harness
				.engine
				.subscriptions()
				.topic_count(&Topic::Order("o-9".into())),
			0
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_returns_after_stop() {
		let harness = harness(Role::Customer, "cust-1").await;
		let engine = harness.engine.clone();
		let running = tokio::spawn(async move { engine.run().await });

		harness.settle().await;
		harness.engine.stop();
		running.await.unwrap().unwrap();
		assert_eq!(harness.transport.close_count(), 1);
	}
}
