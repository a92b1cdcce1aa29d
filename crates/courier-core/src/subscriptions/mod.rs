//! Topic subscriptions over the shared realtime connection.
//!
//! Callers never talk to the transport's listener registry directly. Each
//! `subscribe_*` call joins a server-side topic, registers filtered handlers,
//! and returns a [`Subscription`] handle that undoes exactly what it did.
//! Joins are reference-counted per topic, so cancelling one of two
//! subscriptions on the same order keeps the topic joined for the other.
//!
//! Outbound commands go through a single queue drained by one task, which
//! keeps joins and leaves in the order they were issued. Every time the
//! connection comes back the joins of all live topics are sent again.

use courier_transport::{EventHandler, EventTransport, ListenerId};
use courier_types::{
	truncate_id, ClientCommand, ConnectionState, EventKind, GeoPoint, RealtimeEvent, Role, Topic,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors returned by the subscription façade.
#[derive(Debug, Error)]
pub enum SubscriptionError {
	/// The session was torn down.
	#[error("Subscriptions are closed")]
	Closed,
	/// A command payload was rejected before sending.
	#[error("Invalid payload: {0}")]
	InvalidPayload(String),
}

struct TopicEntry {
	count: usize,
	join: ClientCommand,
}

struct Shared {
	transport: Arc<EventTransport>,
	topics: Mutex<HashMap<Topic, TopicEntry>>,
	outbound: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
	fn topics(&self) -> MutexGuard<'_, HashMap<Topic, TopicEntry>> {
		self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn enqueue(&self, command: ClientCommand) -> Result<(), SubscriptionError> {
		let outbound = self
			.outbound
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		match outbound.as_ref() {
			Some(sender) => sender.send(command).map_err(|_| SubscriptionError::Closed),
			None => Err(SubscriptionError::Closed),
		}
	}

	fn acquire(&self, topic: &Topic, join: ClientCommand) -> Result<(), SubscriptionError> {
		// Joins are re-sent on every subscribe; the server treats them as idempotent.
		self.enqueue(join.clone())?;
		let mut topics = self.topics();
		topics
			.entry(topic.clone())
			.or_insert(TopicEntry { count: 0, join })
			.count += 1;
		Ok(())
	}

	fn release(&self, topic: &Topic, listeners: &[(EventKind, ListenerId)]) {
		for (kind, id) in listeners {
			self.transport.off(*kind, *id);
		}

		let leave = {
			let mut topics = self.topics();
			match topics.get_mut(topic) {
				Some(entry) if entry.count > 1 => {
					entry.count -= 1;
					false
				},
				Some(_) => {
					topics.remove(topic);
					true
				},
				None => false,
			}
		};
		if leave {
			tracing::debug!(topic = %topic, "Leaving topic");
			let _ = self.enqueue(topic.leave_command());
		}
	}
}

/// Handle to one subscription.
///
/// Cancelling is idempotent and safe after the session was torn down.
/// Dropping the handle cancels it.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
	topic: Topic,
	listeners: Vec<(EventKind, ListenerId)>,
	shared: Weak<Shared>,
	active: AtomicBool,
}

impl Subscription {
	/// Leaves the topic (when no other subscription holds it) and removes
	/// every handler this subscription registered.
	pub fn unsubscribe(&self) {
		if !self.active.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(shared) = self.shared.upgrade() {
			shared.release(&self.topic, &self.listeners);
		}
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	pub fn topic(&self) -> &Topic {
		&self.topic
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("topic", &self.topic.to_string())
			.field("listeners", &self.listeners.len())
			.field("active", &self.is_active())
			.finish()
	}
}

/// Façade over the event transport for topic subscriptions and chat commands.
pub struct SubscriptionManager {
	shared: Arc<Shared>,
}

impl SubscriptionManager {
	/// Creates the façade and starts its command pump and rejoin watcher.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(transport: Arc<EventTransport>) -> Self {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			transport: transport.clone(),
			topics: Mutex::new(HashMap::new()),
			outbound: Mutex::new(Some(outbound)),
			tasks: Mutex::new(Vec::new()),
		});

		let pump = tokio::spawn(pump_commands(transport.clone(), outbound_rx));
		let watcher = tokio::spawn(rejoin_on_reconnect(
			transport.watch_state(),
			Arc::downgrade(&shared),
		));
		if let Ok(mut tasks) = shared.tasks.lock() {
			tasks.push(pump);
			tasks.push(watcher);
		}

		Self { shared }
	}

	/// Receives every lifecycle event of one order.
	pub fn subscribe_to_order<F>(
		&self,
		order_id: &str,
		callback: F,
	) -> Result<Subscription, SubscriptionError>
	where
		F: Fn(&RealtimeEvent) + Send + Sync + 'static,
	{
		let topic = Topic::Order(order_id.to_string());
		let wanted = order_id.to_string();
		let handler: EventHandler = Arc::new(move |event: &RealtimeEvent| {
			if event.order_id() == Some(wanted.as_str()) {
				callback(event);
			}
		});
		// The role only shapes chat joins
		let join = topic.join_command(Role::Customer);
		self.subscribe(topic, join, &EventKind::ORDER_LIFECYCLE, handler)
	}

	/// Receives the location updates of one rider.
	pub fn subscribe_to_rider_location<F>(
		&self,
		rider_id: &str,
		callback: F,
	) -> Result<Subscription, SubscriptionError>
	where
		F: Fn(&RealtimeEvent) + Send + Sync + 'static,
	{
		let topic = Topic::Rider(rider_id.to_string());
		let wanted = rider_id.to_string();
		let handler: EventHandler = Arc::new(move |event: &RealtimeEvent| {
			if matches!(event, RealtimeEvent::LocationUpdated { rider_id, .. } if *rider_id == wanted)
			{
				callback(event);
			}
		});
		let join = topic.join_command(Role::Rider);
		self.subscribe(topic, join, &[EventKind::LocationUpdated], handler)
	}

	/// Receives the chat traffic of one order and marks it read.
	pub fn subscribe_to_chat<F>(
		&self,
		order_id: &str,
		user_id: &str,
		role: Role,
		callback: F,
	) -> Result<Subscription, SubscriptionError>
	where
		F: Fn(&RealtimeEvent) + Send + Sync + 'static,
	{
		let topic = Topic::Chat {
			order_id: order_id.to_string(),
			user_id: user_id.to_string(),
		};
		let wanted = order_id.to_string();
		let handler: EventHandler = Arc::new(move |event: &RealtimeEvent| {
			if event.order_id() == Some(wanted.as_str()) {
				callback(event);
			}
		});
		let join = topic.join_command(role);
		let subscription = self.subscribe(topic, join, &EventKind::CHAT, handler)?;
		self.mark_messages_as_read(order_id, user_id)?;
		Ok(subscription)
	}

	pub fn send_message(
		&self,
		order_id: &str,
		sender_id: &str,
		sender_role: Role,
		body: &str,
	) -> Result<(), SubscriptionError> {
		let body = body.trim();
		if body.is_empty() {
			return Err(SubscriptionError::InvalidPayload(
				"message body is empty".into(),
			));
		}
		self.shared.enqueue(ClientCommand::SendMessage {
			order_id: order_id.to_string(),
			sender_id: sender_id.to_string(),
			sender_role,
			body: body.to_string(),
		})
	}

	pub fn update_rider_location(
		&self,
		rider_id: &str,
		order_id: Option<&str>,
		location: GeoPoint,
	) -> Result<(), SubscriptionError> {
		if !(-90.0..=90.0).contains(&location.latitude)
			|| !(-180.0..=180.0).contains(&location.longitude)
		{
			return Err(SubscriptionError::InvalidPayload(format!(
				"coordinates out of range: {}, {}",
				location.latitude, location.longitude
			)));
		}
		self.shared.enqueue(ClientCommand::UpdateLocation {
			rider_id: rider_id.to_string(),
			order_id: order_id.map(String::from),
			location,
		})
	}

	pub fn mark_messages_as_read(
		&self,
		order_id: &str,
		user_id: &str,
	) -> Result<(), SubscriptionError> {
		self.shared.enqueue(ClientCommand::MarkAsRead {
			order_id: order_id.to_string(),
			user_id: user_id.to_string(),
		})
	}

	pub fn typing_start(&self, order_id: &str, user_id: &str) -> Result<(), SubscriptionError> {
		self.shared.enqueue(ClientCommand::TypingStart {
			order_id: order_id.to_string(),
			user_id: user_id.to_string(),
		})
	}

	pub fn typing_stop(&self, order_id: &str, user_id: &str) -> Result<(), SubscriptionError> {
		self.shared.enqueue(ClientCommand::TypingStop {
			order_id: order_id.to_string(),
			user_id: user_id.to_string(),
		})
	}

	/// Number of live subscriptions holding a topic.
	pub fn topic_count(&self, topic: &Topic) -> usize {
		self.shared.topics().get(topic).map_or(0, |entry| entry.count)
	}

	/// Flushes queued commands and stops the background tasks.
	///
	/// Subscriptions created before stay safe to cancel; new subscriptions
	/// fail with [`SubscriptionError::Closed`].
	pub async fn close(&self) {
		let sender = self
			.shared
			.outbound
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.take();
		if sender.is_none() {
			return;
		}
		drop(sender);
		self.shared.topics().clear();

		let tasks: Vec<JoinHandle<()>> = self
			.shared
			.tasks
			.lock()
			.map(|mut tasks| tasks.drain(..).collect())
			.unwrap_or_default();
		let mut tasks = tasks.into_iter();
		if let Some(pump) = tasks.next() {
			if tokio::time::timeout(Duration::from_secs(2), pump).await.is_err() {
				tracing::warn!("Command queue did not drain in time");
			}
		}
		for task in tasks {
			task.abort();
		}
	}

	fn subscribe(
		&self,
		topic: Topic,
		join: ClientCommand,
		kinds: &[EventKind],
		handler: EventHandler,
	) -> Result<Subscription, SubscriptionError> {
		self.shared.acquire(&topic, join)?;
		let listeners = kinds
			.iter()
			.map(|kind| (*kind, self.shared.transport.on(*kind, handler.clone())))
			.collect();
		tracing::debug!(topic = %topic, "Subscribed");

		Ok(Subscription {
			topic,
			listeners,
			shared: Arc::downgrade(&self.shared),
			active: AtomicBool::new(true),
		})
	}
}

/// Sends queued commands one at a time, in order.
async fn pump_commands(
	transport: Arc<EventTransport>,
	mut outbound: mpsc::UnboundedReceiver<ClientCommand>,
) {
	while let Some(command) = outbound.recv().await {
		if let ClientCommand::JoinOrder { order_id } | ClientCommand::LeaveOrder { order_id } =
			&command
		{
			tracing::trace!(command = command.name(), order_id = %truncate_id(order_id), "Sending");
		}
		transport.emit(command).await;
	}
}

/// Re-sends the joins of every live topic whenever the link comes back.
async fn rejoin_on_reconnect(
	mut state: tokio::sync::watch::Receiver<ConnectionState>,
	shared: Weak<Shared>,
) {
	while state.changed().await.is_ok() {
		if *state.borrow_and_update() != ConnectionState::Connected {
			continue;
		}
		let Some(shared) = shared.upgrade() else {
			break;
		};
		let joins: Vec<ClientCommand> = shared
			.topics()
			.values()
			.map(|entry| entry.join.clone())
			.collect();
		if !joins.is_empty() {
			tracing::info!(topics = joins.len(), "Rejoining topics after reconnect");
		}
		for join in joins {
			if shared.enqueue(join).is_err() {
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use courier_transport::implementations::memory::MemoryTransport;
	use courier_types::{OrderStatus, SecretString};
	use std::sync::atomic::AtomicUsize;

	async fn connected() -> (SubscriptionManager, Arc<EventTransport>, MemoryTransport) {
		let memory = MemoryTransport::new();
		let transport = Arc::new(EventTransport::new(Box::new(memory.clone())));
		let manager = SubscriptionManager::new(transport.clone());
		transport.connect(Some(SecretString::from("tok"))).await;
		settle().await;
		memory.clear_sent();
		(manager, transport, memory)
	}

	async fn settle() {
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	fn status(order_id: &str) -> RealtimeEvent {
		RealtimeEvent::OrderStatusUpdated {
			order_id: order_id.into(),
			status: OrderStatus::Preparing,
			rider: None,
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_order_subscription_filters_by_order() {
		let (manager, _transport, memory) = connected().await;
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		let _subscription = manager
			.subscribe_to_order("o-1", move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
		settle().await;

		memory.inject(status("o-1"));
		memory.inject(status("o-2"));
		settle().await;

		assert_eq!(seen.load(Ordering::SeqCst), 1);
		assert_eq!(memory.sent_names(), vec!["joinOrder"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unsubscribe_twice_is_noop() {
		let (manager, transport, memory) = connected().await;
		let subscription = manager.subscribe_to_order("o-1", |_| {}).unwrap();
		assert_eq!(transport.listener_count(EventKind::OrderStatusUpdated), 1);

		subscription.unsubscribe();
		subscription.unsubscribe();
		drop(subscription);
		settle().await;

		assert_eq!(transport.listener_count(EventKind::OrderStatusUpdated), 0);
		assert_eq!(memory.sent_names(), vec!["joinOrder", "leaveOrder"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shared_topic_is_reference_counted() {
		let (manager, _transport, memory) = connected().await;
		let topic = Topic::Order("o-1".into());
		let first = manager.subscribe_to_order("o-1", |_| {}).unwrap();
		let second = manager.subscribe_to_order("o-1", |_| {}).unwrap();
		assert_eq!(manager.topic_count(&topic), 2);

		first.unsubscribe();
		settle().await;
		assert_eq!(manager.topic_count(&topic), 1);
		assert_eq!(memory.sent_names(), vec!["joinOrder", "joinOrder"]);

		second.unsubscribe();
		settle().await;
		assert_eq!(manager.topic_count(&topic), 0);
		assert_eq!(memory.sent_names().last(), Some(&"leaveOrder"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_joins_resent_after_reconnect() {
		let (manager, _transport, memory) = connected().await;
		let _order = manager.subscribe_to_order("o-1", |_| {}).unwrap();
		let _rider = manager.subscribe_to_rider_location("r-1", |_| {}).unwrap();
		settle().await;
		memory.clear_sent();

		memory.drop_connection();
		settle().await;
		memory.restore_connection();
		settle().await;

		let mut names = memory.sent_names();
		assert_eq!(names.remove(0), "authenticate");
		names.sort();
		assert_eq!(names, vec!["joinOrder", "subscribeRider"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_chat_subscription_marks_read_once() {
		let (manager, _transport, memory) = connected().await;
		let received = Arc::new(AtomicUsize::new(0));
		let counter = received.clone();
		let _chat = manager
			.subscribe_to_chat("o-1", "cust-1", Role::Customer, move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
		settle().await;

		memory.inject(RealtimeEvent::UserTyping {
			order_id: "o-1".into(),
			user_id: "r-1".into(),
			is_typing: true,
		});
		memory.inject(RealtimeEvent::ChatCleared {
			order_id: "o-9".into(),
		});
		settle().await;

		assert_eq!(memory.sent_names(), vec!["joinChat", "markAsRead"]);
		assert_eq!(received.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_pass_throughs_validate_payloads() {
		let (manager, _transport, memory) = connected().await;
		assert!(manager
			.send_message("o-1", "cust-1", Role::Customer, "   ")
			.is_err());
		assert!(manager
			.update_rider_location(
				"r-1",
				None,
				GeoPoint {
					latitude: 120.0,
					longitude: 0.0,
					heading: None,
					speed: None,
				},
			)
			.is_err());

		manager
			.send_message("o-1", "cust-1", Role::Customer, " hello ")
			.unwrap();
		manager.typing_start("o-1", "cust-1").unwrap();
		manager.typing_stop("o-1", "cust-1").unwrap();
		settle().await;

		assert_eq!(
			memory.sent_names(),
			vec!["sendMessage", "typingStart", "typingStop"]
		);
		match &memory.sent()[0] {
			ClientCommand::SendMessage { body, .. } => assert_eq!(body, "hello"),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_after_close_is_safe() {
		let (manager, transport, _memory) = connected().await;
		let subscription = manager.subscribe_to_order("o-1", |_| {}).unwrap();

		manager.close().await;
		transport.disconnect().await;
		subscription.unsubscribe();

		assert!(matches!(
			manager.subscribe_to_order("o-2", |_| {}),
			Err(SubscriptionError::Closed)
		));
	}
}
