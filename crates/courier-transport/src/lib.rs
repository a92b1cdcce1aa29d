//! Realtime event transport for the courier client.
//!
//! One long-lived connection per session carries every inbound event and
//! outbound command. Implementations own the socket and its reconnection;
//! [`EventTransport`] owns everything above it: authentication on every
//! (re)connect, the connection-state watch, listener fan-out, and dropping
//! commands while the link is down.

use async_trait::async_trait;
use courier_types::{
	ClientCommand, ConfigSchema, ConnectionState, EventKind, ImplementationRegistry,
	RealtimeEvent, SecretString,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
	pub mod noop;
	pub mod websocket;
}

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
	/// The link is down; the command was not sent.
	#[error("Not connected")]
	NotConnected,
	/// Realtime updates are switched off for this client.
	#[error("Transport disabled: {0}")]
	Disabled(String),
	/// Opening or using the connection failed.
	#[error("Connection error: {0}")]
	Connection(String),
	/// A command could not be encoded.
	#[error("Encode error: {0}")]
	Encode(String),
	/// The implementation is misconfigured.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// What an implementation reports about its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
	/// The link came up, initially or after a reconnect.
	Connected,
	/// An event arrived.
	Event(RealtimeEvent),
	/// The link dropped; the implementation keeps reconnecting.
	Disconnected { reason: String },
}

/// Trait defining the interface for realtime connection implementations.
#[async_trait]
pub trait TransportInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Starts connecting. Frames flow into `inbound` until `close` is called.
	///
	/// Reconnecting after a drop is the implementation's responsibility; each
	/// successful (re)connect is reported with [`TransportFrame::Connected`].
	async fn open(&self, inbound: mpsc::UnboundedSender<TransportFrame>)
		-> Result<(), TransportError>;

	/// Sends one command over the live link.
	async fn send(&self, command: &ClientCommand) -> Result<(), TransportError>;

	/// Stops the connection and any reconnect attempts.
	async fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for transport factory functions.
pub type TransportFactory = fn(&toml::Value) -> Result<Box<dyn TransportInterface>, TransportError>;

/// Registry trait for transport implementations.
pub trait TransportRegistry: ImplementationRegistry<Factory = TransportFactory> {}

/// Get all registered transport implementations.
pub fn get_all_implementations() -> Vec<(&'static str, TransportFactory)> {
	use implementations::{memory, noop, websocket};

	vec![
		(websocket::Registry::NAME, websocket::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
		(noop::Registry::NAME, noop::Registry::factory()),
	]
}

/// Callback invoked for every delivered event of a kind.
pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Identifies one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerMap = HashMap<EventKind, Vec<(ListenerId, EventHandler)>>;

/// Live connection owned by the service.
struct Session {
	dispatcher: JoinHandle<()>,
}

/// Service owning the session's realtime connection.
pub struct EventTransport {
	implementation: Arc<dyn TransportInterface>,
	listeners: Arc<RwLock<ListenerMap>>,
	next_listener: AtomicU64,
	state: Arc<watch::Sender<ConnectionState>>,
	session: Mutex<Option<Session>>,
}

impl EventTransport {
	/// Creates a new EventTransport over the specified implementation.
	pub fn new(implementation: Box<dyn TransportInterface>) -> Self {
		let (state, _) = watch::channel(ConnectionState::Disconnected);
		Self {
			implementation: Arc::from(implementation),
			listeners: Arc::new(RwLock::new(HashMap::new())),
			next_listener: AtomicU64::new(1),
			state: Arc::new(state),
			session: Mutex::new(None),
		}
	}

	/// Opens the connection if it is not already open or opening.
	///
	/// Without a credential the client stays disconnected. Failures are
	/// logged and leave the transport in the disconnected state; the rest of
	/// the client keeps working without live updates.
	pub async fn connect(&self, credential: Option<SecretString>) {
		let mut session = self.session.lock().await;
		if session.is_some() {
			return;
		}
		let Some(credential) = credential else {
			tracing::info!("No credential available, realtime updates disabled");
			return;
		};

		self.state.send_replace(ConnectionState::Connecting);
		let (tx, rx) = mpsc::unbounded_channel();
		if let Err(e) = self.implementation.open(tx).await {
			match e {
				TransportError::Disabled(_) => tracing::info!(reason = %e, "Realtime transport disabled"),
				_ => tracing::warn!(error = %e, "Failed to open realtime connection"),
			}
			self.state.send_replace(ConnectionState::Disconnected);
			return;
		}

		let dispatcher = tokio::spawn(run_dispatcher(
			rx,
			self.implementation.clone(),
			self.listeners.clone(),
			self.state.clone(),
			credential,
		));
		*session = Some(Session { dispatcher });
	}

	/// Closes the connection and drops every listener registration.
	///
	/// Subscription handles created before remain safe to cancel.
	pub async fn disconnect(&self) {
		let Some(session) = self.session.lock().await.take() else {
			self.clear_listeners();
			return;
		};

		if let Err(e) = self.implementation.close().await {
			tracing::warn!(error = %e, "Error while closing realtime connection");
		}
		session.dispatcher.abort();
		self.clear_listeners();
		self.state.send_replace(ConnectionState::Disconnected);
		tracing::info!("Realtime connection closed");
	}

	/// Registers a handler for one event kind.
	pub fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
		let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
		if let Ok(mut listeners) = self.listeners.write() {
			listeners.entry(kind).or_default().push((id, handler));
		}
		id
	}

	/// Removes a handler. Returns false if it was not registered.
	pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
		let Ok(mut listeners) = self.listeners.write() else {
			return false;
		};
		let Some(handlers) = listeners.get_mut(&kind) else {
			return false;
		};
		let before = handlers.len();
		handlers.retain(|(existing, _)| *existing != id);
		let removed = handlers.len() != before;
		if handlers.is_empty() {
			listeners.remove(&kind);
		}
		removed
	}

	/// Number of handlers registered for a kind.
	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.listeners
			.read()
			.map(|listeners| listeners.get(&kind).map_or(0, Vec::len))
			.unwrap_or(0)
	}

	/// Sends a command if connected; otherwise drops it with a warning.
	pub async fn emit(&self, command: ClientCommand) {
		if !self.is_connected() {
			tracing::warn!(command = command.name(), "Dropping command while disconnected");
			return;
		}
		if let Err(e) = self.implementation.send(&command).await {
			tracing::warn!(command = command.name(), error = %e, "Failed to send command");
		}
	}

	pub fn is_connected(&self) -> bool {
		*self.state.borrow() == ConnectionState::Connected
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}

	/// Watches connection state changes.
	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}

	fn clear_listeners(&self) {
		if let Ok(mut listeners) = self.listeners.write() {
			listeners.clear();
		}
	}
}

/// Consumes frames from the implementation until it goes away.
async fn run_dispatcher(
	mut inbound: mpsc::UnboundedReceiver<TransportFrame>,
	implementation: Arc<dyn TransportInterface>,
	listeners: Arc<RwLock<ListenerMap>>,
	state: Arc<watch::Sender<ConnectionState>>,
	credential: SecretString,
) {
	while let Some(frame) = inbound.recv().await {
		match frame {
			TransportFrame::Connected => {
				let authenticate = ClientCommand::Authenticate {
					token: credential.clone(),
				};
				if let Err(e) = implementation.send(&authenticate).await {
					tracing::warn!(error = %e, "Failed to authenticate realtime connection");
					continue;
				}
				state.send_replace(ConnectionState::Connected);
				tracing::info!("Realtime connection established");
			},
			TransportFrame::Disconnected { reason } => {
				state.send_replace(ConnectionState::Connecting);
				tracing::warn!(reason = %reason, "Realtime connection lost, reconnecting");
			},
			TransportFrame::Event(event) => dispatch(&listeners, &event),
		}
	}
	state.send_replace(ConnectionState::Disconnected);
}

/// Runs every handler registered for the event's kind.
///
/// The handler list is copied first so handlers may register or remove
/// listeners. A panicking handler is logged and does not affect the others.
fn dispatch(listeners: &RwLock<ListenerMap>, event: &RealtimeEvent) {
	let kind = event.kind();
	let handlers: Vec<(ListenerId, EventHandler)> = match listeners.read() {
		Ok(listeners) => listeners.get(&kind).cloned().unwrap_or_default(),
		Err(_) => return,
	};
	tracing::debug!(event = kind.as_str(), handlers = handlers.len(), "Dispatching event");

	for (id, handler) in handlers {
		if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
			tracing::error!(event = kind.as_str(), listener = id.0, "Event handler panicked");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryTransport;
	use courier_types::OrderStatus;
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;

	fn status_event(order_id: &str) -> RealtimeEvent {
		RealtimeEvent::OrderStatusUpdated {
			order_id: order_id.to_string(),
			status: OrderStatus::Preparing,
			rider: None,
		}
	}

	async fn settle() {
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	#[tokio::test(start_paused = true)]
	async fn test_connect_authenticates_and_is_idempotent() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));

		transport.connect(Some(SecretString::from("tok"))).await;
		transport.connect(Some(SecretString::from("tok"))).await;
		settle().await;

		assert!(transport.is_connected());
		assert_eq!(memory.open_count(), 1);
		assert_eq!(memory.sent_names(), vec!["authenticate"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_connect_without_credential_degrades() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));

		transport.connect(None).await;
		settle().await;

		assert_eq!(transport.state(), ConnectionState::Disconnected);
		assert_eq!(memory.open_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_emit_while_disconnected_is_dropped() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));

		transport
			.emit(ClientCommand::JoinOrder {
				order_id: "o-1".into(),
			})
			.await;
		assert!(memory.sent().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_reconnect_reauthenticates() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));
		let mut state = transport.watch_state();

		transport.connect(Some(SecretString::from("tok"))).await;
		settle().await;
		memory.drop_connection();
		settle().await;
		assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);

		memory.restore_connection();
		settle().await;
		assert!(transport.is_connected());
		assert_eq!(memory.sent_names(), vec!["authenticate", "authenticate"]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_panicking_handler_does_not_affect_siblings() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));
		let delivered = Arc::new(AtomicUsize::new(0));

		transport.on(
			EventKind::OrderStatusUpdated,
			Arc::new(|_: &RealtimeEvent| panic!("handler failure")),
		);
		let counter = delivered.clone();
		transport.on(
			EventKind::OrderStatusUpdated,
			Arc::new(move |_: &RealtimeEvent| {
				counter.fetch_add(1, Ordering::SeqCst);
			}),
		);

		transport.connect(Some(SecretString::from("tok"))).await;
		settle().await;
		memory.inject(status_event("o-1"));
		memory.inject(status_event("o-2"));
		settle().await;

		assert_eq!(delivered.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_off_and_disconnect_remove_listeners() {
		let memory = MemoryTransport::new();
		let transport = EventTransport::new(Box::new(memory.clone()));

		let first = transport.on(EventKind::RiderAssigned, Arc::new(|_: &RealtimeEvent| {}));
		transport.on(EventKind::RiderAssigned, Arc::new(|_: &RealtimeEvent| {}));
		assert_eq!(transport.listener_count(EventKind::RiderAssigned), 2);

		assert!(transport.off(EventKind::RiderAssigned, first));
		assert!(!transport.off(EventKind::RiderAssigned, first));
		assert_eq!(transport.listener_count(EventKind::RiderAssigned), 1);

		transport.connect(Some(SecretString::from("tok"))).await;
		settle().await;
		transport.disconnect().await;
		transport.disconnect().await;

		assert_eq!(transport.listener_count(EventKind::RiderAssigned), 0);
		assert_eq!(transport.state(), ConnectionState::Disconnected);
		assert_eq!(memory.close_count(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_noop_transport_stays_disconnected() {
		let transport = EventTransport::new(Box::new(implementations::noop::NoopTransport));
		transport.connect(Some(SecretString::from("tok"))).await;
		assert_eq!(transport.state(), ConnectionState::Disconnected);
		transport
			.emit(ClientCommand::LeaveOrder {
				order_id: "o-1".into(),
			})
			.await;
	}
}
