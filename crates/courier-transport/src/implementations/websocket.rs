//! WebSocket transport.
//!
//! A background worker owns the socket. It reconnects with a doubling delay
//! after every drop until the transport is closed, keeps the link alive with
//! pings and decodes text frames into [`RealtimeEvent`]s. Frames the client
//! does not understand are skipped.

use crate::{TransportError, TransportFrame, TransportInterface};
use async_trait::async_trait;
use courier_types::{
	url_validator, ClientCommand, ConfigSchema, Field, FieldType, RealtimeEvent, Schema,
	ValidationError,
};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
	pub url: String,
	pub initial_reconnect_delay: Duration,
	pub max_reconnect_delay: Duration,
	pub ping_interval: Duration,
}

impl WebSocketConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			initial_reconnect_delay: Duration::from_millis(1000),
			max_reconnect_delay: Duration::from_millis(30_000),
			ping_interval: Duration::from_secs(25),
		}
	}
}

struct Link {
	outbound: mpsc::UnboundedSender<String>,
	cancel: CancellationToken,
	worker: JoinHandle<()>,
}

/// Realtime transport over a WebSocket.
pub struct WebSocketTransport {
	config: WebSocketConfig,
	connected: Arc<AtomicBool>,
	link: Mutex<Option<Link>>,
}

impl WebSocketTransport {
	pub fn new(config: WebSocketConfig) -> Self {
		Self {
			config,
			connected: Arc::new(AtomicBool::new(false)),
			link: Mutex::new(None),
		}
	}
}

#[async_trait]
impl TransportInterface for WebSocketTransport {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(WebSocketTransportSchema)
	}

	async fn open(
		&self,
		inbound: mpsc::UnboundedSender<TransportFrame>,
	) -> Result<(), TransportError> {
		let mut link = self
			.link
			.lock()
			.map_err(|e| TransportError::Connection(format!("link lock poisoned: {}", e)))?;
		if link.is_some() {
			tracing::debug!("WebSocket worker already running");
			return Ok(());
		}

		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		let worker = tokio::spawn(run_worker(
			self.config.clone(),
			inbound,
			outbound_rx,
			self.connected.clone(),
			cancel.clone(),
		));
		*link = Some(Link {
			outbound,
			cancel,
			worker,
		});
		Ok(())
	}

	async fn send(&self, command: &ClientCommand) -> Result<(), TransportError> {
		if !self.connected.load(Ordering::Acquire) {
			return Err(TransportError::NotConnected);
		}
		let frame = command
			.to_frame()
			.map_err(|e| TransportError::Encode(e.to_string()))?;

		let link = self
			.link
			.lock()
			.map_err(|e| TransportError::Connection(format!("link lock poisoned: {}", e)))?;
		let Some(link) = link.as_ref() else {
			return Err(TransportError::NotConnected);
		};
		link.outbound
			.send(frame)
			.map_err(|_| TransportError::NotConnected)
	}

	async fn close(&self) -> Result<(), TransportError> {
		let link = self
			.link
			.lock()
			.map_err(|e| TransportError::Connection(format!("link lock poisoned: {}", e)))?
			.take();
		let Some(link) = link else {
			return Ok(());
		};

		link.cancel.cancel();
		if tokio::time::timeout(Duration::from_secs(2), link.worker)
			.await
			.is_err()
		{
			tracing::warn!("WebSocket worker did not stop in time");
		}
		self.connected.store(false, Ordering::Release);
		Ok(())
	}
}

/// Connects, serves the session, and reconnects until cancelled.
async fn run_worker(
	config: WebSocketConfig,
	inbound: mpsc::UnboundedSender<TransportFrame>,
	mut outbound: mpsc::UnboundedReceiver<String>,
	connected: Arc<AtomicBool>,
	cancel: CancellationToken,
) {
	let mut reconnect_delay = config.initial_reconnect_delay;

	loop {
		let attempt = tokio::select! {
			_ = cancel.cancelled() => break,
			result = tokio_tungstenite::connect_async(config.url.as_str()) => result,
		};

		match attempt {
			Ok((socket, _)) => {
				reconnect_delay = config.initial_reconnect_delay;
				connected.store(true, Ordering::Release);
				tracing::info!(url = %config.url, "WebSocket connected");
				if inbound.send(TransportFrame::Connected).is_err() {
					break;
				}

				let reason =
					run_session(socket, &inbound, &mut outbound, config.ping_interval, &cancel)
						.await;
				connected.store(false, Ordering::Release);
				while outbound.try_recv().is_ok() {}

				if cancel.is_cancelled() {
					break;
				}
				tracing::warn!(reason = %reason, "WebSocket disconnected");
				if inbound
					.send(TransportFrame::Disconnected { reason })
					.is_err()
				{
					break;
				}
			},
			Err(e) => {
				tracing::warn!(
					url = %config.url,
					error = %e,
					delay_ms = reconnect_delay.as_millis() as u64,
					"WebSocket connect failed, retrying"
				);
			},
		}

		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = tokio::time::sleep(reconnect_delay) => {},
		}
		reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
	}

	connected.store(false, Ordering::Release);
	tracing::debug!("WebSocket worker stopped");
}

/// Pumps one connected socket. Returns why the session ended.
async fn run_session(
	socket: Socket,
	inbound: &mpsc::UnboundedSender<TransportFrame>,
	outbound: &mut mpsc::UnboundedReceiver<String>,
	ping_every: Duration,
	cancel: &CancellationToken,
) -> String {
	let (mut sink, mut stream) = socket.split();
	let mut ping = tokio::time::interval(ping_every);
	ping.tick().await;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => {
				let _ = sink.send(Message::Close(None)).await;
				return "closed by client".to_string();
			}

			Some(frame) = outbound.recv() => {
				if let Err(e) = sink.send(Message::Text(frame.into())).await {
					return format!("send failed: {}", e);
				}
			}

			_ = ping.tick() => {
				if sink.send(Message::Ping(vec![].into())).await.is_err() {
					return "keepalive ping failed".to_string();
				}
			}

			message = stream.next() => match message {
				Some(Ok(Message::Text(text))) => match RealtimeEvent::from_frame(text.as_str()) {
					Ok(event) => {
						if inbound.send(TransportFrame::Event(event)).is_err() {
							return "receiver dropped".to_string();
						}
					},
					Err(e) => tracing::debug!(error = %e, "Skipping unrecognised frame"),
				},
				Some(Ok(Message::Ping(data))) => {
					let _ = sink.send(Message::Pong(data)).await;
				},
				Some(Ok(Message::Close(_))) => return "closed by server".to_string(),
				Some(Ok(_)) => {},
				Some(Err(e)) => return e.to_string(),
				None => return "stream ended".to_string(),
			},
		}
	}
}

/// Configuration schema for WebSocketTransport.
pub struct WebSocketTransportSchema;

impl ConfigSchema for WebSocketTransportSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(url_validator(&["ws", "wss"]))],
			vec![
				Field::new(
					"initial_reconnect_delay_ms",
					FieldType::Integer {
						min: Some(10),
						max: Some(60_000),
					},
				),
				Field::new(
					"max_reconnect_delay_ms",
					FieldType::Integer {
						min: Some(100),
						max: Some(600_000),
					},
				),
				Field::new(
					"ping_interval_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a WebSocket transport.
///
/// Required configuration parameters:
/// - `url`: ws:// or wss:// endpoint
///
/// Optional configuration parameters:
/// - `initial_reconnect_delay_ms`: first retry delay (default: 1000)
/// - `max_reconnect_delay_ms`: retry delay cap (default: 30000)
/// - `ping_interval_seconds`: keepalive period (default: 25)
pub fn create_transport(config: &toml::Value) -> Result<Box<dyn TransportInterface>, TransportError> {
	WebSocketTransportSchema
		.validate(config)
		.map_err(|e| TransportError::Configuration(format!("Invalid configuration: {}", e)))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| TransportError::Configuration("url is required".into()))?;
	let millis = |key: &str| {
		config
			.get(key)
			.and_then(|v| v.as_integer())
			.map(|v| Duration::from_millis(v as u64))
	};

	let mut settings = WebSocketConfig::new(url);
	if let Some(delay) = millis("initial_reconnect_delay_ms") {
		settings.initial_reconnect_delay = delay;
	}
	if let Some(delay) = millis("max_reconnect_delay_ms") {
		settings.max_reconnect_delay = delay;
	}
	if let Some(seconds) = config.get("ping_interval_seconds").and_then(|v| v.as_integer()) {
		settings.ping_interval = Duration::from_secs(seconds as u64);
	}
	if settings.max_reconnect_delay < settings.initial_reconnect_delay {
		return Err(TransportError::Configuration(
			"max_reconnect_delay_ms must not be below initial_reconnect_delay_ms".into(),
		));
	}

	Ok(Box::new(WebSocketTransport::new(settings)))
}

/// Registry for the WebSocket transport implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "websocket";
	type Factory = crate::TransportFactory;

	fn factory() -> Self::Factory {
		create_transport
	}
}

impl crate::TransportRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
	use axum::response::Response;
	use axum::routing::get;
	use axum::Router;
	use courier_types::SecretString;
	use tokio::time::timeout;

	/// Accepts a connection, answers the first command with an event, then
	/// hangs up.
	async fn spawn_server() -> String {
		async fn handler(ws: WebSocketUpgrade) -> Response {
			ws.on_upgrade(|mut socket| async move {
				if let Some(Ok(WsMessage::Text(_))) = socket.recv().await {
					let _ = socket
						.send(WsMessage::Text(
							r#"{"event":"orderDelivered","data":{"orderId":"o-1"}}"#.into(),
						))
						.await;
				}
				let _ = socket.send(WsMessage::Close(None)).await;
			})
		}

		let app = Router::new().route("/ws", get(handler));
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("ws://{}/ws", addr)
	}

	async fn next_frame(rx: &mut mpsc::UnboundedReceiver<TransportFrame>) -> TransportFrame {
		timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("frame within timeout")
			.expect("channel open")
	}

	#[tokio::test]
	async fn test_session_delivers_events_and_reconnects() {
		let url = spawn_server().await;
		let mut config = WebSocketConfig::new(url);
		config.initial_reconnect_delay = Duration::from_millis(20);
		let transport = WebSocketTransport::new(config);

		let (tx, mut rx) = mpsc::unbounded_channel();
		transport.open(tx).await.unwrap();
		assert_eq!(next_frame(&mut rx).await, TransportFrame::Connected);

		transport
			.send(&ClientCommand::Authenticate {
				token: SecretString::from("tok"),
			})
			.await
			.unwrap();
		assert_eq!(
			next_frame(&mut rx).await,
			TransportFrame::Event(RealtimeEvent::OrderDelivered {
				order_id: "o-1".into()
			})
		);
		assert!(matches!(
			next_frame(&mut rx).await,
			TransportFrame::Disconnected { .. }
		));
		assert_eq!(next_frame(&mut rx).await, TransportFrame::Connected);

		transport.close().await.unwrap();
		assert!(matches!(
			transport
				.send(&ClientCommand::LeaveOrder {
					order_id: "o-1".into()
				})
				.await,
			Err(TransportError::NotConnected)
		));
	}

	#[tokio::test]
	async fn test_close_stops_retrying_unreachable_endpoint() {
		let mut config = WebSocketConfig::new("ws://127.0.0.1:9/ws");
		config.initial_reconnect_delay = Duration::from_millis(10);
		let transport = WebSocketTransport::new(config);

		let (tx, mut rx) = mpsc::unbounded_channel();
		transport.open(tx).await.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
		transport.close().await.unwrap();

		assert!(rx.try_recv().is_err());
		transport.close().await.unwrap();
	}

	#[test]
	fn test_factory_validation() {
		let config: toml::Value = toml::from_str("url = \"http://example.com\"").unwrap();
		assert!(create_transport(&config).is_err());

		let config: toml::Value = toml::from_str(
			"url = \"wss://example.com/ws\"\ninitial_reconnect_delay_ms = 5000\nmax_reconnect_delay_ms = 1000",
		)
		.unwrap();
		assert!(create_transport(&config).is_err());

		let config: toml::Value = toml::from_str("url = \"wss://example.com/ws\"").unwrap();
		assert!(create_transport(&config).is_ok());
	}
}
