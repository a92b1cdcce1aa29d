//! In-memory transport for tests and offline demos.
//!
//! Nothing leaves the process. Tests drive the link through the handle:
//! injecting events, dropping and restoring the connection, and inspecting
//! the commands that were sent.

use crate::{TransportError, TransportFrame, TransportInterface};
use async_trait::async_trait;
use courier_types::{
	ClientCommand, ConfigSchema, Field, FieldType, RealtimeEvent, Schema, ValidationError,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct MemoryLink {
	inbound: Option<mpsc::UnboundedSender<TransportFrame>>,
	connected: bool,
	fail_open: bool,
	sent: Vec<ClientCommand>,
	open_count: usize,
	close_count: usize,
}

/// Loopback transport. Clones share the same link.
#[derive(Clone, Default)]
pub struct MemoryTransport {
	link: Arc<Mutex<MemoryLink>>,
}

impl MemoryTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every subsequent `open` fail.
	pub fn fail_open(&self, fail: bool) {
		self.lock().fail_open = fail;
	}

	/// Delivers an event as if the backend had pushed it.
	///
	/// Events injected while the link is down are lost, as they would be on
	/// a real socket.
	pub fn inject(&self, event: RealtimeEvent) {
		let link = self.lock();
		if !link.connected {
			return;
		}
		if let Some(inbound) = &link.inbound {
			let _ = inbound.send(TransportFrame::Event(event));
		}
	}

	/// Simulates a network drop.
	pub fn drop_connection(&self) {
		let mut link = self.lock();
		link.connected = false;
		if let Some(inbound) = &link.inbound {
			let _ = inbound.send(TransportFrame::Disconnected {
				reason: "connection dropped".to_string(),
			});
		}
	}

	/// Simulates a successful reconnect after a drop.
	pub fn restore_connection(&self) {
		let mut link = self.lock();
		if link.inbound.is_none() {
			return;
		}
		link.connected = true;
		if let Some(inbound) = &link.inbound {
			let _ = inbound.send(TransportFrame::Connected);
		}
	}

	/// Commands sent so far, oldest first.
	pub fn sent(&self) -> Vec<ClientCommand> {
		self.lock().sent.clone()
	}

	/// Wire names of the commands sent so far.
	pub fn sent_names(&self) -> Vec<&'static str> {
		self.lock().sent.iter().map(ClientCommand::name).collect()
	}

	pub fn clear_sent(&self) {
		self.lock().sent.clear();
	}

	pub fn open_count(&self) -> usize {
		self.lock().open_count
	}

	pub fn close_count(&self) -> usize {
		self.lock().close_count
	}

	fn lock(&self) -> MutexGuard<'_, MemoryLink> {
		self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

#[async_trait]
impl TransportInterface for MemoryTransport {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryTransportSchema)
	}

	async fn open(
		&self,
		inbound: mpsc::UnboundedSender<TransportFrame>,
	) -> Result<(), TransportError> {
		let mut link = self.lock();
		link.open_count += 1;
		if link.fail_open {
			return Err(TransportError::Connection("memory link refused".into()));
		}
		let _ = inbound.send(TransportFrame::Connected);
		link.inbound = Some(inbound);
		link.connected = true;
		Ok(())
	}

	async fn send(&self, command: &ClientCommand) -> Result<(), TransportError> {
		let mut link = self.lock();
		if !link.connected {
			return Err(TransportError::NotConnected);
		}
		link.sent.push(command.clone());
		Ok(())
	}

	async fn close(&self) -> Result<(), TransportError> {
		let mut link = self.lock();
		link.close_count += 1;
		link.inbound = None;
		link.connected = false;
		Ok(())
	}
}

/// Configuration schema for MemoryTransport.
pub struct MemoryTransportSchema;

impl ConfigSchema for MemoryTransportSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![], vec![Field::new("fail_open", FieldType::Boolean)]);
		schema.validate(config)
	}
}

/// Factory function to create a memory transport.
///
/// Optional configuration parameters:
/// - `fail_open`: refuse every connection attempt (default: false)
pub fn create_transport(config: &toml::Value) -> Result<Box<dyn TransportInterface>, TransportError> {
	MemoryTransportSchema
		.validate(config)
		.map_err(|e| TransportError::Configuration(format!("Invalid configuration: {}", e)))?;

	let transport = MemoryTransport::new();
	transport.fail_open(
		config
			.get("fail_open")
			.and_then(|v| v.as_bool())
			.unwrap_or(false),
	);
	Ok(Box::new(transport))
}

/// Registry for the memory transport implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::TransportFactory;

	fn factory() -> Self::Factory {
		create_transport
	}
}

impl crate::TransportRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_send_requires_open_link() {
		let transport = MemoryTransport::new();
		let command = ClientCommand::JoinOrder {
			order_id: "o-1".into(),
		};
		assert!(matches!(
			transport.send(&command).await,
			Err(TransportError::NotConnected)
		));

		let (tx, mut rx) = mpsc::unbounded_channel();
		transport.open(tx).await.unwrap();
		assert_eq!(rx.recv().await, Some(TransportFrame::Connected));
		transport.send(&command).await.unwrap();
		assert_eq!(transport.sent(), vec![command]);
	}

	#[tokio::test]
	async fn test_drop_and_restore_emit_frames() {
		let transport = MemoryTransport::new();
		let (tx, mut rx) = mpsc::unbounded_channel();
		transport.open(tx).await.unwrap();
		rx.recv().await;

		transport.drop_connection();
		transport.inject(RealtimeEvent::ChatCleared {
			order_id: "o-1".into(),
		});
		transport.restore_connection();

		assert!(matches!(
			rx.recv().await,
			Some(TransportFrame::Disconnected { .. })
		));
		assert_eq!(rx.recv().await, Some(TransportFrame::Connected));
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_factory_fail_open() {
		let config: toml::Value = toml::from_str("fail_open = true").unwrap();
		let transport = create_transport(&config).unwrap();
		let (tx, _rx) = mpsc::unbounded_channel();
		assert!(matches!(
			transport.open(tx).await,
			Err(TransportError::Connection(_))
		));
	}
}
