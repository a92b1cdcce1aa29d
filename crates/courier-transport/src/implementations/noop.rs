//! Transport that never connects.
//!
//! Selecting it runs the client on backend calls alone, without live updates.

use crate::{TransportError, TransportFrame, TransportInterface};
use async_trait::async_trait;
use courier_types::{ClientCommand, ConfigSchema, Schema, ValidationError};
use tokio::sync::mpsc;

pub struct NoopTransport;

#[async_trait]
impl TransportInterface for NoopTransport {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoopTransportSchema)
	}

	async fn open(
		&self,
		_inbound: mpsc::UnboundedSender<TransportFrame>,
	) -> Result<(), TransportError> {
		Err(TransportError::Disabled(
			"realtime updates are turned off".into(),
		))
	}

	async fn send(&self, _command: &ClientCommand) -> Result<(), TransportError> {
		Err(TransportError::NotConnected)
	}

	async fn close(&self) -> Result<(), TransportError> {
		Ok(())
	}
}

pub struct NoopTransportSchema;

impl ConfigSchema for NoopTransportSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_transport(config: &toml::Value) -> Result<Box<dyn TransportInterface>, TransportError> {
	NoopTransportSchema
		.validate(config)
		.map_err(|e| TransportError::Configuration(format!("Invalid configuration: {}", e)))?;
	Ok(Box::new(NoopTransport))
}

/// Registry for the noop transport implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "noop";
	type Factory = crate::TransportFactory;

	fn factory() -> Self::Factory {
		create_transport
	}
}

impl crate::TransportRegistry for Registry {}
