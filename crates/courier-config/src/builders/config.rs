//! Configuration builder for tests and local development.

use crate::{
	AccountConfig, BackendConfig, ClientConfig, Config, ServerConfig, TransportConfig,
	WorkflowConfig,
};
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults to in-memory backends so a coordinator can run without network access.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	client_id: String,
	account_primary: String,
	backend_primary: String,
	transport_primary: String,
	workflow: WorkflowConfig,
	server: Option<ServerConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	/// Creates a new `ConfigBuilder` with default values suitable for testing.
	pub fn new() -> Self {
		Self {
			client_id: "courier-test".to_string(),
			account_primary: "env".to_string(),
			backend_primary: "memory".to_string(),
			transport_primary: "memory".to_string(),
			workflow: WorkflowConfig::default(),
			server: None,
		}
	}

	pub fn client_id(mut self, id: String) -> Self {
		self.client_id = id;
		self
	}

	pub fn account_primary(mut self, primary: String) -> Self {
		self.account_primary = primary;
		self
	}

	pub fn backend_primary(mut self, primary: String) -> Self {
		self.backend_primary = primary;
		self
	}

	pub fn transport_primary(mut self, primary: String) -> Self {
		self.transport_primary = primary;
		self
	}

	/// Sets the escalation timeout in seconds.
	pub fn escalation_timeout_seconds(mut self, seconds: u64) -> Self {
		self.workflow.escalation_timeout_seconds = seconds;
		self
	}

	/// Sets the payment polling schedule.
	pub fn payment_polling(mut self, interval_seconds: u64, max_attempts: u32) -> Self {
		self.workflow.payment_poll_interval_seconds = interval_seconds;
		self.workflow.payment_poll_max_attempts = max_attempts;
		self
	}

	/// Replaces the whole workflow section.
	pub fn workflow(mut self, workflow: WorkflowConfig) -> Self {
		self.workflow = workflow;
		self
	}

	pub fn server(mut self, server: Option<ServerConfig>) -> Self {
		self.server = server;
		self
	}

	/// Builds the `Config`, registering an empty table for each primary.
	pub fn build(self) -> Config {
		let section = |primary: &str| {
			let mut implementations = HashMap::new();
			implementations.insert(
				primary.to_string(),
				toml::Value::Table(toml::map::Map::new()),
			);
			implementations
		};

		Config {
			client: ClientConfig { id: self.client_id },
			account: AccountConfig {
				implementations: section(&self.account_primary),
				primary: self.account_primary,
			},
			backend: BackendConfig {
				implementations: section(&self.backend_primary),
				primary: self.backend_primary,
			},
			transport: TransportConfig {
				implementations: section(&self.transport_primary),
				primary: self.transport_primary,
			},
			workflow: self.workflow,
			server: self.server,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_defaults() {
		let config = ConfigBuilder::new()
			.escalation_timeout_seconds(30)
			.payment_polling(1, 3)
			.build();
		assert_eq!(config.transport.primary, "memory");
		assert!(config.transport.implementations.contains_key("memory"));
		assert_eq!(config.workflow.escalation_timeout_seconds, 30);
		assert_eq!(config.workflow.payment_poll_max_attempts, 3);
	}
}
