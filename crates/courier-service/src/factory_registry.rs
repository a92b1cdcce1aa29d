//! Registry of the implementations the binary can load.
//!
//! Each component crate lists its implementations; the registry collects
//! them by configuration name and hands them to the coordinator builder.

use courier_account::AccountFactory;
use courier_api::OrderApiFactory;
use courier_core::CoordinatorFactories;
use courier_transport::TransportFactory;
use std::collections::HashMap;

/// Factory functions keyed by the names used in configuration.
pub struct FactoryRegistry {
	pub account: HashMap<String, AccountFactory>,
	pub backend: HashMap<String, OrderApiFactory>,
	pub transport: HashMap<String, TransportFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			account: HashMap::new(),
			backend: HashMap::new(),
			transport: HashMap::new(),
		}
	}

	/// Registry holding every implementation shipped with the workspace.
	pub fn with_builtin() -> Self {
		let mut registry = Self::new();
		for (name, factory) in courier_account::get_all_implementations() {
			registry.register_account(name, factory);
		}
		for (name, factory) in courier_api::get_all_implementations() {
			registry.register_backend(name, factory);
		}
		for (name, factory) in courier_transport::get_all_implementations() {
			registry.register_transport(name, factory);
		}
		registry
	}

	/// Register an account implementation
	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}

	/// Register a backend implementation
	pub fn register_backend(&mut self, name: impl Into<String>, factory: OrderApiFactory) {
		self.backend.insert(name.into(), factory);
	}

	/// Register a transport implementation
	pub fn register_transport(&mut self, name: impl Into<String>, factory: TransportFactory) {
		self.transport.insert(name.into(), factory);
	}

	pub fn into_factories(
		self,
	) -> CoordinatorFactories<AccountFactory, OrderApiFactory, TransportFactory> {
		CoordinatorFactories {
			account_factories: self.account,
			backend_factories: self.backend,
			transport_factories: self.transport,
		}
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::with_builtin()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builtin_registry() {
		let registry = FactoryRegistry::with_builtin();

		for name in ["env", "file", "fixed"] {
			assert!(registry.account.contains_key(name), "missing account {}", name);
		}
		for name in ["http", "memory"] {
			assert!(registry.backend.contains_key(name), "missing backend {}", name);
		}
		for name in ["websocket", "memory", "noop"] {
			assert!(registry.transport.contains_key(name), "missing transport {}", name);
		}
	}

	#[test]
	fn test_empty_registry() {
		let factories = FactoryRegistry::new().into_factories();
		assert!(factories.account_factories.is_empty());
		assert!(factories.backend_factories.is_empty());
		assert!(factories.transport_factories.is_empty());
	}
}
