//! Builder pattern for constructing coordinator engines.
//!
//! Composes a [`CoordinatorEngine`] from pluggable account, backend and
//! transport implementations using factory functions keyed by the names
//! used in configuration.

use crate::engine::CoordinatorEngine;
use courier_account::{AccountError, AccountInterface, AccountService};
use courier_api::{ApiError, OrderApiInterface, OrderApiService};
use courier_config::Config;
use courier_transport::{EventTransport, TransportError, TransportInterface};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during coordinator construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for all factory functions needed to build a coordinator.
///
/// Each factory takes the TOML table of one implementation and returns it
/// boxed behind its interface.
pub struct CoordinatorFactories<AF, BF, TF> {
	pub account_factories: HashMap<String, AF>,
	pub backend_factories: HashMap<String, BF>,
	pub transport_factories: HashMap<String, TF>,
}

/// Builder for constructing a CoordinatorEngine with pluggable implementations.
pub struct CoordinatorBuilder {
	config: Config,
}

impl CoordinatorBuilder {
	/// Creates a new CoordinatorBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine from the primary implementation of each component.
	///
	/// The signed-in identity is resolved once here. A missing session is not
	/// an error: the coordinator runs, but operations needing a user fail.
	pub async fn build<AF, BF, TF>(
		self,
		factories: CoordinatorFactories<AF, BF, TF>,
	) -> Result<CoordinatorEngine, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		BF: Fn(&toml::Value) -> Result<Box<dyn OrderApiInterface>, ApiError>,
		TF: Fn(&toml::Value) -> Result<Box<dyn TransportInterface>, TransportError>,
	{
		let account = load_primary(
			"account",
			&self.config.account.primary,
			&self.config.account.implementations,
			&factories.account_factories,
		)?;
		let account = Arc::new(AccountService::new(account));

		let identity = match account.identity().await {
			Ok(identity) => {
				tracing::info!(
					component = "account",
					user_id = %identity.user_id,
					role = %identity.role,
					"Signed in"
				);
				Some(identity)
			},
			Err(AccountError::NotSignedIn(reason)) => {
				tracing::warn!(component = "account", reason = %reason, "No signed-in user");
				None
			},
			Err(e) => {
				tracing::error!(component = "account", error = %e, "Failed to resolve identity");
				return Err(BuilderError::Config(format!(
					"Failed to resolve identity: {}",
					e
				)));
			},
		};

		let backend = load_primary(
			"backend",
			&self.config.backend.primary,
			&self.config.backend.implementations,
			&factories.backend_factories,
		)?;
		let api = Arc::new(OrderApiService::new(backend));

		let transport = load_primary(
			"transport",
			&self.config.transport.primary,
			&self.config.transport.implementations,
			&factories.transport_factories,
		)?;
		let transport = Arc::new(EventTransport::new(transport));

		Ok(CoordinatorEngine::new(
			self.config,
			identity,
			account,
			api,
			transport,
		))
	}
}

/// Creates every configured implementation of a component and returns the
/// primary one. Any implementation failing to load fails the build.
fn load_primary<T, E, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	T: ?Sized,
	E: Display,
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "Unknown implementation, skipped");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				let is_primary = primary == name;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	if loaded.is_empty() {
		return Err(BuilderError::MissingComponent(format!(
			"No valid {} implementations available",
			component
		)));
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use courier_config::builders::ConfigBuilder;
	use courier_types::Role;

	fn factories() -> CoordinatorFactories<
		courier_account::AccountFactory,
		courier_api::OrderApiFactory,
		courier_transport::TransportFactory,
	> {
		CoordinatorFactories {
			account_factories: courier_account::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			backend_factories: courier_api::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			transport_factories: courier_transport::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	fn fixed_account(config: &mut Config) {
		let table: toml::Value = toml::from_str(
			r#"
			user_id = "cust-1"
			role = "customer"
			token = "secret"
			"#,
		)
		.unwrap();
		config.account.primary = "fixed".into();
		config.account.implementations = HashMap::from([("fixed".to_string(), table)]);
	}

	#[tokio::test]
	async fn test_builds_from_primaries() {
		let mut config = ConfigBuilder::new().build();
		fixed_account(&mut config);

		let engine = CoordinatorBuilder::new(config)
			.build(factories())
			.await
			.unwrap();
		let identity = engine.identity().unwrap();
		assert_eq!(identity.user_id, "cust-1");
		assert_eq!(identity.role, Role::Customer);
	}

	#[tokio::test]
	async fn test_unknown_primary_fails() {
		let mut config = ConfigBuilder::new().build();
		fixed_account(&mut config);
		config.transport.primary = "carrier-pigeon".into();

		let result = CoordinatorBuilder::new(config).build(factories()).await;
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}

	#[tokio::test]
	async fn test_invalid_implementation_config_fails() {
		let mut config = ConfigBuilder::new().build();
		fixed_account(&mut config);
		config.backend.implementations.insert(
			"memory".into(),
			toml::from_str("pending_polls = -1").unwrap(),
		);

		let result = CoordinatorBuilder::new(config).build(factories()).await;
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}
}
