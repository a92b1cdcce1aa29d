//! Session identity module for the courier client.
//!
//! This module provides abstractions for resolving who the client acts as and
//! which bearer credential authenticates it. Session storage itself lives
//! outside the client; implementations only read what another component wrote.

use async_trait::async_trait;
use courier_types::{ConfigSchema, Identity, ImplementationRegistry, SecretString};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod env;
	pub mod file;
	pub mod fixed;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// No user is signed in.
	#[error("Not signed in: {0}")]
	NotSignedIn(String),
	/// Session data exists but cannot be understood.
	#[error("Invalid session: {0}")]
	InvalidSession(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for session identity providers.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Resolves the signed-in user.
	async fn identity(&self) -> Result<Identity, AccountError>;

	/// Returns the bearer credential, or `None` when the session has none.
	///
	/// A missing credential is not an error: the client keeps working without
	/// live updates.
	async fn credential(&self) -> Result<Option<SecretString>, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::{env, file, fixed};

	vec![
		(env::Registry::NAME, env::Registry::factory()),
		(file::Registry::NAME, file::Registry::factory()),
		(fixed::Registry::NAME, fixed::Registry::factory()),
	]
}

/// Service that resolves the session identity.
pub struct AccountService {
	/// The underlying account implementation.
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	/// Creates a new AccountService with the specified implementation.
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Resolves the signed-in user.
	pub async fn identity(&self) -> Result<Identity, AccountError> {
		self.implementation.identity().await
	}

	/// Returns the bearer credential if the session has one.
	///
	/// Provider failures are logged and reported as "no credential" so that
	/// the transport degrades instead of failing.
	pub async fn credential(&self) -> Option<SecretString> {
		match self.implementation.credential().await {
			Ok(credential) => credential.filter(|c| !c.is_empty()),
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read session credential");
				None
			},
		}
	}
}
