//! Session identity read from environment variables.
//!
//! Variables are read on every call so a session refreshed by the host
//! process is picked up without restarting the client.

use crate::{AccountError, AccountInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Field, FieldType, Identity, Role, Schema, SecretString, ValidationError,
};

/// Names of the environment variables holding the session.
#[derive(Debug, Clone)]
pub struct EnvAccount {
	user_id_var: String,
	role_var: String,
	token_var: String,
	display_name_var: Option<String>,
}

impl EnvAccount {
	pub fn new(user_id_var: String, role_var: String, token_var: String) -> Self {
		Self {
			user_id_var,
			role_var,
			token_var,
			display_name_var: None,
		}
	}

	fn read(var: &str) -> Option<String> {
		std::env::var(var)
			.ok()
			.map(|v| v.trim().to_string())
			.filter(|v| !v.is_empty())
	}
}

impl Default for EnvAccount {
	fn default() -> Self {
		Self::new(
			"COURIER_USER_ID".to_string(),
			"COURIER_ROLE".to_string(),
			"COURIER_TOKEN".to_string(),
		)
	}
}

#[async_trait]
impl AccountInterface for EnvAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EnvAccountSchema)
	}

	async fn identity(&self) -> Result<Identity, AccountError> {
		let user_id = Self::read(&self.user_id_var).ok_or_else(|| {
			AccountError::NotSignedIn(format!("{} is not set", self.user_id_var))
		})?;
		let role = match Self::read(&self.role_var) {
			Some(raw) => raw.parse::<Role>().map_err(AccountError::InvalidSession)?,
			None => Role::Customer,
		};

		Ok(Identity {
			user_id,
			role,
			display_name: self.display_name_var.as_deref().and_then(Self::read),
		})
	}

	async fn credential(&self) -> Result<Option<SecretString>, AccountError> {
		Ok(Self::read(&self.token_var).map(SecretString::new))
	}
}

/// Configuration schema for EnvAccount.
pub struct EnvAccountSchema;

impl ConfigSchema for EnvAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("user_id_var", FieldType::String),
				Field::new("role_var", FieldType::String),
				Field::new("token_var", FieldType::String),
				Field::new("display_name_var", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an environment-backed account.
///
/// Optional configuration parameters:
/// - `user_id_var`: variable holding the user id (default: COURIER_USER_ID)
/// - `role_var`: variable holding the role (default: COURIER_ROLE, role defaults to customer)
/// - `token_var`: variable holding the bearer token (default: COURIER_TOKEN)
/// - `display_name_var`: variable holding the display name
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	EnvAccountSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let var = |key: &str| config.get(key).and_then(|v| v.as_str()).map(String::from);
	let defaults = EnvAccount::default();

	Ok(Box::new(EnvAccount {
		user_id_var: var("user_id_var").unwrap_or(defaults.user_id_var),
		role_var: var("role_var").unwrap_or(defaults.role_var),
		token_var: var("token_var").unwrap_or(defaults.token_var),
		display_name_var: var("display_name_var"),
	}))
}

/// Registry for the environment account implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "env";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}
