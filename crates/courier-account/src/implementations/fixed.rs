//! Fixed session identity taken from configuration.
//!
//! Useful for demos and tests where no sign-in flow exists.

use crate::{AccountError, AccountInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Field, FieldType, Identity, Role, Schema, SecretString, ValidationError,
};

/// Account that always reports the same identity.
pub struct FixedAccount {
	identity: Identity,
	token: Option<SecretString>,
}

impl FixedAccount {
	pub fn new(identity: Identity, token: Option<SecretString>) -> Self {
		Self { identity, token }
	}
}

#[async_trait]
impl AccountInterface for FixedAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FixedAccountSchema)
	}

	async fn identity(&self) -> Result<Identity, AccountError> {
		Ok(self.identity.clone())
	}

	async fn credential(&self) -> Result<Option<SecretString>, AccountError> {
		Ok(self.token.clone())
	}
}

/// Configuration schema for FixedAccount.
pub struct FixedAccountSchema;

impl ConfigSchema for FixedAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("user_id", FieldType::String)],
			vec![
				Field::new("role", FieldType::String).with_validator(|value| {
					value
						.as_str()
						.unwrap_or_default()
						.parse::<Role>()
						.map(|_| ())
				}),
				Field::new("token", FieldType::String),
				Field::new("display_name", FieldType::String),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a fixed account.
///
/// Required configuration parameters:
/// - `user_id`: the user to act as
///
/// Optional configuration parameters:
/// - `role`: customer, rider or support (default: customer)
/// - `token`: bearer credential
/// - `display_name`: human-readable name
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	FixedAccountSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let field = |key: &str| config.get(key).and_then(|v| v.as_str());
	let role = match field("role") {
		Some(raw) => raw.parse::<Role>().map_err(AccountError::Implementation)?,
		None => Role::Customer,
	};
	let identity = Identity {
		user_id: field("user_id").unwrap_or_default().to_string(),
		role,
		display_name: field("display_name").map(String::from),
	};

	Ok(Box::new(FixedAccount::new(
		identity,
		field("token").map(SecretString::from),
	)))
}

/// Registry for the fixed account implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "fixed";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}
