//! Session identity read from a JSON session file.
//!
//! The file is written by whatever component owns sign-in and looks like
//! `{"userId": "...", "role": "customer", "token": "..."}`. It is re-read on
//! every call.

use crate::{AccountError, AccountInterface};
use async_trait::async_trait;
use courier_types::{
	ConfigSchema, Field, FieldType, Identity, Role, Schema, SecretString, ValidationError,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
	user_id: Option<String>,
	#[serde(default)]
	role: Option<Role>,
	#[serde(default)]
	token: Option<SecretString>,
	#[serde(default)]
	display_name: Option<String>,
}

/// Account backed by a session file.
pub struct FileAccount {
	path: PathBuf,
}

impl FileAccount {
	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}

	async fn load(&self) -> Result<Option<SessionFile>, AccountError> {
		let content = match tokio::fs::read_to_string(&self.path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(AccountError::Implementation(format!(
					"Failed to read {}: {}",
					self.path.display(),
					e
				)))
			},
		};
		serde_json::from_str(&content)
			.map(Some)
			.map_err(|e| AccountError::InvalidSession(e.to_string()))
	}
}

#[async_trait]
impl AccountInterface for FileAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileAccountSchema)
	}

	async fn identity(&self) -> Result<Identity, AccountError> {
		let session = self
			.load()
			.await?
			.ok_or_else(|| AccountError::NotSignedIn("no session file".into()))?;
		let user_id = session
			.user_id
			.filter(|id| !id.is_empty())
			.ok_or_else(|| AccountError::NotSignedIn("session has no user".into()))?;

		Ok(Identity {
			user_id,
			role: session.role.unwrap_or(Role::Customer),
			display_name: session.display_name,
		})
	}

	async fn credential(&self) -> Result<Option<SecretString>, AccountError> {
		Ok(self.load().await?.and_then(|session| session.token))
	}
}

/// Configuration schema for FileAccount.
pub struct FileAccountSchema;

impl ConfigSchema for FileAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![Field::new("path", FieldType::String)], vec![]);
		schema.validate(config)
	}
}

/// Factory function to create a file-backed account.
///
/// Required configuration parameters:
/// - `path`: location of the JSON session file
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	FileAccountSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let path = config
		.get("path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::Implementation("path is required".into()))?;

	Ok(Box::new(FileAccount::new(PathBuf::from(path))))
}

/// Registry for the session-file account implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl crate::AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_reads_session_file() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("session.json");
		std::fs::write(
			&path,
			r#"{"userId": "ops-1", "role": "admin", "token": "secret"}"#,
		)
		.unwrap();

		let account = FileAccount::new(path);
		let identity = account.identity().await.unwrap();
		assert_eq!(identity.user_id, "ops-1");
		assert_eq!(identity.role, Role::Support);
		assert_eq!(
			account.credential().await.unwrap().unwrap().expose_secret(),
			"secret"
		);
	}

	#[tokio::test]
	async fn test_missing_file_means_signed_out() {
		let temp_dir = TempDir::new().unwrap();
		let account = FileAccount::new(temp_dir.path().join("absent.json"));
		assert!(matches!(
			account.identity().await,
			Err(AccountError::NotSignedIn(_))
		));
		assert!(account.credential().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_corrupt_file_is_invalid_session() {
		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("session.json");
		std::fs::write(&path, "{not json").unwrap();

		let account = FileAccount::new(path);
		assert!(matches!(
			account.identity().await,
			Err(AccountError::InvalidSession(_))
		));
	}
}
