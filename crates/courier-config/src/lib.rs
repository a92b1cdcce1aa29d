//! Configuration module for the courier order-workflow client.
//!
//! This module provides structures and utilities for managing client configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(any(test, feature = "testing"))]
pub mod builders;
mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the courier client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to this client instance.
	pub client: ClientConfig,
	/// Where the session identity and bearer credential come from.
	pub account: AccountConfig,
	/// Backend REST collaborator.
	pub backend: BackendConfig,
	/// Realtime event transport.
	pub transport: TransportConfig,
	/// Timing of workflow side effects.
	#[serde(default)]
	pub workflow: WorkflowConfig,
	/// Optional local HTTP API for presentation layers.
	pub server: Option<ServerConfig>,
}

/// Configuration specific to the client instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
	/// Identifier of this client instance, used in logs.
	pub id: String,
}

/// Configuration for the session identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the backend REST collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of backend implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the realtime transport.
///
/// Selecting the `noop` implementation runs the client without live updates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of transport implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Timing of workflow side effects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
	/// How long an order may wait in `ready` without a rider before support
	/// is asked to assign one manually.
	#[serde(default = "default_escalation_timeout_seconds")]
	pub escalation_timeout_seconds: u64,
	/// Delay before opening the chat once an order awaits confirmation.
	#[serde(default = "default_chat_navigation_delay_ms")]
	pub chat_navigation_delay_ms: u64,
	/// Delay before prompting the customer to rate a delivered order.
	#[serde(default = "default_rating_prompt_delay_ms")]
	pub rating_prompt_delay_ms: u64,
	/// Interval between payment verification polls.
	#[serde(default = "default_payment_poll_interval_seconds")]
	pub payment_poll_interval_seconds: u64,
	/// Number of verification polls before giving up.
	#[serde(default = "default_payment_poll_max_attempts")]
	pub payment_poll_max_attempts: u32,
	/// Whether a customer's loyalty summary is refreshed on delivery.
	#[serde(default = "default_refresh_loyalty_on_delivery")]
	pub refresh_loyalty_on_delivery: bool,
}

impl Default for WorkflowConfig {
	fn default() -> Self {
		Self {
			escalation_timeout_seconds: default_escalation_timeout_seconds(),
			chat_navigation_delay_ms: default_chat_navigation_delay_ms(),
			rating_prompt_delay_ms: default_rating_prompt_delay_ms(),
			payment_poll_interval_seconds: default_payment_poll_interval_seconds(),
			payment_poll_max_attempts: default_payment_poll_max_attempts(),
			refresh_loyalty_on_delivery: default_refresh_loyalty_on_delivery(),
		}
	}
}

impl WorkflowConfig {
	pub fn escalation_timeout(&self) -> Duration {
		Duration::from_secs(self.escalation_timeout_seconds)
	}

	pub fn chat_navigation_delay(&self) -> Duration {
		Duration::from_millis(self.chat_navigation_delay_ms)
	}

	pub fn rating_prompt_delay(&self) -> Duration {
		Duration::from_millis(self.rating_prompt_delay_ms)
	}

	pub fn payment_poll_interval(&self) -> Duration {
		Duration::from_secs(self.payment_poll_interval_seconds)
	}
}

/// Returns the default escalation timeout in seconds (5 minutes).
fn default_escalation_timeout_seconds() -> u64 {
	300
}

/// Returns the default chat navigation delay in milliseconds.
fn default_chat_navigation_delay_ms() -> u64 {
	2000
}

/// Returns the default rating prompt delay in milliseconds.
fn default_rating_prompt_delay_ms() -> u64 {
	3000
}

/// Returns the default payment poll interval in seconds.
fn default_payment_poll_interval_seconds() -> u64 {
	5
}

/// Returns the default number of payment polls (5 minutes at the default interval).
fn default_payment_poll_max_attempts() -> u32 {
	60
}

fn default_refresh_loyalty_on_delivery() -> bool {
	true
}

/// Configuration for the local HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_server_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_server_port")]
	pub port: u16,
	/// CORS configuration.
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	/// Allowed origins for CORS.
	pub allowed_origins: Vec<String>,
}

/// Returns the default API host (localhost).
fn default_server_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_server_port() -> u16 {
	4000
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to keep positions valid
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

/// Checks that a `primary` implementation is present in its table.
fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads configuration from a file with environment variable resolution.
	///
	/// Supports `include = ["file1.toml", "file2.toml"]` in the top-level file;
	/// each section must be unique across all of them.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		loader::load(Path::new(path)).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.client.id.is_empty() {
			return Err(ConfigError::Validation("Client ID cannot be empty".into()));
		}

		validate_primary("account", &self.account.primary, &self.account.implementations)?;
		validate_primary("backend", &self.backend.primary, &self.backend.implementations)?;
		validate_primary(
			"transport",
			&self.transport.primary,
			&self.transport.implementations,
		)?;

		if let Some(http) = self.backend.implementations.get("http") {
			let base_url = http.get("base_url").and_then(|v| v.as_str()).ok_or_else(|| {
				ConfigError::Validation("Backend 'http' requires a base_url".into())
			})?;
			if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
				return Err(ConfigError::Validation(format!(
					"Backend base_url must start with http:// or https://, got '{}'",
					base_url
				)));
			}
		}

		let workflow = &self.workflow;
		if workflow.escalation_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"escalation_timeout_seconds must be greater than 0".into(),
			));
		}
		if workflow.payment_poll_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"payment_poll_interval_seconds must be greater than 0".into(),
			));
		}
		if workflow.payment_poll_max_attempts == 0 {
			return Err(ConfigError::Validation(
				"payment_poll_max_attempts must be at least 1".into(),
			));
		}

		if let Some(server) = &self.server {
			if server.enabled && server.port == 0 {
				return Err(ConfigError::Validation(
					"Server port must be set when the server is enabled".into(),
				));
			}
		}

		Ok(())
	}
}

/// Parses configuration from a TOML string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
