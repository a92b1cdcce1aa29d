//! Main entry point for the courier client service.
//!
//! Runs the order-workflow coordinator for one signed-in user: it keeps the
//! user's active orders in sync with the backend and the realtime channel,
//! and surfaces the resulting notifications. An optional local HTTP API lets
//! a presentation layer drive it.

use clap::Parser;
use courier_config::Config;
use courier_core::{CoordinatorBuilder, CoordinatorEngine};
use courier_types::{truncate_id, NotificationLevel, WorkflowEffect};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

mod factory_registry;
mod server;

use factory_registry::FactoryRegistry;

/// Command-line arguments for the courier service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "COURIER_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!(client_id = %config.client.id, "Loaded configuration");

	let engine = Arc::new(build_coordinator(config.clone()).await?);
	tokio::spawn(log_effects(engine.subscribe_effects()));

	match config.server.filter(|server| server.enabled) {
		Some(server_config) => {
			let api_engine = Arc::clone(&engine);

			tokio::select! {
				result = engine.run() => {
					tracing::info!("Coordinator finished");
					result?;
				}
				result = server::start_server(server_config, api_engine) => {
					tracing::info!("API server finished");
					result?;
					engine.shutdown().await?;
				}
			}
		},
		None => {
			tracing::info!("Starting coordinator only");
			engine.run().await?;
		},
	}

	tracing::info!("Stopped courier client");
	Ok(())
}

/// Builds the coordinator from the implementations named in configuration.
async fn build_coordinator(config: Config) -> Result<CoordinatorEngine, Box<dyn std::error::Error>> {
	let factories = FactoryRegistry::with_builtin().into_factories();
	Ok(CoordinatorBuilder::new(config).build(factories).await?)
}

/// Writes every workflow effect to the log until the bus closes.
async fn log_effects(mut effects: broadcast::Receiver<WorkflowEffect>) {
	loop {
		match effects.recv().await {
			Ok(WorkflowEffect::Notify(notification)) => match notification.level {
				NotificationLevel::Error | NotificationLevel::Warning => tracing::warn!(
					audience = %notification.audience,
					order_id = ?notification.order_id.as_deref().map(truncate_id),
					title = %notification.title,
					"{}",
					notification.message
				),
				_ => tracing::info!(
					audience = %notification.audience,
					order_id = ?notification.order_id.as_deref().map(truncate_id),
					title = %notification.title,
					"{}",
					notification.message
				),
			},
			Ok(effect) => tracing::debug!(effect = effect.name(), "Workflow effect"),
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				tracing::warn!(skipped, "Effect log lagging behind");
			},
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["courier"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["courier", "--config", "demo.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("demo.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[tokio::test]
	async fn test_build_coordinator_from_file() {
		let mut file = NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
[client]
id = "courier-test"

[account]
primary = "fixed"
[account.implementations.fixed]
user_id = "rider-7"
role = "rider"

[transport]
primary = "noop"
[transport.implementations.noop]

[backend]
primary = "memory"
[backend.implementations.memory]
"#
		)
		.unwrap();

		let config = Config::from_file(file.path().to_str().unwrap())
			.await
			.unwrap();
		let engine = build_coordinator(config).await.unwrap();
		let identity = engine.identity().unwrap();
		assert_eq!(identity.user_id, "rider-7");
		assert!(engine.snapshot().active_orders.is_empty());
	}

	#[tokio::test]
	async fn test_demo_config_loads() {
		let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/demo.toml");
		let config = Config::from_file(path).await.unwrap();
		assert_eq!(config.client.id, "courier-demo");
		assert!(config.server.as_ref().is_some_and(|server| server.enabled));

		build_coordinator(config).await.unwrap();
	}
}
