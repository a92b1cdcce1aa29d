//! Backend order API module for the courier client.
//!
//! The backend owns every order. This module defines the operations the
//! client consumes from it and a service wrapper that logs failures with the
//! order they concern. Implementations translate transport problems and
//! business-rule rejections into distinct [`ApiError`] variants so callers
//! can tell a retryable failure from a final answer.

use async_trait::async_trait;
use courier_types::{
	truncate_id, ConfigSchema, CreateOrderRequest, ImplementationRegistry, LoyaltySummary, Order,
	OrderFilter, OrderStatus, PaymentSession, PaymentVerification, SecretString,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod memory;
}

/// Errors returned by the backend API.
#[derive(Debug, Error)]
pub enum ApiError {
	/// The backend refused the request on business grounds.
	#[error("Rejected ({status}): {message}")]
	Rejected { status: u16, message: String },
	/// The order or resource does not exist.
	#[error("Not found: {0}")]
	NotFound(String),
	/// The credential is missing or no longer accepted.
	#[error("Unauthorized: {0}")]
	Unauthorized(String),
	/// The backend could not be reached or failed internally.
	#[error("Backend unavailable: {0}")]
	Unavailable(String),
	/// The backend answered with a body the client cannot read.
	#[error("Decode error: {0}")]
	Decode(String),
	/// The implementation is misconfigured.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl ApiError {
	/// Whether repeating the same request may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, ApiError::Unavailable(_))
	}
}

/// Trait defining the backend operations the client consumes.
#[async_trait]
pub trait OrderApiInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Sets the bearer credential used for subsequent calls.
	async fn authorize(&self, _credential: Option<SecretString>) {}

	/// Fetches the authoritative state of one order.
	async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError>;

	/// Lists orders matching a filter.
	async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ApiError>;

	/// Creates an order.
	async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError>;

	/// Moves an order to a new status.
	async fn update_order_status(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<Order, ApiError>;

	/// Attaches a rider to an order.
	async fn assign_rider(&self, order_id: &str, rider_id: &str) -> Result<Order, ApiError>;

	/// Marks an order as needing manual rider assignment.
	async fn flag_manual_assignment(&self, order_id: &str) -> Result<Order, ApiError>;

	/// Starts an out-of-band payment for an order.
	async fn initiate_payment(&self, order_id: &str) -> Result<PaymentSession, ApiError>;

	/// Checks the state of a payment.
	async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, ApiError>;

	/// Records the customer's rating of a delivered order.
	async fn submit_rating(
		&self,
		order_id: &str,
		rating: u8,
		comment: Option<&str>,
	) -> Result<Order, ApiError>;

	/// Fetches a customer's loyalty standing.
	async fn loyalty_summary(&self, customer_id: &str) -> Result<LoyaltySummary, ApiError>;
}

/// Type alias for order API factory functions.
pub type OrderApiFactory = fn(&toml::Value) -> Result<Box<dyn OrderApiInterface>, ApiError>;

/// Registry trait for order API implementations.
pub trait OrderApiRegistry: ImplementationRegistry<Factory = OrderApiFactory> {}

/// Get all registered order API implementations.
pub fn get_all_implementations() -> Vec<(&'static str, OrderApiFactory)> {
	use implementations::{http, memory};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Service wrapping the configured backend implementation.
pub struct OrderApiService {
	implementation: Box<dyn OrderApiInterface>,
}

impl OrderApiService {
	/// Creates a new OrderApiService with the specified implementation.
	pub fn new(implementation: Box<dyn OrderApiInterface>) -> Self {
		Self { implementation }
	}

	pub async fn authorize(&self, credential: Option<SecretString>) {
		self.implementation.authorize(credential).await
	}

	pub async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError> {
		self.implementation
			.fetch_order(order_id)
			.await
			.inspect_err(|e| log_failure("fetch_order", order_id, e))
	}

	pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ApiError> {
		self.implementation
			.list_orders(filter)
			.await
			.inspect_err(|e| tracing::warn!(error = %e, "list_orders failed"))
	}

	pub async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
		self.implementation
			.create_order(request)
			.await
			.inspect_err(|e| tracing::warn!(error = %e, "create_order failed"))
	}

	pub async fn update_order_status(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<Order, ApiError> {
		self.implementation
			.update_order_status(order_id, status)
			.await
			.inspect_err(|e| log_failure("update_order_status", order_id, e))
	}

	pub async fn assign_rider(&self, order_id: &str, rider_id: &str) -> Result<Order, ApiError> {
		self.implementation
			.assign_rider(order_id, rider_id)
			.await
			.inspect_err(|e| log_failure("assign_rider", order_id, e))
	}

	pub async fn flag_manual_assignment(&self, order_id: &str) -> Result<Order, ApiError> {
		self.implementation
			.flag_manual_assignment(order_id)
			.await
			.inspect_err(|e| log_failure("flag_manual_assignment", order_id, e))
	}

	pub async fn initiate_payment(&self, order_id: &str) -> Result<PaymentSession, ApiError> {
		self.implementation
			.initiate_payment(order_id)
			.await
			.inspect_err(|e| log_failure("initiate_payment", order_id, e))
	}

	/// Verification failures are expected while polling and logged at debug.
	pub async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, ApiError> {
		self.implementation
			.verify_payment(reference)
			.await
			.inspect_err(|e| tracing::debug!(reference = %reference, error = %e, "verify_payment failed"))
	}

	pub async fn submit_rating(
		&self,
		order_id: &str,
		rating: u8,
		comment: Option<&str>,
	) -> Result<Order, ApiError> {
		self.implementation
			.submit_rating(order_id, rating, comment)
			.await
			.inspect_err(|e| log_failure("submit_rating", order_id, e))
	}

	pub async fn loyalty_summary(&self, customer_id: &str) -> Result<LoyaltySummary, ApiError> {
		self.implementation.loyalty_summary(customer_id).await
	}
}

fn log_failure(operation: &str, order_id: &str, error: &ApiError) {
	if error.is_transient() {
		tracing::warn!(operation, order_id = %truncate_id(order_id), error = %error, "Backend call failed");
	} else {
		tracing::debug!(operation, order_id = %truncate_id(order_id), error = %error, "Backend call rejected");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_only_unavailable_is_transient() {
		assert!(ApiError::Unavailable("timeout".into()).is_transient());
		assert!(!ApiError::NotFound("o-1".into()).is_transient());
		assert!(!ApiError::Rejected {
			status: 409,
			message: "taken".into()
		}
		.is_transient());
	}

	#[test]
	fn test_all_implementations_registered() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["http", "memory"]);
	}
}
