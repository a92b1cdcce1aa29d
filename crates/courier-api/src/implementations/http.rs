//! REST implementation of the backend order API.
//!
//! Every call carries the session's bearer token. Responses outside the 2xx
//! range are mapped by status class: 404 to `NotFound`, 401/403 to
//! `Unauthorized`, other 4xx to `Rejected` with the backend's message, and
//! 5xx or transport failures to `Unavailable`.

use crate::{ApiError, OrderApiInterface};
use async_trait::async_trait;
use courier_types::{
	url_validator, ConfigSchema, CreateOrderRequest, Field, FieldType, LoyaltySummary, Order,
	OrderFilter, OrderStatus, PaymentSession, PaymentVerification, Schema, SecretString,
	ValidationError,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

/// Error body shapes the backend is known to send.
#[derive(Debug, Deserialize)]
struct ErrorBody {
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	error: Option<String>,
}

/// Backend API over HTTP.
pub struct HttpOrderApi {
	client: Client,
	base_url: String,
	credential: RwLock<Option<SecretString>>,
}

impl HttpOrderApi {
	/// Creates a client for the given base URL.
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ApiError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
			credential: RwLock::new(None),
		})
	}

	async fn request(&self, method: Method, path: &str) -> RequestBuilder {
		let builder = self
			.client
			.request(method, format!("{}{}", self.base_url, path));
		match self.credential.read().await.as_ref() {
			Some(token) => builder.bearer_auth(token.expose_secret()),
			None => builder,
		}
	}

	async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
		let response = builder.send().await.map_err(map_transport_error)?;
		decode(response).await
	}
}

fn map_transport_error(error: reqwest::Error) -> ApiError {
	if error.is_timeout() {
		ApiError::Unavailable(format!("request timed out: {}", error))
	} else if error.is_decode() {
		ApiError::Decode(error.to_string())
	} else {
		ApiError::Unavailable(error.to_string())
	}
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
	let status = response.status();
	if status.is_success() {
		return response
			.json::<T>()
			.await
			.map_err(|e| ApiError::Decode(e.to_string()));
	}

	let body = response.text().await.unwrap_or_default();
	let message = serde_json::from_str::<ErrorBody>(&body)
		.ok()
		.and_then(|b| b.message.or(b.error))
		.unwrap_or_else(|| {
			status
				.canonical_reason()
				.unwrap_or("request failed")
				.to_string()
		});

	Err(match status {
		StatusCode::NOT_FOUND => ApiError::NotFound(message),
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
		StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
			ApiError::Unavailable(message)
		},
		s if s.is_server_error() => ApiError::Unavailable(message),
		s => ApiError::Rejected {
			status: s.as_u16(),
			message,
		},
	})
}

#[async_trait]
impl OrderApiInterface for HttpOrderApi {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpOrderApiSchema)
	}

	async fn authorize(&self, credential: Option<SecretString>) {
		*self.credential.write().await = credential;
	}

	async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError> {
		let builder = self
			.request(Method::GET, &format!("/orders/{}", order_id))
			.await;
		self.send(builder).await
	}

	async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ApiError> {
		let mut query: Vec<(&str, String)> = Vec::new();
		if let Some(customer_id) = &filter.customer_id {
			query.push(("customerId", customer_id.clone()));
		}
		if let Some(rider_id) = &filter.rider_id {
			query.push(("riderId", rider_id.clone()));
		}
		if !filter.statuses.is_empty() {
			let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
			query.push(("status", statuses.join(",")));
		}

		let builder = self.request(Method::GET, "/orders").await.query(&query);
		self.send(builder).await
	}

	async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
		let builder = self.request(Method::POST, "/orders").await.json(request);
		self.send(builder).await
	}

	async fn update_order_status(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<Order, ApiError> {
		let builder = self
			.request(Method::PATCH, &format!("/orders/{}/status", order_id))
			.await
			.json(&json!({ "status": status }));
		self.send(builder).await
	}

	async fn assign_rider(&self, order_id: &str, rider_id: &str) -> Result<Order, ApiError> {
		let builder = self
			.request(Method::POST, &format!("/orders/{}/assign", order_id))
			.await
			.json(&json!({ "riderId": rider_id }));
		self.send(builder).await
	}

	async fn flag_manual_assignment(&self, order_id: &str) -> Result<Order, ApiError> {
		let builder = self
			.request(Method::PATCH, &format!("/orders/{}", order_id))
			.await
			.json(&json!({ "requiresManualAssignment": true }));
		self.send(builder).await
	}

	async fn initiate_payment(&self, order_id: &str) -> Result<PaymentSession, ApiError> {
		let builder = self
			.request(Method::POST, "/payments/initialize")
			.await
			.json(&json!({ "orderId": order_id }));
		self.send(builder).await
	}

	async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, ApiError> {
		let builder = self
			.request(Method::GET, &format!("/payments/verify/{}", reference))
			.await;
		self.send(builder).await
	}

	async fn submit_rating(
		&self,
		order_id: &str,
		rating: u8,
		comment: Option<&str>,
	) -> Result<Order, ApiError> {
		let builder = self
			.request(Method::POST, &format!("/orders/{}/rating", order_id))
			.await
			.json(&json!({ "rating": rating, "comment": comment }));
		self.send(builder).await
	}

	async fn loyalty_summary(&self, customer_id: &str) -> Result<LoyaltySummary, ApiError> {
		let builder = self
			.request(Method::GET, &format!("/loyalty/{}", customer_id))
			.await;
		self.send(builder).await
	}
}

/// Configuration schema for HttpOrderApi.
pub struct HttpOrderApiSchema;

impl ConfigSchema for HttpOrderApiSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::String)
				.with_validator(url_validator(&["http", "https"]))],
			vec![Field::new(
				"timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(300),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create the HTTP backend client.
///
/// Required configuration parameters:
/// - `base_url`: root of the REST API
///
/// Optional configuration parameters:
/// - `timeout_seconds`: per-request timeout (default: 15)
pub fn create_order_api(config: &toml::Value) -> Result<Box<dyn OrderApiInterface>, ApiError> {
	HttpOrderApiSchema
		.validate(config)
		.map_err(|e| ApiError::Configuration(format!("Invalid configuration: {}", e)))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ApiError::Configuration("base_url is required".into()))?;
	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.unwrap_or(15) as u64;

	Ok(Box::new(HttpOrderApi::new(
		base_url,
		Duration::from_secs(timeout_seconds),
	)?))
}

/// Registry for the HTTP backend implementation.
pub struct Registry;

impl courier_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = crate::OrderApiFactory;

	fn factory() -> Self::Factory {
		create_order_api
	}
}

impl crate::OrderApiRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::Path;
	use axum::http::{HeaderMap, StatusCode as AxumStatus};
	use axum::routing::{get, post};
	use axum::{Json, Router};

	async fn spawn_backend() -> String {
		let app = Router::new()
			.route(
				"/orders/{id}",
				get(|Path(id): Path<String>, headers: HeaderMap| async move {
					if headers.get("authorization").is_none() {
						return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "no token"})));
					}
					if id == "missing" {
						return (AxumStatus::NOT_FOUND, Json(json!({"message": "Order not found"})));
					}
					(
						AxumStatus::OK,
						Json(json!({
							"id": id,
							"status": "ready",
							"customerId": "cust-1",
							"totalPrice": "18.00",
							"createdAt": 1,
							"updatedAt": 2
						})),
					)
				}),
			)
			.route(
				"/orders/{id}/assign",
				post(|| async {
					(
						AxumStatus::CONFLICT,
						Json(json!({"error": "Order already has a rider"})),
					)
				}),
			)
			.route(
				"/payments/verify/{reference}",
				get(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
			);

		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{}", addr)
	}

	#[tokio::test]
	async fn test_error_mapping() {
		let base_url = spawn_backend().await;
		let api = HttpOrderApi::new(&base_url, Duration::from_secs(5)).unwrap();

		assert!(matches!(
			api.fetch_order("o-1").await,
			Err(ApiError::Unauthorized(_))
		));

		api.authorize(Some(SecretString::from("tok"))).await;
		let order = api.fetch_order("o-1").await.unwrap();
		assert_eq!(order.status, OrderStatus::Ready);

		match api.fetch_order("missing").await {
			Err(ApiError::NotFound(message)) => assert_eq!(message, "Order not found"),
			other => panic!("unexpected {:?}", other),
		}

		match api.assign_rider("o-1", "r-1").await {
			Err(ApiError::Rejected { status, message }) => {
				assert_eq!(status, 409);
				assert_eq!(message, "Order already has a rider");
			},
			other => panic!("unexpected {:?}", other),
		}

		let err = api.verify_payment("ref-1").await.unwrap_err();
		assert!(err.is_transient());
	}

	#[tokio::test]
	async fn test_unreachable_backend_is_transient() {
		let api = HttpOrderApi::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
		let err = api.fetch_order("o-1").await.unwrap_err();
		assert!(err.is_transient());
	}

	#[test]
	fn test_factory_validates_url() {
		let config: toml::Value = toml::from_str("base_url = \"ftp://example.com\"").unwrap();
		assert!(create_order_api(&config).is_err());
		let config: toml::Value = toml::from_str("base_url = \"https://example.com\"").unwrap();
		assert!(create_order_api(&config).is_ok());
	}
}
