//! Request and response types for the local HTTP API.
//!
//! The local API lets a presentation layer drive the coordinator over HTTP.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ConnectionState, Order, OrderStatus, PaymentSession};

/// Response for `GET /api/orders/active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOrdersResponse {
	pub orders: Vec<Order>,
	pub is_placing_order: bool,
	pub is_processing_payment: bool,
}

/// Response for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
	pub order: Order,
	/// Present when the order must be paid online before it proceeds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payment: Option<PaymentSession>,
}

/// Body of `POST /api/orders/{id}/payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
	pub reference: String,
}

/// Body of `POST /api/orders/{id}/rating`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateOrderRequest {
	pub rating: u8,
	#[serde(default)]
	pub comment: Option<String>,
}

/// Body of `POST /api/orders/{id}/assign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRiderRequest {
	pub rider_id: String,
}

/// Response for `GET /api/orders/{id}/gates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderGatesResponse {
	pub order_id: String,
	pub status: OrderStatus,
	pub status_text: String,
	pub can_open_chat: bool,
	pub can_rate: bool,
	pub needs_customer_care: bool,
}

/// Response for `GET /api/connection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
	pub state: ConnectionState,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Whether repeating the request may succeed
	pub retryable: bool,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed input (400)
	BadRequest { error_type: String, message: String },
	/// No session identity (401)
	Unauthorized { message: String },
	/// Unknown order (404)
	NotFound { message: String },
	/// Business-rule rejection (422)
	UnprocessableEntity { error_type: String, message: String },
	/// Backend unreachable, may be retried (503)
	ServiceUnavailable { error_type: String, message: String },
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Unauthorized { .. } => 401,
			APIError::NotFound { .. } => 404,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message) = match self {
			APIError::BadRequest { error_type, message }
			| APIError::UnprocessableEntity { error_type, message }
			| APIError::ServiceUnavailable { error_type, message }
			| APIError::InternalServerError { error_type, message } => {
				(error_type.clone(), message.clone())
			},
			APIError::Unauthorized { message } => ("UNAUTHORIZED".to_string(), message.clone()),
			APIError::NotFound { message } => ("NOT_FOUND".to_string(), message.clone()),
		};
		ErrorResponse {
			error,
			message,
			retryable: matches!(self, APIError::ServiceUnavailable { .. }),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::Unauthorized { message } => write!(f, "Unauthorized: {}", message),
			APIError::NotFound { message } => write!(f, "Not Found: {}", message),
			APIError::UnprocessableEntity { message, .. } => {
				write!(f, "Unprocessable Entity: {}", message)
			},
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_response_mapping() {
		let err = APIError::ServiceUnavailable {
			error_type: "BACKEND_UNAVAILABLE".into(),
			message: "timed out".into(),
		};
		assert_eq!(err.status_code(), 503);
		let body = err.to_error_response();
		assert!(body.retryable);
		assert_eq!(body.error, "BACKEND_UNAVAILABLE");

		let err = APIError::UnprocessableEntity {
			error_type: "ORDER_ALREADY_ASSIGNED".into(),
			message: "Order already has a rider".into(),
		};
		assert_eq!(err.status_code(), 422);
		assert!(!err.to_error_response().retryable);
	}
}
