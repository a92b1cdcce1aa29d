//! HTTP server for the local courier API.
//!
//! Lets a presentation layer read the active orders and trigger workflow
//! operations on the running coordinator.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
	routing::{get, post},
	Router,
};
use courier_config::ServerConfig;
use courier_core::{CoordinatorEngine, WorkflowError};
use courier_types::{
	truncate_id, APIError, ActiveOrdersResponse, AssignRiderRequest, ConnectionResponse,
	NewOrder, Order, OrderGatesResponse, PlaceOrderResponse, ProcessPaymentRequest,
	RateOrderRequest,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Coordinator serving the requests.
	pub engine: Arc<CoordinatorEngine>,
}

/// Starts the HTTP server and serves until the listener fails.
pub async fn start_server(
	server_config: ServerConfig,
	engine: Arc<CoordinatorEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine);

	let bind_address = format!("{}:{}", server_config.host, server_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!(address = %bind_address, "Courier API server starting");

	axum::serve(listener, app).await?;

	Ok(())
}

/// Builds the `/api` router.
pub fn router(engine: Arc<CoordinatorEngine>) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_place_order))
				.route("/orders/active", get(handle_active_orders))
				.route("/orders/{id}/payment", post(handle_process_payment))
				.route("/orders/{id}/rating", post(handle_rate_order))
				.route("/orders/{id}/accept", post(handle_accept_order))
				.route("/orders/{id}/assign", post(handle_assign_rider))
				.route("/orders/{id}/gates", get(handle_order_gates))
				.route("/connection", get(handle_connection)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(AppState { engine })
}

/// Handles GET /api/orders/active requests.
async fn handle_active_orders(State(state): State<AppState>) -> Json<ActiveOrdersResponse> {
	let snapshot = state.engine.snapshot();
	Json(ActiveOrdersResponse {
		orders: snapshot.active_orders,
		is_placing_order: snapshot.is_placing_order,
		is_processing_payment: snapshot.is_processing_payment,
	})
}

/// Handles POST /api/orders requests.
///
/// The response carries a payment session when the order was placed with an
/// online payment method and the backend started the payment.
async fn handle_place_order(
	State(state): State<AppState>,
	Json(request): Json<NewOrder>,
) -> Result<Json<PlaceOrderResponse>, APIError> {
	match state.engine.place_order(request).await {
		Ok(placed) => Ok(Json(PlaceOrderResponse {
			order: placed.order,
			payment: placed.payment,
		})),
		Err(e) => {
			tracing::warn!(error = %e, "Order placement failed");
			Err(api_error(e))
		},
	}
}

/// Handles POST /api/orders/{id}/payment requests.
///
/// Verification runs in the background; progress shows up in the active
/// orders and the notifications.
async fn handle_process_payment(
	Path(id): Path<String>,
	State(state): State<AppState>,
	Json(request): Json<ProcessPaymentRequest>,
) -> Result<StatusCode, APIError> {
	state
		.engine
		.process_payment(&id, &request.reference)
		.map(|()| StatusCode::ACCEPTED)
		.map_err(|e| {
			tracing::warn!(order_id = %truncate_id(&id), error = %e, "Payment processing failed");
			api_error(e)
		})
}

/// Handles POST /api/orders/{id}/rating requests.
async fn handle_rate_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
	Json(request): Json<RateOrderRequest>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.rate_order(&id, request.rating, request.comment)
		.await
		.map(Json)
		.map_err(|e| {
			tracing::warn!(order_id = %truncate_id(&id), error = %e, "Rating failed");
			api_error(e)
		})
}

/// Handles POST /api/orders/{id}/accept requests.
async fn handle_accept_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.accept_order_as_rider(&id)
		.await
		.map(Json)
		.map_err(|e| {
			tracing::warn!(order_id = %truncate_id(&id), error = %e, "Accepting order failed");
			api_error(e)
		})
}

/// Handles POST /api/orders/{id}/assign requests.
async fn handle_assign_rider(
	Path(id): Path<String>,
	State(state): State<AppState>,
	Json(request): Json<AssignRiderRequest>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.manually_assign_rider(&id, &request.rider_id)
		.await
		.map(Json)
		.map_err(|e| {
			tracing::warn!(order_id = %truncate_id(&id), error = %e, "Manual assignment failed");
			api_error(e)
		})
}

/// Handles GET /api/orders/{id}/gates requests.
async fn handle_order_gates(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<OrderGatesResponse>, APIError> {
	state
		.engine
		.order_gates(&id)
		.map(Json)
		.ok_or_else(|| APIError::NotFound {
			message: format!("Order {} is not active", id),
		})
}

/// Handles GET /api/connection requests.
async fn handle_connection(State(state): State<AppState>) -> Json<ConnectionResponse> {
	Json(ConnectionResponse {
		state: state.engine.connection_state(),
	})
}

/// Maps a workflow failure onto the HTTP error surface.
fn api_error(error: WorkflowError) -> APIError {
	let message = error.user_message();
	match error {
		WorkflowError::Validation(_) => APIError::BadRequest {
			error_type: "INVALID_REQUEST".to_string(),
			message,
		},
		WorkflowError::Unauthenticated(_) => APIError::Unauthorized { message },
		WorkflowError::NotFound(_) => APIError::NotFound { message },
		WorkflowError::BusinessRule(_) => APIError::UnprocessableEntity {
			error_type: "ORDER_REJECTED".to_string(),
			message,
		},
		WorkflowError::Transient(_) => APIError::ServiceUnavailable {
			error_type: "BACKEND_UNAVAILABLE".to_string(),
			message,
		},
		WorkflowError::Backend(_) => APIError::InternalServerError {
			error_type: "BACKEND_ERROR".to_string(),
			message,
		},
	}
}
