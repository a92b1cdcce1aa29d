//! Shared fixtures for coordinator tests.

use crate::engine::CoordinatorEngine;
use courier_account::implementations::fixed::FixedAccount;
use courier_account::AccountService;
use courier_api::implementations::memory::MemoryOrderApi;
use courier_api::OrderApiService;
use courier_config::builders::ConfigBuilder;
use courier_transport::implementations::memory::MemoryTransport;
use courier_transport::EventTransport;
use courier_types::{
	Identity, NewOrder, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, Role,
	SecretString, WorkflowEffect,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// An order of customer `cust-1` in the given status.
pub fn order(id: &str, status: OrderStatus) -> Order {
	Order {
		id: id.to_string(),
		status,
		customer_id: "cust-1".to_string(),
		restaurant_id: Some("rest-1".to_string()),
		rider: None,
		items: vec![item()],
		total_price: Decimal::new(1250, 2),
		delivery_address: Some("12 Ring Road".to_string()),
		payment_method: PaymentMethod::Cash,
		payment_status: PaymentStatus::Pending,
		customer_rating: None,
		requires_manual_assignment: false,
		notes: None,
		created_at: 1,
		updated_at: 1,
	}
}

fn item() -> OrderItem {
	OrderItem {
		menu_item_id: "m-1".to_string(),
		name: "Jollof".to_string(),
		quantity: 2,
		unit_price: Decimal::new(625, 2),
	}
}

/// Two items at 6.25 and no delivery fee.
pub fn new_order(payment_method: PaymentMethod) -> NewOrder {
	NewOrder {
		restaurant_id: "rest-1".to_string(),
		items: vec![item()],
		delivery_address: "12 Ring Road".to_string(),
		payment_method,
		delivery_fee: Decimal::ZERO,
		notes: None,
	}
}

/// A coordinator wired to in-memory doubles.
pub struct Harness {
	pub engine: CoordinatorEngine,
	pub api: MemoryOrderApi,
	pub transport: MemoryTransport,
	pub effects: broadcast::Receiver<WorkflowEffect>,
}

impl Harness {
	/// Lets spawned tasks run to completion.
	pub async fn settle(&self) {
		for _ in 0..5 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	/// Effects published since the last drain.
	pub fn drain_effects(&mut self) -> Vec<WorkflowEffect> {
		let mut effects = Vec::new();
		while let Ok(effect) = self.effects.try_recv() {
			effects.push(effect);
		}
		effects
	}
}

pub async fn harness(role: Role, user_id: &str) -> Harness {
	build(Some(Identity::new(user_id, role))).await
}

/// A coordinator without a signed-in user.
pub async fn anonymous_harness() -> Harness {
	build(None).await
}

async fn build(identity: Option<Identity>) -> Harness {
	let api = MemoryOrderApi::new();
	let transport = MemoryTransport::new();
	let account = FixedAccount::new(
		identity
			.clone()
			.unwrap_or_else(|| Identity::new("", Role::Customer)),
		identity.as_ref().map(|_| SecretString::from("test-token")),
	);

	let engine = CoordinatorEngine::new(
		ConfigBuilder::new().build(),
		identity,
		Arc::new(AccountService::new(Box::new(account))),
		Arc::new(OrderApiService::new(Box::new(api.clone()))),
		Arc::new(EventTransport::new(Box::new(transport.clone()))),
	);
	let effects = engine.subscribe_effects();

	Harness {
		engine,
		api,
		transport,
		effects,
	}
}
