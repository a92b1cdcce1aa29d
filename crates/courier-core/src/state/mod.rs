//! Local workflow state.
//!
//! Everything the coordinator tracks about the session lives in one
//! [`WorkflowState`] behind one mutex: the active orders, the escalation
//! timers, scheduled deferred effects, and the subscriptions held per order.
//! Holding a single lock means a timer change and the order mutation that
//! caused it are always observed together. The lock is never held across an
//! await point.

pub mod locks;

pub use locks::OrderLocks;

use crate::subscriptions::Subscription;
use crate::timers::EscalationTimers;
use courier_types::{Order, OrderStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Effects that fire once after a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredKind {
	NavigateToChat,
	PromptRating,
}

/// How many retired orders are remembered to absorb late events.
const FINISHED_CAPACITY: usize = 256;

/// Last state seen of an order that left the active set in a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FinishedOrder {
	pub status: OrderStatus,
	pub updated_at: u64,
}

/// Observable view of the workflow, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
	/// Active orders, oldest first.
	pub active_orders: Vec<Order>,
	pub is_placing_order: bool,
	pub is_processing_payment: bool,
}

/// Mutable coordinator state.
pub struct WorkflowState {
	pub(crate) orders: HashMap<String, Order>,
	pub(crate) timers: EscalationTimers,
	pub(crate) deferred: HashMap<(String, DeferredKind), AbortHandle>,
	/// Orders whose one-time deferred effect was already scheduled.
	pub(crate) scheduled_once: HashSet<(String, DeferredKind)>,
	pub(crate) rated: HashSet<String>,
	/// Retired orders, bounded by [`FINISHED_CAPACITY`].
	pub(crate) finished: HashMap<String, FinishedOrder>,
	pub(crate) order_subscriptions: HashMap<String, Subscription>,
	/// Rider-location subscriptions of orders out for delivery.
	pub(crate) rider_tracking: HashMap<String, Subscription>,
	pub(crate) payments: HashMap<String, AbortHandle>,
	pub(crate) placing: usize,
	/// Set by teardown; a closed state accepts no further changes.
	pub(crate) closed: bool,
}

impl WorkflowState {
	pub fn new(escalation_timeout: Duration) -> Self {
		Self {
			orders: HashMap::new(),
			timers: EscalationTimers::new(escalation_timeout),
			deferred: HashMap::new(),
			scheduled_once: HashSet::new(),
			rated: HashSet::new(),
			finished: HashMap::new(),
			order_subscriptions: HashMap::new(),
			rider_tracking: HashMap::new(),
			payments: HashMap::new(),
			placing: 0,
			closed: false,
		}
	}

	pub fn order(&self, order_id: &str) -> Option<&Order> {
		self.orders.get(order_id)
	}

	pub fn timers(&self) -> &EscalationTimers {
		&self.timers
	}

	/// Cancels a pending deferred effect. Returns whether one was pending.
	pub(crate) fn cancel_deferred(&mut self, order_id: &str, kind: DeferredKind) -> bool {
		match self.deferred.remove(&(order_id.to_string(), kind)) {
			Some(handle) => {
				handle.abort();
				true
			},
			None => false,
		}
	}

	/// Forgets the per-order bookkeeping of an order that reached a terminal
	/// status and left the active set. Only its last status and `updated_at`
	/// are kept, for the newest [`FINISHED_CAPACITY`] orders at most.
	pub(crate) fn retire(&mut self, order: &Order) {
		self.cancel_deferred(&order.id, DeferredKind::NavigateToChat);
		self.cancel_deferred(&order.id, DeferredKind::PromptRating);
		self.scheduled_once
			.retain(|(order_id, _)| order_id != &order.id);
		self.rated.remove(&order.id);
		self.finished.insert(
			order.id.clone(),
			FinishedOrder {
				status: order.status,
				updated_at: order.updated_at,
			},
		);
		if self.finished.len() > FINISHED_CAPACITY {
			let oldest = self
				.finished
				.iter()
				.min_by_key(|(_, finished)| finished.updated_at)
				.map(|(order_id, _)| order_id.clone());
			if let Some(order_id) = oldest {
				self.finished.remove(&order_id);
			}
		}
	}

	/// Builds the observable view of the current state.
	pub fn snapshot(&self) -> WorkflowSnapshot {
		let mut active_orders: Vec<Order> = self.orders.values().cloned().collect();
		active_orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
		WorkflowSnapshot {
			active_orders,
			is_placing_order: self.placing > 0,
			is_processing_payment: !self.payments.is_empty(),
		}
	}

	/// Cancels every timer, deferred effect and payment monitor.
	///
	/// Returns the subscriptions so the caller can drop them outside the lock.
	pub(crate) fn teardown(&mut self) -> Vec<Subscription> {
		self.closed = true;
		let timers = self.timers.disarm_all();
		for (_, handle) in self.deferred.drain() {
			handle.abort();
		}
		for (_, handle) in self.payments.drain() {
			handle.abort();
		}
		if timers > 0 {
			tracing::info!(timers, "Cancelled escalation timers");
		}
		self.scheduled_once.clear();
		self.rated.clear();
		self.finished.clear();
		self.order_subscriptions
			.drain()
			.chain(self.rider_tracking.drain())
			.map(|(_, subscription)| subscription)
			.collect()
	}
}

/// Shared handle to the workflow state.
pub struct SharedState {
	inner: Mutex<WorkflowState>,
}

impl SharedState {
	pub fn new(escalation_timeout: Duration) -> Self {
		Self {
			inner: Mutex::new(WorkflowState::new(escalation_timeout)),
		}
	}

	/// Locks the state. A poisoned lock is recovered, since every mutation
	/// leaves the state consistent before it can panic.
	pub fn lock(&self) -> MutexGuard<'_, WorkflowState> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::order;

	#[tokio::test]
	async fn test_snapshot_sorted_by_creation() {
		let mut state = WorkflowState::new(Duration::from_secs(300));
		let mut newer = order("o-2", OrderStatus::Pending);
		newer.created_at = 20;
		let mut older = order("o-1", OrderStatus::Preparing);
		older.created_at = 10;
		state.orders.insert(newer.id.clone(), newer);
		state.orders.insert(older.id.clone(), older);
		state.placing = 1;

		let snapshot = state.snapshot();
		let ids: Vec<_> = snapshot.active_orders.iter().map(|o| o.id.as_str()).collect();
		assert_eq!(ids, vec!["o-1", "o-2"]);
		assert!(snapshot.is_placing_order);
		assert!(!snapshot.is_processing_payment);
	}

	#[tokio::test(start_paused = true)]
	async fn test_teardown_is_idempotent() {
		let mut state = WorkflowState::new(Duration::from_secs(300));
		state.timers.arm("o-1", |_| async {});
		let handle = tokio::spawn(std::future::pending::<()>()).abort_handle();
		state
			.deferred
			.insert(("o-1".to_string(), DeferredKind::PromptRating), handle);

		assert!(state.teardown().is_empty());
		assert!(state.timers.is_empty());
		assert!(state.deferred.is_empty());
		assert!(state.teardown().is_empty());
		assert!(!state.cancel_deferred("o-1", DeferredKind::PromptRating));
		assert!(state.closed);
	}

	#[test]
	fn test_retire_forgets_bookkeeping() {
		let mut state = WorkflowState::new(Duration::from_secs(300));
		let mut delivered = order("o-1", OrderStatus::Delivered);
		delivered.updated_at = 7;
		state.rated.insert("o-1".into());
		state
			.scheduled_once
			.insert(("o-1".into(), DeferredKind::PromptRating));
		state
			.scheduled_once
			.insert(("o-2".into(), DeferredKind::NavigateToChat));

		state.retire(&delivered);

		assert!(state.rated.is_empty());
		assert_eq!(state.scheduled_once.len(), 1);
		assert_eq!(
			state.finished.get("o-1"),
			Some(&FinishedOrder {
				status: OrderStatus::Delivered,
				updated_at: 7,
			})
		);
	}

	#[test]
	fn test_retired_orders_are_bounded() {
		let mut state = WorkflowState::new(Duration::from_secs(300));
		for n in 0..(FINISHED_CAPACITY as u64 + 40) {
			let mut cancelled = order(&format!("o-{}", n), OrderStatus::Cancelled);
			cancelled.updated_at = n;
			state.retire(&cancelled);
		}

		assert_eq!(state.finished.len(), FINISHED_CAPACITY);
		assert!(!state.finished.contains_key("o-0"));
		assert!(!state.finished.contains_key("o-39"));
		assert!(state.finished.contains_key("o-40"));
	}
}
