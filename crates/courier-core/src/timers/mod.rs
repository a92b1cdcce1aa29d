//! Escalation timers for orders waiting on a rider.
//!
//! [`EscalationTimers::arm`] and [`EscalationTimers::disarm`] are the only
//! ways a timer comes into or goes out of existence. Each arming gets a fresh
//! generation; a firing task must call [`EscalationTimers::complete`] with its
//! generation before acting, so a timer that was disarmed (or replaced) after
//! its task woke up does nothing.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

struct TimerEntry {
	generation: u64,
	deadline: Instant,
	handle: AbortHandle,
}

/// Registry of live escalation timers, keyed by order id.
pub struct EscalationTimers {
	timeout: Duration,
	entries: HashMap<String, TimerEntry>,
	next_generation: u64,
}

impl EscalationTimers {
	pub fn new(timeout: Duration) -> Self {
		Self {
			timeout,
			entries: HashMap::new(),
			next_generation: 1,
		}
	}

	/// Starts the timer of an order unless one is already live.
	///
	/// A live timer keeps its original deadline. Every event on a ready order
	/// re-confirms readiness, and restarting on each one would let repeated
	/// events postpone the escalation indefinitely.
	///
	/// `on_fire` receives the generation of this arming and runs once the
	/// timeout elapses. Returns whether a new timer was started.
	pub fn arm<F, Fut>(&mut self, order_id: &str, on_fire: F) -> bool
	where
		F: FnOnce(u64) -> Fut,
		Fut: Future<Output = ()> + Send + 'static,
	{
		if self.entries.contains_key(order_id) {
			return false;
		}

		let generation = self.next_generation;
		self.next_generation += 1;
		let deadline = Instant::now() + self.timeout;
		let fire = on_fire(generation);
		let handle = tokio::spawn(async move {
			tokio::time::sleep_until(deadline).await;
			fire.await;
		})
		.abort_handle();

		self.entries.insert(
			order_id.to_string(),
			TimerEntry {
				generation,
				deadline,
				handle,
			},
		);
		tracing::debug!(order_id = %order_id, generation, "Escalation timer armed");
		true
	}

	/// Cancels the timer of an order. Returns whether one was live.
	pub fn disarm(&mut self, order_id: &str) -> bool {
		match self.entries.remove(order_id) {
			Some(entry) => {
				entry.handle.abort();
				tracing::debug!(order_id = %order_id, generation = entry.generation, "Escalation timer disarmed");
				true
			},
			None => false,
		}
	}

	/// Cancels every live timer. Returns how many were cancelled.
	pub fn disarm_all(&mut self) -> usize {
		let count = self.entries.len();
		for (_, entry) in self.entries.drain() {
			entry.handle.abort();
		}
		count
	}

	/// Claims a firing. Returns false when the timer was disarmed or
	/// re-armed since the task with this generation was started.
	pub fn complete(&mut self, order_id: &str, generation: u64) -> bool {
		match self.entries.get(order_id) {
			Some(entry) if entry.generation == generation => {
				self.entries.remove(order_id);
				true
			},
			_ => false,
		}
	}

	pub fn is_armed(&self, order_id: &str) -> bool {
		self.entries.contains_key(order_id)
	}

	pub fn deadline(&self, order_id: &str) -> Option<Instant> {
		self.entries.get(order_id).map(|entry| entry.deadline)
	}

	/// Ids of the orders with a live timer.
	pub fn armed(&self) -> Vec<String> {
		self.entries.keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl Drop for EscalationTimers {
	fn drop(&mut self) {
		self.disarm_all();
	}
}
