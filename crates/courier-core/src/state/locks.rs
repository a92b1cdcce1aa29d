//! Per-order serialization.
//!
//! Work on one order (reconciliation, timer firing, user operations) runs
//! under that order's lock, while different orders proceed independently.
//! tokio's mutex hands the lock out in request order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct OrderLocks {
	locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits for exclusive access to one order.
	pub async fn lock(&self, order_id: &str) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			locks
				.entry(order_id.to_string())
				.or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
				.clone()
		};
		lock.lock_owned().await
	}

	/// Forgets the lock of an order nobody is waiting on.
	pub fn release(&self, order_id: &str) {
		let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		if locks
			.get(order_id)
			.is_some_and(|lock| Arc::strong_count(lock) == 1)
		{
			locks.remove(order_id);
		}
	}

	pub fn len(&self) -> usize {
		self.locks
			.lock()
			.map(|locks| locks.len())
			.unwrap_or_default()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test(start_paused = true)]
	async fn test_same_order_runs_in_request_order() {
		let locks = Arc::new(OrderLocks::new());
		let log = Arc::new(Mutex::new(Vec::new()));

		let guard = locks.lock("o-1").await;
		let mut tasks = Vec::new();
		for i in 0..3 {
			let locks = locks.clone();
			let log = log.clone();
			tasks.push(tokio::spawn(async move {
				let _guard = locks.lock("o-1").await;
				log.lock().unwrap().push(i);
			}));
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		drop(guard);
		for task in tasks {
			task.await.unwrap();
		}
		assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn test_other_orders_do_not_wait() {
		let locks = OrderLocks::new();
		let _held = locks.lock("o-1").await;
		let _other = locks.lock("o-2").await;
		assert_eq!(locks.len(), 2);

		drop(_other);
		locks.release("o-2");
		assert_eq!(locks.len(), 1);
	}
}
