//! Broadcast bus for workflow effects.
//!
//! Presentation layers subscribe to receive every [`WorkflowEffect`] the
//! coordinator produces. Publishing never blocks; slow subscribers lag and
//! lose the oldest effects.

use courier_types::WorkflowEffect;
use tokio::sync::broadcast;

/// Default number of effects buffered per subscriber.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EffectBus {
	sender: broadcast::Sender<WorkflowEffect>,
}

impl EffectBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEffect> {
		self.sender.subscribe()
	}

	/// Publishes an effect. Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		effect: WorkflowEffect,
	) -> Result<usize, broadcast::error::SendError<WorkflowEffect>> {
		tracing::debug!(effect = effect.name(), "Publishing effect");
		self.sender.send(effect)
	}
}

impl Default for EffectBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
