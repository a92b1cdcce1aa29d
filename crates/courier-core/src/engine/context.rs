//! Shared context of the coordinator's handlers.

use super::effect_bus::EffectBus;
use crate::error::WorkflowError;
use crate::state::{OrderLocks, SharedState, WorkflowState};
use crate::subscriptions::SubscriptionManager;
use crate::WorkflowSnapshot;
use courier_api::OrderApiService;
use courier_config::WorkflowConfig;
use courier_types::{Identity, Role, WorkflowEffect};
use std::sync::Arc;
use tokio::sync::watch;

/// Collaborators and state every handler works against.
pub struct WorkflowContext {
	pub(crate) config: WorkflowConfig,
	pub(crate) identity: Option<Identity>,
	pub(crate) api: Arc<OrderApiService>,
	pub(crate) subscriptions: Arc<SubscriptionManager>,
	pub(crate) state: SharedState,
	pub(crate) locks: OrderLocks,
	pub(crate) effects: EffectBus,
	pub(crate) snapshot: watch::Sender<WorkflowSnapshot>,
}

impl WorkflowContext {
	pub fn new(
		config: WorkflowConfig,
		identity: Option<Identity>,
		api: Arc<OrderApiService>,
		subscriptions: Arc<SubscriptionManager>,
	) -> Self {
		let (snapshot, _) = watch::channel(WorkflowSnapshot::default());
		Self {
			state: SharedState::new(config.escalation_timeout()),
			config,
			identity,
			api,
			subscriptions,
			locks: OrderLocks::new(),
			effects: EffectBus::default(),
			snapshot,
		}
	}

	pub fn role(&self) -> Option<Role> {
		self.identity.as_ref().map(|identity| identity.role)
	}

	/// The signed-in user, or `Unauthenticated`.
	pub fn require_identity(&self) -> Result<&Identity, WorkflowError> {
		self.identity
			.as_ref()
			.ok_or_else(|| WorkflowError::Unauthenticated("no signed-in user".into()))
	}

	pub fn publish(&self, effect: WorkflowEffect) {
		// No subscriber is not an error
		self.effects.publish(effect).ok();
	}

	pub fn publish_snapshot(&self, state: &WorkflowState) {
		self.snapshot.send_replace(state.snapshot());
	}
}
