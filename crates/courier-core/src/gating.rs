//! Pure predicates deciding what a presentation layer may offer for an order.
//!
//! Every function here is total over all statuses and has no side effects.

use courier_types::{Identity, Order, OrderFilter, OrderStatus, Role};

/// Whether the order chat can be opened.
///
/// Chat needs a counterpart, so it opens once a rider is attached and stays
/// open until the order reaches a terminal state.
pub fn should_open_chat(status: OrderStatus, rider_assigned: bool) -> bool {
	rider_assigned
		&& matches!(
			status,
			OrderStatus::Accepted
				| OrderStatus::Preparing
				| OrderStatus::Ready
				| OrderStatus::OnTheWay
				| OrderStatus::AwaitingConfirmation
		)
}

/// Whether the customer should be asked to rate the order.
pub fn should_rate_order(status: OrderStatus, is_rated: bool) -> bool {
	status == OrderStatus::Delivered && !is_rated
}

/// Whether customer care has to step in to find a rider.
pub fn should_notify_customer_care(
	status: OrderStatus,
	rider_assigned: bool,
	requires_manual_assignment: bool,
) -> bool {
	status == OrderStatus::Ready && !rider_assigned && requires_manual_assignment
}

/// Human-readable status line for the given observer.
pub fn order_status_text(status: OrderStatus, role: Role) -> &'static str {
	match (status, role) {
		(OrderStatus::Pending, Role::Customer) => "Waiting for the restaurant to accept your order",
		(OrderStatus::Pending, _) => "Waiting for restaurant acceptance",
		(OrderStatus::Accepted, Role::Customer) => "The restaurant accepted your order",
		(OrderStatus::Accepted, _) => "Accepted by the restaurant",
		(OrderStatus::Preparing, Role::Customer) => "Your food is being prepared",
		(OrderStatus::Preparing, _) => "Being prepared",
		(OrderStatus::Ready, Role::Customer) => "Your order is ready and waiting for a rider",
		(OrderStatus::Ready, Role::Rider) => "Ready for pickup",
		(OrderStatus::Ready, Role::Support) => "Ready, waiting for a rider",
		(OrderStatus::OnTheWay, Role::Customer) => "Your rider is on the way",
		(OrderStatus::OnTheWay, Role::Rider) => "Deliver to the customer",
		(OrderStatus::OnTheWay, Role::Support) => "Out for delivery",
		(OrderStatus::AwaitingConfirmation, Role::Customer) => "Please confirm you received your order",
		(OrderStatus::AwaitingConfirmation, Role::Rider) => "Waiting for the customer to confirm",
		(OrderStatus::AwaitingConfirmation, Role::Support) => "Awaiting customer confirmation",
		(OrderStatus::Delivered, Role::Customer) => "Delivered. Enjoy your meal!",
		(OrderStatus::Delivered, _) => "Delivered",
		(OrderStatus::Cancelled, Role::Customer) => "Your order was cancelled",
		(OrderStatus::Cancelled, _) => "Cancelled",
	}
}

/// Whether an order belongs in the observer's active set.
///
/// Delivered orders stay with the customer until they are rated so the
/// rating prompt has something to refer to.
pub fn keeps_in_active_set(order: &Order, identity: Option<&Identity>, rated: bool) -> bool {
	let Some(identity) = identity else {
		return order.is_active();
	};
	if identity.role == Role::Customer
		&& order.customer_id == identity.user_id
		&& should_rate_order(order.status, rated || order.is_rated())
	{
		return true;
	}
	OrderFilter::for_identity(identity).matches(order)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::order;

	#[test]
	fn test_predicates_are_total() {
		for status in OrderStatus::ALL {
			for role in [Role::Customer, Role::Rider, Role::Support] {
				assert!(!order_status_text(status, role).is_empty());
			}
			for flag in [true, false] {
				should_open_chat(status, flag);
				should_rate_order(status, flag);
				should_notify_customer_care(status, flag, !flag);
			}
		}
	}

	#[test]
	fn test_chat_needs_rider_and_live_order() {
		assert!(!should_open_chat(OrderStatus::OnTheWay, false));
		assert!(should_open_chat(OrderStatus::OnTheWay, true));
		assert!(should_open_chat(OrderStatus::AwaitingConfirmation, true));
		assert!(!should_open_chat(OrderStatus::Delivered, true));
		assert!(!should_open_chat(OrderStatus::Pending, true));
	}

	#[test]
	fn test_rating_only_once_delivered() {
		assert!(should_rate_order(OrderStatus::Delivered, false));
		assert!(!should_rate_order(OrderStatus::Delivered, true));
		assert!(!should_rate_order(OrderStatus::AwaitingConfirmation, false));
	}

	#[test]
	fn test_customer_care_only_for_flagged_ready_orders() {
		assert!(should_notify_customer_care(OrderStatus::Ready, false, true));
		assert!(!should_notify_customer_care(OrderStatus::Ready, true, true));
		assert!(!should_notify_customer_care(OrderStatus::Ready, false, false));
		assert!(!should_notify_customer_care(OrderStatus::OnTheWay, false, true));
	}

	#[test]
	fn test_active_set_membership() {
		let customer = Identity::new("cust-1", Role::Customer);
		let support = Identity::new("care-1", Role::Support);

		let mut delivered = order("o-1", OrderStatus::Delivered);
		assert!(keeps_in_active_set(&delivered, Some(&customer), false));
		assert!(!keeps_in_active_set(&delivered, Some(&customer), true));
		delivered.customer_rating = Some(4);
		assert!(!keeps_in_active_set(&delivered, Some(&customer), false));

		let ready = order("o-2", OrderStatus::Ready);
		assert!(keeps_in_active_set(&ready, Some(&support), false));
		let preparing = order("o-3", OrderStatus::Preparing);
		assert!(!keeps_in_active_set(&preparing, Some(&support), false));
		assert!(keeps_in_active_set(&preparing, None, false));
	}
}
