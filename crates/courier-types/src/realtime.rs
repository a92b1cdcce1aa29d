//! Realtime wire protocol.
//!
//! Every frame on the realtime connection is a JSON object of the shape
//! `{"event": "<name>", "data": {...}}`. Inbound frames decode into
//! [`RealtimeEvent`], outbound frames encode from [`ClientCommand`]. Topics
//! name the server-side rooms a client joins to receive routed events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{secret_string, OrderStatus, RiderRef, Role, SecretString};

/// Geographic position reported by a rider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub heading: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub speed: Option<f64>,
}

/// A chat message exchanged between customer and rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	pub id: String,
	pub order_id: String,
	pub sender_id: String,
	pub sender_role: Role,
	pub body: String,
	pub sent_at: u64,
}

/// Name of an inbound event, used to key listener registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	OrderStatusUpdated,
	RiderAssigned,
	OrderRated,
	OrderDelivered,
	LocationUpdated,
	NewMessage,
	UserTyping,
	UnreadCountUpdate,
	ChatCleared,
}

impl EventKind {
	/// Events describing the order lifecycle.
	pub const ORDER_LIFECYCLE: [EventKind; 4] = [
		EventKind::OrderStatusUpdated,
		EventKind::RiderAssigned,
		EventKind::OrderRated,
		EventKind::OrderDelivered,
	];

	/// Events describing chat activity.
	pub const CHAT: [EventKind; 4] = [
		EventKind::NewMessage,
		EventKind::UserTyping,
		EventKind::UnreadCountUpdate,
		EventKind::ChatCleared,
	];

	/// Returns the wire name of the event.
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::OrderStatusUpdated => "orderStatusUpdated",
			EventKind::RiderAssigned => "riderAssigned",
			EventKind::OrderRated => "orderRated",
			EventKind::OrderDelivered => "orderDelivered",
			EventKind::LocationUpdated => "locationUpdated",
			EventKind::NewMessage => "newMessage",
			EventKind::UserTyping => "userTyping",
			EventKind::UnreadCountUpdate => "unreadCountUpdate",
			EventKind::ChatCleared => "chatCleared",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orderStatusUpdated" => Ok(EventKind::OrderStatusUpdated),
			"riderAssigned" => Ok(EventKind::RiderAssigned),
			"orderRated" => Ok(EventKind::OrderRated),
			"orderDelivered" => Ok(EventKind::OrderDelivered),
			"locationUpdated" | "riderLocation" => Ok(EventKind::LocationUpdated),
			"newMessage" => Ok(EventKind::NewMessage),
			"userTyping" => Ok(EventKind::UserTyping),
			"unreadCountUpdate" => Ok(EventKind::UnreadCountUpdate),
			"chatCleared" => Ok(EventKind::ChatCleared),
			other => Err(format!("Unknown event: {}", other)),
		}
	}
}

/// Event pushed by the backend.
///
/// Payloads are hints. Order-lifecycle events are never applied verbatim;
/// they trigger an authoritative re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "event",
	content = "data",
	rename_all = "camelCase",
	rename_all_fields = "camelCase"
)]
pub enum RealtimeEvent {
	OrderStatusUpdated {
		order_id: String,
		status: OrderStatus,
		#[serde(default)]
		rider: Option<RiderRef>,
	},
	RiderAssigned {
		order_id: String,
		rider: RiderRef,
	},
	OrderRated {
		order_id: String,
		rating: u8,
	},
	OrderDelivered {
		order_id: String,
	},
	#[serde(alias = "riderLocation")]
	LocationUpdated {
		rider_id: String,
		#[serde(default)]
		order_id: Option<String>,
		location: GeoPoint,
	},
	NewMessage(ChatMessage),
	UserTyping {
		order_id: String,
		user_id: String,
		is_typing: bool,
	},
	UnreadCountUpdate {
		order_id: String,
		count: u32,
	},
	ChatCleared {
		order_id: String,
	},
}

impl RealtimeEvent {
	/// Returns the kind used to route this event to listeners.
	pub fn kind(&self) -> EventKind {
		match self {
			RealtimeEvent::OrderStatusUpdated { .. } => EventKind::OrderStatusUpdated,
			RealtimeEvent::RiderAssigned { .. } => EventKind::RiderAssigned,
			RealtimeEvent::OrderRated { .. } => EventKind::OrderRated,
			RealtimeEvent::OrderDelivered { .. } => EventKind::OrderDelivered,
			RealtimeEvent::LocationUpdated { .. } => EventKind::LocationUpdated,
			RealtimeEvent::NewMessage(_) => EventKind::NewMessage,
			RealtimeEvent::UserTyping { .. } => EventKind::UserTyping,
			RealtimeEvent::UnreadCountUpdate { .. } => EventKind::UnreadCountUpdate,
			RealtimeEvent::ChatCleared { .. } => EventKind::ChatCleared,
		}
	}

	/// Order the event refers to, if any.
	pub fn order_id(&self) -> Option<&str> {
		match self {
			RealtimeEvent::OrderStatusUpdated { order_id, .. }
			| RealtimeEvent::RiderAssigned { order_id, .. }
			| RealtimeEvent::OrderRated { order_id, .. }
			| RealtimeEvent::OrderDelivered { order_id }
			| RealtimeEvent::UserTyping { order_id, .. }
			| RealtimeEvent::UnreadCountUpdate { order_id, .. }
			| RealtimeEvent::ChatCleared { order_id } => Some(order_id),
			RealtimeEvent::NewMessage(message) => Some(&message.order_id),
			RealtimeEvent::LocationUpdated { order_id, .. } => order_id.as_deref(),
		}
	}

	/// Decodes a text frame.
	pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(frame)
	}
}

/// Command sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "event",
	content = "data",
	rename_all = "camelCase",
	rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
	Authenticate {
		#[serde(serialize_with = "secret_string::serialize_exposed")]
		token: SecretString,
	},
	JoinOrder {
		order_id: String,
	},
	LeaveOrder {
		order_id: String,
	},
	SubscribeRider {
		rider_id: String,
	},
	UnsubscribeRider {
		rider_id: String,
	},
	JoinChat {
		order_id: String,
		user_id: String,
		role: Role,
	},
	LeaveChat {
		order_id: String,
		user_id: String,
	},
	SendMessage {
		order_id: String,
		sender_id: String,
		sender_role: Role,
		body: String,
	},
	UpdateLocation {
		rider_id: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		order_id: Option<String>,
		location: GeoPoint,
	},
	MarkAsRead {
		order_id: String,
		user_id: String,
	},
	TypingStart {
		order_id: String,
		user_id: String,
	},
	TypingStop {
		order_id: String,
		user_id: String,
	},
}

impl ClientCommand {
	/// Returns the wire name of the command, safe to log.
	pub fn name(&self) -> &'static str {
		match self {
			ClientCommand::Authenticate { .. } => "authenticate",
			ClientCommand::JoinOrder { .. } => "joinOrder",
			ClientCommand::LeaveOrder { .. } => "leaveOrder",
			ClientCommand::SubscribeRider { .. } => "subscribeRider",
			ClientCommand::UnsubscribeRider { .. } => "unsubscribeRider",
			ClientCommand::JoinChat { .. } => "joinChat",
			ClientCommand::LeaveChat { .. } => "leaveChat",
			ClientCommand::SendMessage { .. } => "sendMessage",
			ClientCommand::UpdateLocation { .. } => "updateLocation",
			ClientCommand::MarkAsRead { .. } => "markAsRead",
			ClientCommand::TypingStart { .. } => "typingStart",
			ClientCommand::TypingStop { .. } => "typingStop",
		}
	}

	/// Encodes the command as a text frame.
	pub fn to_frame(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}

/// Server-side room that routes events to joined clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
	/// Lifecycle events of one order.
	Order(String),
	/// Location updates of one rider.
	Rider(String),
	/// Chat of one order as seen by one participant.
	Chat { order_id: String, user_id: String },
}

impl Topic {
	/// Command that starts routing this topic to the client.
	pub fn join_command(&self, role: Role) -> ClientCommand {
		match self {
			Topic::Order(order_id) => ClientCommand::JoinOrder {
				order_id: order_id.clone(),
			},
			Topic::Rider(rider_id) => ClientCommand::SubscribeRider {
				rider_id: rider_id.clone(),
			},
			Topic::Chat { order_id, user_id } => ClientCommand::JoinChat {
				order_id: order_id.clone(),
				user_id: user_id.clone(),
				role,
			},
		}
	}

	/// Command that stops routing this topic to the client.
	pub fn leave_command(&self) -> ClientCommand {
		match self {
			Topic::Order(order_id) => ClientCommand::LeaveOrder {
				order_id: order_id.clone(),
			},
			Topic::Rider(rider_id) => ClientCommand::UnsubscribeRider {
				rider_id: rider_id.clone(),
			},
			Topic::Chat { order_id, user_id } => ClientCommand::LeaveChat {
				order_id: order_id.clone(),
				user_id: user_id.clone(),
			},
		}
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Topic::Order(order_id) => write!(f, "order:{}", order_id),
			Topic::Rider(rider_id) => write!(f, "rider:{}", rider_id),
			Topic::Chat { order_id, user_id } => write!(f, "chat:{}:{}", order_id, user_id),
		}
	}
}

/// State of the realtime connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
	#[default]
	Disconnected,
	Connecting,
	Connected,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_decode_status_update() {
		let frame = r#"{"event":"orderStatusUpdated","data":{"orderId":"o-1","status":"on_the_way","rider":{"id":"r-9","name":"Kofi"}}}"#;
		let event = RealtimeEvent::from_frame(frame).unwrap();
		assert_eq!(event.kind(), EventKind::OrderStatusUpdated);
		assert_eq!(event.order_id(), Some("o-1"));
		match event {
			RealtimeEvent::OrderStatusUpdated { status, rider, .. } => {
				assert_eq!(status, OrderStatus::OnTheWay);
				assert_eq!(rider.unwrap().id, "r-9");
			},
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[test]
	fn test_rider_location_alias() {
		let frame = r#"{"event":"riderLocation","data":{"riderId":"r-1","location":{"latitude":5.6,"longitude":-0.2}}}"#;
		let event = RealtimeEvent::from_frame(frame).unwrap();
		assert_eq!(event.kind(), EventKind::LocationUpdated);
		assert_eq!("riderLocation".parse::<EventKind>().unwrap(), EventKind::LocationUpdated);
	}

	#[test]
	fn test_unknown_event_is_rejected() {
		assert!(RealtimeEvent::from_frame(r#"{"event":"menuChanged","data":{}}"#).is_err());
	}

	#[test]
	fn test_authenticate_exposes_token_on_wire_only() {
		let command = ClientCommand::Authenticate {
			token: SecretString::from("bearer-123"),
		};
		let frame = command.to_frame().unwrap();
		assert_eq!(frame, r#"{"event":"authenticate","data":{"token":"bearer-123"}}"#);
		assert!(!format!("{:?}", command).contains("bearer-123"));
	}

	#[test]
	fn test_topic_commands() {
		let topic = Topic::Chat {
			order_id: "o-1".into(),
			user_id: "u-1".into(),
		};
		assert_eq!(topic.to_string(), "chat:o-1:u-1");
		assert_eq!(topic.join_command(Role::Rider).name(), "joinChat");
		assert_eq!(topic.leave_command().name(), "leaveChat");
		let frame = Topic::Order("o-2".into()).join_command(Role::Customer).to_frame().unwrap();
		assert_eq!(frame, r#"{"event":"joinOrder","data":{"orderId":"o-2"}}"#);
	}
}
