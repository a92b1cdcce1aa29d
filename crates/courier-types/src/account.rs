//! Session identity types.
//!
//! The observing client acts under exactly one role for the lifetime of a
//! session. The role decides which side effects a status transition produces
//! and which orders make up the active set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role under which the client observes orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	/// The person who placed the order.
	Customer,
	/// The courier delivering the order.
	Rider,
	/// Customer-care staff handling escalations.
	#[serde(alias = "admin")]
	Support,
}

impl Role {
	/// Returns the wire name of the role.
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Customer => "customer",
			Role::Rider => "rider",
			Role::Support => "support",
		}
	}

	/// Whether this role takes part in the order chat.
	pub fn participates_in_chat(&self) -> bool {
		matches!(self, Role::Customer | Role::Rider)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"customer" => Ok(Role::Customer),
			"rider" => Ok(Role::Rider),
			"support" | "admin" => Ok(Role::Support),
			other => Err(format!("Unknown role: {}", other)),
		}
	}
}

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	/// Backend identifier of the user.
	pub user_id: String,
	/// Role the user acts under.
	pub role: Role,
	/// Optional human-readable name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub display_name: Option<String>,
}

impl Identity {
	/// Creates an identity without a display name.
	pub fn new(user_id: impl Into<String>, role: Role) -> Self {
		Self {
			user_id: user_id.into(),
			role,
			display_name: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_role_parsing() {
		assert_eq!("customer".parse::<Role>().unwrap(), Role::Customer);
		assert_eq!("RIDER".parse::<Role>().unwrap(), Role::Rider);
		assert_eq!("admin".parse::<Role>().unwrap(), Role::Support);
		assert!("chef".parse::<Role>().is_err());
	}

	#[test]
	fn test_role_serde_alias() {
		let role: Role = serde_json::from_str("\"admin\"").unwrap();
		assert_eq!(role, Role::Support);
		assert_eq!(serde_json::to_string(&Role::Support).unwrap(), "\"support\"");
	}
}
