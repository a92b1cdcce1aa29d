//! Errors surfaced by workflow operations.
//!
//! Backend failures are converted here, at the operation boundary, so callers
//! only ever see one error type and can tell a retryable failure apart from a
//! final answer.

use courier_api::ApiError;
use thiserror::Error;

/// Errors returned by coordinator operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
	/// No signed-in user, or the backend refused the credential.
	#[error("Not signed in: {0}")]
	Unauthenticated(String),
	/// The backend refused the operation on business grounds.
	#[error("Rejected: {0}")]
	BusinessRule(String),
	/// The backend could not be reached; the operation may be retried.
	#[error("Temporarily unavailable: {0}")]
	Transient(String),
	/// The order is unknown.
	#[error("Not found: {0}")]
	NotFound(String),
	/// Input was rejected before reaching the backend.
	#[error("Invalid input: {0}")]
	Validation(String),
	/// The backend answered with something the client cannot use.
	#[error("Backend error: {0}")]
	Backend(String),
}

impl WorkflowError {
	/// Whether repeating the operation may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, WorkflowError::Transient(_))
	}

	/// Message suitable for showing to the user.
	pub fn user_message(&self) -> String {
		match self {
			WorkflowError::Unauthenticated(_) => "Please sign in to continue.".to_string(),
			WorkflowError::BusinessRule(message) | WorkflowError::Validation(message) => {
				message.clone()
			},
			WorkflowError::Transient(_) => {
				"We could not reach the server. Please try again.".to_string()
			},
			WorkflowError::NotFound(_) => "This order could not be found.".to_string(),
			WorkflowError::Backend(_) => "Something went wrong. Please try again later.".to_string(),
		}
	}
}

impl From<ApiError> for WorkflowError {
	fn from(error: ApiError) -> Self {
		match error {
			ApiError::Rejected { message, .. } => WorkflowError::BusinessRule(message),
			ApiError::NotFound(message) => WorkflowError::NotFound(message),
			ApiError::Unauthorized(message) => WorkflowError::Unauthenticated(message),
			ApiError::Unavailable(message) => WorkflowError::Transient(message),
			ApiError::Decode(message) | ApiError::Configuration(message) => {
				WorkflowError::Backend(message)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_api_errors_map_to_retryability() {
		let transient: WorkflowError = ApiError::Unavailable("timeout".into()).into();
		assert!(transient.is_retryable());

		let rejected: WorkflowError = ApiError::Rejected {
			status: 409,
			message: "Order already has a rider".into(),
		}
		.into();
		assert!(!rejected.is_retryable());
		assert_eq!(rejected.user_message(), "Order already has a rider");
	}

	#[test]
	fn test_unauthorized_maps_to_unauthenticated() {
		let error: WorkflowError = ApiError::Unauthorized("expired".into()).into();
		assert!(matches!(error, WorkflowError::Unauthenticated(_)));
		assert!(!error.is_retryable());
	}
}
