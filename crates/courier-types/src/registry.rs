//! Registry trait for self-registering implementations.
//!
//! Every pluggable backend (account, order API, transport) ships a Registry
//! struct declaring the name used for it in configuration and the factory
//! that builds it.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// This matches the key under the section's `implementations` table, for example:
	/// - "websocket" for transport.implementations.websocket
	/// - "http" for backend.implementations.http
	/// - "env" for account.implementations.env
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
