//! Background monitoring tasks.

pub mod payment;

pub use payment::{PaymentMonitor, PaymentOutcome};
