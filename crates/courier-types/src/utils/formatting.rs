//! String formatting utilities for log fields and notifications.

use rust_decimal::Decimal;

/// Truncates an identifier for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

/// Formats a price with exactly two decimal places.
pub fn format_price(amount: Decimal) -> String {
	format!("{:.2}", amount.round_dp(2))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(truncate_id("123456789"), "12345678..");
		assert_eq!(truncate_id("ord_9f2c44ab01"), "ord_9f2c..");
		assert_eq!(truncate_id("çàèìòùåø€"), "çàèìòùåø..");
	}

	#[test]
	fn test_format_price() {
		assert_eq!(format_price(Decimal::new(2550, 2)), "25.50");
		assert_eq!(format_price(Decimal::new(3, 0)), "3.00");
		assert_eq!(format_price(Decimal::new(12346, 3)), "12.35");
	}
}
