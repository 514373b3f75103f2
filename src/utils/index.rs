use rust_decimal::Decimal;

/// Number of decimal places of the chain's native base currency.
pub const BASE_CURRENCY_DECIMALS: u32 = 8;

/// Converts integer base units into display units with `decimals` fractional digits.
///
/// Returns `None` when the amount does not fit a `Decimal` mantissa or the scale is unsupported.
pub fn base_units_to_display(amount: u128, decimals: u32) -> Option<Decimal> {
	let mantissa = i128::try_from(amount).ok()?;
	Decimal::try_from_i128_with_scale(mantissa, decimals)
		.ok()
		.map(|value| value.normalize())
}

pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	base_units_to_display(amount, decimals)
		.map(|value| value.to_string())
		.unwrap_or_else(|| amount.to_string())
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
	chrono::Utc::now().timestamp().max(0) as u64
}

/// Normalises a hex string (address, topic, hash) to lowercase without a `0x` prefix.
pub fn normalize_hex(value: &str) -> String {
	value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
		.unwrap_or(value)
		.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn converts_base_units_with_decimals() {
		assert_eq!(
			base_units_to_display(150_000_000, 8),
			Some(Decimal::from_str("1.5").unwrap())
		);
		assert_eq!(base_units_to_display(42, 0), Some(Decimal::from(42)));
		assert_eq!(format_token_amount(1, 3), "0.001");
	}

	#[test]
	fn rejects_amounts_beyond_decimal_range() {
		assert_eq!(base_units_to_display(u128::MAX, 8), None);
		assert_eq!(format_token_amount(u128::MAX, 8), u128::MAX.to_string());
	}

	#[test]
	fn normalizes_hex() {
		assert_eq!(normalize_hex("0xABcd"), "abcd");
		assert_eq!(normalize_hex("abcd"), "abcd");
	}
}
