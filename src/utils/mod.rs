//!
//! Utility module for the sync engine.
//!
//! Re-exports amount conversion and time helpers for use throughout the codebase.
/// Amount conversion, hex and time helpers
pub mod index;

pub use index::{
	BASE_CURRENCY_DECIMALS, base_units_to_display, format_token_amount, normalize_hex, unix_now,
};
