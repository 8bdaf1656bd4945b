pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Amounts are integer minor units (cents / festival tokens)
pub const MINOR_UNITS_PER_MAJOR: u64 = 100;

// Bit-exact journal row field bounds
pub const MAX_REFERENCE_SIZE: usize = 255;
pub const MAX_IDEMPOTENCY_KEY_SIZE: usize = 255;
pub const MAX_DEVICE_ID_SIZE: usize = 64;

// Maximum offline transactions accepted in a single sync batch
pub const MAX_BATCH_SIZE: usize = 500;

// Payments may be cancelled within this window; admins override explicitly
pub const DEFAULT_CANCELLATION_WINDOW_SECS: u64 = 5 * 60;

// Offline signatures are accepted until festival end + 72h
pub const DEFAULT_SIGNATURE_FRESHNESS_SECS: u64 = 72 * 3600;

// QR payloads expire after this by default
pub const DEFAULT_QR_EXPIRY_SECS: u64 = 24 * 3600;

// Idempotency keys derived from offline transactions use this prefix,
// so server-supplied keys can never collide with device-derived ones
pub const OFFLINE_IDEMPOTENCY_PREFIX: &str = "offline";

// Format a minor-unit amount with 2 decimals for logs and summaries
pub fn format_amount(amount: u64) -> String {
    format!(
        "{}.{:02}",
        amount / MINOR_UNITS_PER_MAJOR,
        amount % MINOR_UNITS_PER_MAJOR
    )
}

// Same for signed amounts (journal rows carry the sign)
pub fn format_signed_amount(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}{}", sign, format_amount(amount.unsigned_abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(1250), "12.50");
    }

    #[test]
    fn test_format_signed_amount() {
        assert_eq!(format_signed_amount(-300), "-3.00");
        assert_eq!(format_signed_amount(300), "3.00");
    }
}
