// A simple module to define the time types used in the project
//
// System time is fine for journal rows and audit records: ordering
// guarantees come from the per-wallet serial section, not from clocks.
// Device-supplied timestamps (offline transactions) are only trusted
// within the signature freshness window.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    let start = SystemTime::now();

    start
        .duration_since(UNIX_EPOCH)
        .expect("Incorrect time returned from get_current_time")
}

// Return timestamp in seconds
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

// Return timestamp in milliseconds
// We cast it to u64 as we have plenty of time before it overflows (year 584,942,417 AD)
pub fn get_current_time_in_millis() -> TimestampMillis {
    get_current_time().as_millis() as TimestampMillis
}
