pub mod qr;
pub mod sync;
pub mod task;
pub mod wallet;

use serde::{Deserialize, Serialize};

// Common paging parameters for listing endpoints
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

// Inclusive timestamp range filter, milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub min_ts: Option<u64>,
    #[serde(default)]
    pub max_ts: Option<u64>,
}

impl TimeRange {
    pub fn contains(&self, timestamp: u64) -> bool {
        if let Some(min) = self.min_ts {
            if timestamp < min {
                return false;
            }
        }
        if let Some(max) = self.max_ts {
            if timestamp > max {
                return false;
            }
        }
        true
    }
}
