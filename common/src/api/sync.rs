use crate::{
    crypto::Id,
    sync::{BatchSummary, OfflineTransaction, SyncBatch, SyncItemResult},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatchParams {
    // Generated by the device; resubmitting the same id returns the
    // stored result instead of reprocessing
    pub batch_id: Id,
    pub device_id: String,
    pub transactions: Vec<OfflineTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultResponse {
    pub batch_id: Id,
    pub status: String,
    pub summary: BatchSummary,
    pub results: Vec<SyncItemResult>,
}

impl From<&SyncBatch> for BatchResultResponse {
    fn from(batch: &SyncBatch) -> Self {
        Self {
            batch_id: *batch.get_id(),
            status: batch.get_status().to_string(),
            summary: *batch.get_summary(),
            results: batch.get_results().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBatchesResponse {
    pub device_id: String,
    pub batch_ids: Vec<Id>,
}
