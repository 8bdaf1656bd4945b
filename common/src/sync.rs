use crate::{
    config::OFFLINE_IDEMPOTENCY_PREFIX,
    crypto::{Id, Signature},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
    transaction::TransactionKind,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// A transaction captured on a device without server contact.
// It only exists inside a sync batch until it is accepted into the
// journal or rejected in the batch result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineTransaction {
    // Device-local identifier, unique per device
    pub local_id: String,
    pub wallet_id: Id,
    // Unsigned: the kind decides the sign on the journal row
    pub amount: u64,
    pub kind: TransactionKind,
    pub stand_id: Option<Id>,
    pub staff_id: Option<Id>,
    pub product_ids: Vec<Id>,
    // HMAC-SHA256 over the canonical encoding, computed by the device
    pub signature: Signature,
    // Capture time on the device
    pub timestamp: TimestampMillis,
    pub device_id: String,
}

impl OfflineTransaction {
    // Canonical byte encoding the device signs. Field order is part of
    // the wire contract; product_ids are deliberately excluded (they are
    // advisory detail, not money).
    pub fn signing_payload(&self, tenant_id: &Id) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_string(&self.local_id);
        self.wallet_id.write(&mut writer);
        writer.write_u64(&self.amount);
        self.kind.write(&mut writer);
        self.stand_id.write(&mut writer);
        self.staff_id.write(&mut writer);
        writer.write_u64(&self.timestamp);
        writer.write_string(&self.device_id);
        tenant_id.write(&mut writer);
        writer.into_bytes()
    }

    // Signed journal amount: recharges credit, everything else debits
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            TransactionKind::Recharge => self.amount as i64,
            _ => -(self.amount as i64),
        }
    }

    // Deterministic idempotency key: any retry anywhere in the pipeline
    // collapses to the same journal row
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            OFFLINE_IDEMPOTENCY_PREFIX, self.device_id, self.local_id
        )
    }
}

impl Serializer for OfflineTransaction {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            local_id: reader.read_string()?,
            wallet_id: Id::read(reader)?,
            amount: reader.read_u64()?,
            kind: TransactionKind::read(reader)?,
            stand_id: Option::read(reader)?,
            staff_id: Option::read(reader)?,
            product_ids: Vec::read(reader)?,
            signature: Signature::read(reader)?,
            timestamp: reader.read_u64()?,
            device_id: reader.read_string()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.local_id);
        self.wallet_id.write(writer);
        writer.write_u64(&self.amount);
        self.kind.write(writer);
        self.stand_id.write(writer);
        self.staff_id.write(writer);
        self.product_ids.write(writer);
        self.signature.write(writer);
        writer.write_u64(&self.timestamp);
        writer.write_string(&self.device_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Partial | SyncStatus::Failed
        )
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Processing => write!(f, "processing"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Partial => write!(f, "partial"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

impl Serializer for SyncStatus {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(SyncStatus::Pending),
            1 => Ok(SyncStatus::Processing),
            2 => Ok(SyncStatus::Completed),
            3 => Ok(SyncStatus::Partial),
            4 => Ok(SyncStatus::Failed),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            SyncStatus::Pending => 0,
            SyncStatus::Processing => 1,
            SyncStatus::Completed => 2,
            SyncStatus::Partial => 3,
            SyncStatus::Failed => 4,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

// Per-item outcome of a processed batch, in input order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItemResult {
    pub local_id: String,
    pub outcome: SyncOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_tx_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Duplicate,
    Conflict,
    Rejected,
}

impl SyncItemResult {
    pub fn success(local_id: String, server_tx_id: Id) -> Self {
        Self {
            local_id,
            outcome: SyncOutcome::Success,
            server_tx_id: Some(server_tx_id),
            reason: None,
            resolution: None,
        }
    }

    pub fn duplicate(local_id: String, server_tx_id: Id) -> Self {
        Self {
            local_id,
            outcome: SyncOutcome::Duplicate,
            server_tx_id: Some(server_tx_id),
            reason: None,
            resolution: None,
        }
    }

    // Money conflicts always resolve server side: the ledger is the
    // source of truth and the device must reconcile
    pub fn conflict(local_id: String, reason: impl Into<String>) -> Self {
        Self {
            local_id,
            outcome: SyncOutcome::Conflict,
            server_tx_id: None,
            reason: Some(reason.into()),
            resolution: Some("server_wins".to_string()),
        }
    }

    pub fn rejected(local_id: String, reason: impl Into<String>) -> Self {
        Self {
            local_id,
            outcome: SyncOutcome::Rejected,
            server_tx_id: None,
            reason: Some(reason.into()),
            resolution: None,
        }
    }
}

impl Display for SyncOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "success"),
            SyncOutcome::Duplicate => write!(f, "duplicate"),
            SyncOutcome::Conflict => write!(f, "conflict"),
            SyncOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

impl Serializer for SyncOutcome {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(SyncOutcome::Success),
            1 => Ok(SyncOutcome::Duplicate),
            2 => Ok(SyncOutcome::Conflict),
            3 => Ok(SyncOutcome::Rejected),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            SyncOutcome::Success => 0,
            SyncOutcome::Duplicate => 1,
            SyncOutcome::Conflict => 2,
            SyncOutcome::Rejected => 3,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for SyncItemResult {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            local_id: reader.read_string()?,
            outcome: SyncOutcome::read(reader)?,
            server_tx_id: Option::read(reader)?,
            reason: Option::read(reader)?,
            resolution: Option::read(reader)?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.local_id);
        self.outcome.write(writer);
        self.server_tx_id.write(writer);
        self.reason.write(writer);
        self.resolution.write(writer);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u32,
    pub success: u32,
    pub duplicates: u32,
    pub conflicts: u32,
    pub rejected: u32,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: SyncOutcome) {
        self.total += 1;
        match outcome {
            SyncOutcome::Success => self.success += 1,
            SyncOutcome::Duplicate => self.duplicates += 1,
            SyncOutcome::Conflict => self.conflicts += 1,
            SyncOutcome::Rejected => self.rejected += 1,
        }
    }

    // Completed when everything landed or was already there, partial
    // when some items need device-side reconciliation
    pub fn final_status(&self) -> SyncStatus {
        if self.conflicts == 0 && self.rejected == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::Partial
        }
    }
}

impl Serializer for BatchSummary {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            total: reader.read_u32()?,
            success: reader.read_u32()?,
            duplicates: reader.read_u32()?,
            conflicts: reader.read_u32()?,
            rejected: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.total);
        writer.write_u32(self.success);
        writer.write_u32(self.duplicates);
        writer.write_u32(self.conflicts);
        writer.write_u32(self.rejected);
    }

    fn size(&self) -> usize {
        20
    }
}

// A device's submission: created on receipt, terminal status set once
// every item has an outcome. Persisted so devices can query results
// after a dropped connection.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    id: Id,
    device_id: String,
    tenant_id: Id,
    status: SyncStatus,
    received_at: TimestampMillis,
    completed_at: Option<TimestampMillis>,
    summary: BatchSummary,
    results: Vec<SyncItemResult>,
}

impl SyncBatch {
    pub fn new(id: Id, device_id: String, tenant_id: Id, received_at: TimestampMillis) -> Self {
        Self {
            id,
            device_id,
            tenant_id,
            status: SyncStatus::Processing,
            received_at,
            completed_at: None,
            summary: BatchSummary::default(),
            results: Vec::new(),
        }
    }

    pub fn get_id(&self) -> &Id {
        &self.id
    }

    pub fn get_device_id(&self) -> &str {
        &self.device_id
    }

    pub fn get_tenant_id(&self) -> &Id {
        &self.tenant_id
    }

    pub fn get_status(&self) -> SyncStatus {
        self.status
    }

    pub fn get_received_at(&self) -> TimestampMillis {
        self.received_at
    }

    pub fn get_completed_at(&self) -> Option<TimestampMillis> {
        self.completed_at
    }

    pub fn get_summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn get_results(&self) -> &[SyncItemResult] {
        &self.results
    }

    pub fn push_result(&mut self, result: SyncItemResult) {
        self.summary.record(result.outcome);
        self.results.push(result);
    }

    pub fn complete(&mut self, completed_at: TimestampMillis) {
        self.status = self.summary.final_status();
        self.completed_at = Some(completed_at);
    }

    pub fn fail(&mut self, completed_at: TimestampMillis) {
        self.status = SyncStatus::Failed;
        self.completed_at = Some(completed_at);
    }
}

impl Serializer for SyncBatch {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: Id::read(reader)?,
            device_id: reader.read_string()?,
            tenant_id: Id::read(reader)?,
            status: SyncStatus::read(reader)?,
            received_at: reader.read_u64()?,
            completed_at: Option::read(reader)?,
            summary: BatchSummary::read(reader)?,
            results: Vec::read(reader)?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        writer.write_string(&self.device_id);
        self.tenant_id.write(writer);
        self.status.write(writer);
        writer.write_u64(&self.received_at);
        self.completed_at.write(writer);
        self.summary.write(writer);
        self.results.write(writer);
    }
}
