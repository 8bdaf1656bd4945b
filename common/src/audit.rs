use crate::{
    crypto::Id,
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// Append-only audit row written inside the tenant namespace for every
// mutation performed under impersonation or flagged as sensitive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Id,
    // Subject of the credential that performed the action
    pub actor: String,
    pub action: String,
    // Entity the action applied to
    pub subject: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub ip: Option<String>,
    // Platform admin acting inside a tenant
    pub impersonated_by: Option<String>,
    pub created_at: TimestampMillis,
}

impl Serializer for AuditRecord {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: Id::read(reader)?,
            actor: reader.read_string()?,
            action: reader.read_string()?,
            subject: reader.read_string()?,
            before: Option::read(reader)?,
            after: Option::read(reader)?,
            ip: Option::read(reader)?,
            impersonated_by: Option::read(reader)?,
            created_at: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        writer.write_string(&self.actor);
        writer.write_string(&self.action);
        writer.write_string(&self.subject);
        self.before.write(writer);
        self.after.write(writer);
        self.ip.write(writer);
        self.impersonated_by.write(writer);
        writer.write_u64(&self.created_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl Serializer for Severity {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(Severity::Info),
            1 => Ok(Severity::Warning),
            2 => Ok(Severity::Critical),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

// What happened, not how it is handled: the sink decides routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    AuthFailure,
    AuthSuccess,
    LedgerMutation,
    Impersonation,
    SyncConflict,
    SyncRejected,
    InvariantViolation,
    TenantSuspendedAccess,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::AuthFailure => "auth_failure",
            SecurityEventKind::AuthSuccess => "auth_success",
            SecurityEventKind::LedgerMutation => "ledger_mutation",
            SecurityEventKind::Impersonation => "impersonation",
            SecurityEventKind::SyncConflict => "sync_conflict",
            SecurityEventKind::SyncRejected => "sync_rejected",
            SecurityEventKind::InvariantViolation => "invariant_violation",
            SecurityEventKind::TenantSuspendedAccess => "tenant_suspended_access",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SecurityEventKind::AuthFailure),
            1 => Some(SecurityEventKind::AuthSuccess),
            2 => Some(SecurityEventKind::LedgerMutation),
            3 => Some(SecurityEventKind::Impersonation),
            4 => Some(SecurityEventKind::SyncConflict),
            5 => Some(SecurityEventKind::SyncRejected),
            6 => Some(SecurityEventKind::InvariantViolation),
            7 => Some(SecurityEventKind::TenantSuspendedAccess),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SecurityEventKind::AuthFailure => 0,
            SecurityEventKind::AuthSuccess => 1,
            SecurityEventKind::LedgerMutation => 2,
            SecurityEventKind::Impersonation => 3,
            SecurityEventKind::SyncConflict => 4,
            SecurityEventKind::SyncRejected => 5,
            SecurityEventKind::InvariantViolation => 6,
            SecurityEventKind::TenantSuspendedAccess => 7,
        }
    }
}

impl Display for SecurityEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serializer for SecurityEventKind {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        SecurityEventKind::from_u8(reader.read_u8()?).ok_or(ReaderError::InvalidValue)
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.as_u8());
    }

    fn size(&self) -> usize {
        1
    }
}

// Structured security event, buffered through the audit sink and written
// to structured logs plus the time-indexed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Id,
    pub timestamp: TimestampMillis,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub actor: Option<String>,
    pub ip: Option<String>,
    pub resource: Option<String>,
    pub action: String,
    pub result: String,
    pub details: Option<String>,
}

impl SecurityEvent {
    pub fn new(
        kind: SecurityEventKind,
        severity: Severity,
        action: impl Into<String>,
        result: impl Into<String>,
        timestamp: TimestampMillis,
    ) -> Self {
        Self {
            id: Id::random(),
            timestamp,
            kind,
            severity,
            actor: None,
            ip: None,
            resource: None,
            action: action.into(),
            result: result.into(),
            details: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl Serializer for SecurityEvent {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            id: Id::read(reader)?,
            timestamp: reader.read_u64()?,
            kind: SecurityEventKind::read(reader)?,
            severity: Severity::read(reader)?,
            actor: Option::read(reader)?,
            ip: Option::read(reader)?,
            resource: Option::read(reader)?,
            action: reader.read_string()?,
            result: reader.read_string()?,
            details: Option::read(reader)?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        writer.write_u64(&self.timestamp);
        self.kind.write(writer);
        self.severity.write(writer);
        self.actor.write(writer);
        self.ip.write(writer);
        self.resource.write(writer);
        writer.write_string(&self.action);
        writer.write_string(&self.result);
        self.details.write(writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_event_roundtrip() {
        let event = SecurityEvent::new(
            SecurityEventKind::AuthFailure,
            Severity::Warning,
            "verify_bearer",
            "invalid_token",
            1_750_000_000_000,
        )
        .with_ip("203.0.113.7")
        .with_actor("anonymous");

        let decoded = SecurityEvent::from_bytes(&event.to_bytes()).unwrap();
        assert_eq!(decoded.kind, SecurityEventKind::AuthFailure);
        assert_eq!(decoded.severity, Severity::Warning);
        assert_eq!(decoded.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(decoded.result, "invalid_token");
    }

    #[test]
    fn test_audit_record_roundtrip() {
        let record = AuditRecord {
            id: Id::random(),
            actor: "admin@festa".to_string(),
            action: "cancel_transaction".to_string(),
            subject: "tx:abc".to_string(),
            before: Some("balance=700".to_string()),
            after: Some("balance=1000".to_string()),
            ip: None,
            impersonated_by: Some("platform:root".to_string()),
            created_at: 1_750_000_000_000,
        };

        let decoded = AuditRecord::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded.actor, "admin@festa");
        assert_eq!(decoded.impersonated_by.as_deref(), Some("platform:root"));
    }
}
