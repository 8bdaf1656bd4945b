use crate::{
    crypto::{Id, SigningKey},
    serializer::{Reader, ReaderError, Serializer, Writer},
    time::TimestampMillis,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// A tenant is one festival: the namespace boundary for all business data.
// Tenants are never deleted while dependent records exist; suspension is
// a status flag.
#[derive(Debug, Clone)]
pub struct Tenant {
    // Tenant id, referenced by every other entity
    id: Id,
    // Human readable festival name
    name: String,
    // Namespace prefix for all persisted trees of this tenant
    namespace: String,
    // Symmetric key shared with the tenant's offline devices
    signing_key: SigningKey,
    // Active or suspended
    status: TenantStatus,
    // Creation timestamp
    created_at: TimestampMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl Tenant {
    pub fn new(
        id: Id,
        name: String,
        namespace: String,
        signing_key: SigningKey,
        created_at: TimestampMillis,
    ) -> Self {
        Self {
            id,
            name,
            namespace,
            signing_key,
            status: TenantStatus::Active,
            created_at,
        }
    }

    pub fn get_id(&self) -> &Id {
        &self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get_signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn get_status(&self) -> TenantStatus {
        self.status
    }

    pub fn get_created_at(&self) -> TimestampMillis {
        self.created_at
    }

    pub fn is_suspended(&self) -> bool {
        self.status == TenantStatus::Suspended
    }

    pub fn set_status(&mut self, status: TenantStatus) {
        self.status = status;
    }
}

impl Display for TenantStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl Serializer for TenantStatus {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(TenantStatus::Active),
            1 => Ok(TenantStatus::Suspended),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            TenantStatus::Active => 0,
            TenantStatus::Suspended => 1,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for Tenant {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let id = Id::read(reader)?;
        let name = reader.read_string()?;
        let namespace = reader.read_string()?;
        let signing_key = SigningKey::read(reader)?;
        let status = TenantStatus::read(reader)?;
        let created_at = reader.read_u64()?;

        Ok(Self {
            id,
            name,
            namespace,
            signing_key,
            status,
            created_at,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.id.write(writer);
        writer.write_string(&self.name);
        writer.write_string(&self.namespace);
        self.signing_key.write(writer);
        self.status.write(writer);
        writer.write_u64(&self.created_at);
    }

    fn size(&self) -> usize {
        self.id.size()
            + self.name.size()
            + self.namespace.size()
            + self.signing_key.size()
            + self.status.size()
            + self.created_at.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_roundtrip() {
        let tenant = Tenant::new(
            Id::random(),
            "Hellfest".to_string(),
            "hellfest-2026".to_string(),
            SigningKey::random(),
            1_750_000_000_000,
        );

        let decoded = Tenant::from_bytes(&tenant.to_bytes()).unwrap();
        assert_eq!(decoded.get_id(), tenant.get_id());
        assert_eq!(decoded.get_name(), "Hellfest");
        assert_eq!(decoded.get_namespace(), "hellfest-2026");
        assert_eq!(decoded.get_status(), TenantStatus::Active);
        assert_eq!(
            decoded.get_signing_key().as_bytes(),
            tenant.get_signing_key().as_bytes()
        );
    }
}
