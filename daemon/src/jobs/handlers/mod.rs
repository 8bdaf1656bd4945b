// Built-in task handlers. Every handler is idempotent: the fleet may
// re-execute after a partial failure, and retried ledger work collapses
// onto the same journal rows through idempotency keys.

pub mod analytics;
pub mod cleanup;
pub mod email;
pub mod refund;
pub mod report;
pub mod sms;
pub mod sync;
pub mod topup;
pub mod webhook;

use crate::{
    core::{
        audit::AuditSink,
        ledger::Ledger,
        storage::{SledStorage, StorageError, TenantProvider, TenantStore},
        sync::SyncEngine,
    },
    jobs::{registry::RegistryBuilder, task::TaskError},
    providers::{Mailer, ObjectStore, SmsGateway},
};
use festa_common::{
    context::{Actor, RequestContext},
    crypto::Id,
    tenant::Tenant,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct HandlerDeps {
    pub storage: Arc<SledStorage>,
    pub ledger: Arc<Ledger>,
    pub sync: Arc<SyncEngine>,
    pub mailer: Arc<dyn Mailer>,
    pub sms: Arc<dyn SmsGateway>,
    pub objects: Arc<dyn ObjectStore>,
    pub audit: AuditSink,
}

pub fn register_builtin(builder: &mut RegistryBuilder, deps: &HandlerDeps) {
    topup::register(builder, deps);
    refund::register(builder, deps);
    email::register(builder, deps);
    sms::register(builder, deps);
    sync::register(builder, deps);
    report::register(builder, deps);
    analytics::register(builder, deps);
    cleanup::register(builder, deps);
    webhook::register(builder, deps);
}

// Resolve a tenant and open its scoped store for fleet-originated work.
// A missing tenant is permanent: retrying cannot create it.
pub(crate) async fn fleet_session(
    storage: &SledStorage,
    tenant_id: &Id,
) -> Result<(Tenant, TenantStore, RequestContext), TaskError> {
    let tenant = match storage.get_tenant(tenant_id).await {
        Ok(tenant) => tenant,
        Err(StorageError::NotFound) => {
            return Err(TaskError::permanent(anyhow::anyhow!(
                "tenant {} does not exist",
                tenant_id
            )))
        }
        Err(err) => return Err(TaskError::transient(err)),
    };

    let store = storage
        .tenant_store(tenant.get_namespace())
        .map_err(TaskError::transient)?;
    let ctx = RequestContext::new(
        *tenant.get_id(),
        tenant.get_namespace().to_string(),
        Actor::new("system:fleet".to_string(), Vec::new()),
    );
    Ok((tenant, store, ctx))
}

// Payloads arrive as loosely typed JSON; decoding failures are
// permanent because the payload will never change on retry
pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<T, TaskError> {
    serde_json::from_value(payload)
        .map_err(|err| TaskError::permanent(anyhow::anyhow!("invalid payload: {}", err)))
}
