pub mod error;
mod payment;
mod sync;
mod task;
mod wallet;

pub use error::ApiError;

use crate::{
    core::{ledger::Ledger, storage::SledStorage, sync::SyncEngine, tenant::{TenantRouter, TenantSession}},
    jobs::Enqueuer,
};
use actix_web::{web, HttpRequest};
use festa_common::{context::Role, crypto::SigningKey};
use std::sync::Arc;

pub struct AppState {
    pub router: Arc<TenantRouter>,
    pub ledger: Arc<Ledger>,
    pub sync: Arc<SyncEngine>,
    pub enqueuer: Enqueuer,
    pub storage: Arc<SledStorage>,
    // Shared secret authenticating the payment-provider webhook ingress
    pub ingress_secret: Option<SigningKey>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    wallet::configure(cfg);
    sync::configure(cfg);
    task::configure(cfg);
    payment::configure(cfg);
}

// Resolve the bearer credential into a tenant session.
// `X-Festa-Tenant` selects the target tenant for platform admins.
pub(crate) async fn authorize(
    state: &AppState,
    req: &HttpRequest,
    write: bool,
) -> Result<TenantSession, ApiError> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let target_tenant = req
        .headers()
        .get("X-Festa-Tenant")
        .and_then(|value| value.to_str().ok());

    let ip = req.peer_addr().map(|addr| addr.ip().to_string());

    Ok(state
        .router
        .resolve(bearer, target_tenant, ip.as_deref(), write)
        .await?)
}

// Mutating wallet operations require an operator credential
pub(crate) fn require_operator(session: &TenantSession) -> Result<(), ApiError> {
    let actor = session.ctx.get_actor();
    if actor.has_role(Role::Staff) || actor.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub(crate) fn require_platform_admin(session: &TenantSession) -> Result<(), ApiError> {
    if session.ctx.get_actor().is_platform_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
