use super::{
    audit::AuditSink,
    error::AuthError,
    storage::{SledStorage, StorageError, TenantProvider, TenantStore},
};
use crate::providers::{Claims, IdentityError, IdentityProvider};
use festa_common::{
    audit::{SecurityEvent, SecurityEventKind, Severity},
    context::{Actor, RequestContext, Role},
    crypto::Id,
    tenant::Tenant,
    time::{get_current_time_in_millis, get_current_time_in_seconds},
};
use std::{str::FromStr, sync::Arc};

// A resolved request: the tenant, its scoped store, and the execution
// context. Holding one is proof that authentication succeeded and the
// namespace binding happened.
pub struct TenantSession {
    pub tenant: Tenant,
    pub store: TenantStore,
    pub ctx: RequestContext,
    // Suspended tenants keep read access for exports
    pub read_only: bool,
}

// Maps a bearer credential onto a tenant-scoped persistence handle.
// All downstream reads and writes go through the scoped store and
// therefore touch only that tenant's namespace.
pub struct TenantRouter {
    storage: Arc<SledStorage>,
    identity: Arc<dyn IdentityProvider>,
    audit: AuditSink,
}

impl TenantRouter {
    pub fn new(
        storage: Arc<SledStorage>,
        identity: Arc<dyn IdentityProvider>,
        audit: AuditSink,
    ) -> Self {
        Self {
            storage,
            identity,
            audit,
        }
    }

    // Resolve a request. `target_tenant` carries the tenant a platform
    // admin wants to operate on; everyone else is bound to the tenant
    // in their claims.
    pub async fn resolve(
        &self,
        bearer: Option<&str>,
        target_tenant: Option<&str>,
        ip: Option<&str>,
        write: bool,
    ) -> Result<TenantSession, AuthError> {
        let token = bearer.ok_or(AuthError::MissingCredential)?;

        let claims = match self.identity.verify_bearer(token).await {
            Ok(claims) => claims,
            Err(err) => {
                self.emit_auth_failure(ip, &err);
                return Err(match err {
                    IdentityError::Expired => AuthError::Expired,
                    IdentityError::Invalid => AuthError::Unauthorized,
                });
            }
        };

        if claims.expires_at <= get_current_time_in_seconds() {
            self.emit_auth_failure(ip, &IdentityError::Expired);
            return Err(AuthError::Expired);
        }

        let roles: Vec<Role> = claims
            .roles
            .iter()
            .filter_map(|role| Role::from_str(role))
            .collect();

        let (tenant_id, impersonated) = self.select_tenant(&claims, &roles, target_tenant)?;

        let tenant = match self.storage.get_tenant(&tenant_id).await {
            Ok(tenant) => tenant,
            // Unknown tenant surfaces exactly like a bad credential:
            // existence is not leaked. The audit trail records the truth.
            Err(StorageError::NotFound) => {
                self.audit.emit(
                    SecurityEvent::new(
                        SecurityEventKind::AuthFailure,
                        Severity::Warning,
                        "resolve_tenant",
                        "unknown_tenant",
                        get_current_time_in_millis(),
                    )
                    .with_actor(claims.subject.clone())
                    .with_ip(ip.unwrap_or("-")),
                );
                return Err(AuthError::Unauthorized);
            }
            Err(err) => return Err(err.into()),
        };

        let read_only = tenant.is_suspended();
        if read_only {
            if write {
                self.audit.emit(
                    SecurityEvent::new(
                        SecurityEventKind::TenantSuspendedAccess,
                        Severity::Warning,
                        "resolve_tenant",
                        "write_rejected",
                        get_current_time_in_millis(),
                    )
                    .with_actor(claims.subject.clone())
                    .with_resource(format!("tenant:{}", tenant_id)),
                );
                return Err(AuthError::TenantSuspended);
            }
            debug!(
                "Read-only access to suspended tenant {} by {}",
                tenant_id, claims.subject
            );
        }

        let mut actor = Actor::new(claims.subject.clone(), roles);
        if let Some(ip) = ip {
            actor = actor.with_ip(ip.to_string());
        }
        if let Some(impersonator) = impersonated {
            self.audit.emit(
                SecurityEvent::new(
                    SecurityEventKind::Impersonation,
                    Severity::Info,
                    "resolve_tenant",
                    "impersonation_active",
                    get_current_time_in_millis(),
                )
                .with_actor(impersonator.clone())
                .with_resource(format!("tenant:{}", tenant_id)),
            );
            actor = actor.with_impersonator(impersonator);
        }

        let store = self.storage.tenant_store(tenant.get_namespace())?;
        let ctx = RequestContext::new(tenant_id, tenant.get_namespace().to_string(), actor);

        Ok(TenantSession {
            tenant,
            store,
            ctx,
            read_only,
        })
    }

    // Platform admins may point at any tenant; everyone else gets the
    // tenant from their claims, and a mismatching target is refused
    // without revealing whether it exists
    fn select_tenant(
        &self,
        claims: &Claims,
        roles: &[Role],
        target_tenant: Option<&str>,
    ) -> Result<(Id, Option<String>), AuthError> {
        match target_tenant {
            None => Ok((claims.tenant_id, None)),
            Some(target) => {
                let target_id = Id::from_str(target).map_err(|_| AuthError::Unauthorized)?;
                if target_id == claims.tenant_id {
                    return Ok((target_id, None));
                }
                if roles.contains(&Role::PlatformAdmin) {
                    // Cross-tenant scope: every mutation downstream
                    // records the impersonator
                    return Ok((target_id, Some(claims.subject.clone())));
                }
                Err(AuthError::Unauthorized)
            }
        }
    }

    fn emit_auth_failure(&self, ip: Option<&str>, err: &IdentityError) {
        let result = match err {
            IdentityError::Invalid => "invalid_token",
            IdentityError::Expired => "expired_token",
        };
        self.audit.emit(
            SecurityEvent::new(
                SecurityEventKind::AuthFailure,
                Severity::Warning,
                "verify_bearer",
                result,
                get_current_time_in_millis(),
            )
            .with_ip(ip.unwrap_or("-")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DevIdentityProvider;
    use festa_common::crypto::SigningKey;

    async fn setup() -> (tempfile::TempDir, TenantRouter, Tenant) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SledStorage::open(dir.path()).unwrap());

        let tenant = Tenant::new(
            Id::random(),
            "Fest".to_string(),
            "fest".to_string(),
            SigningKey::random(),
            0,
        );
        storage.save_tenant(&tenant).await.unwrap();

        let router = TenantRouter::new(storage, Arc::new(DevIdentityProvider), AuditSink::log_only());
        (dir, router, tenant)
    }

    #[tokio::test]
    async fn test_resolve_ok() {
        let (_dir, router, tenant) = setup().await;
        let token = format!("dev:alice:{}:user", tenant.get_id());

        let session = router
            .resolve(Some(&token), None, Some("203.0.113.7"), true)
            .await
            .unwrap();
        assert_eq!(session.ctx.get_tenant_id(), tenant.get_id());
        assert_eq!(session.ctx.get_namespace(), "fest");
        assert!(!session.read_only);
    }

    #[tokio::test]
    async fn test_missing_bearer() {
        let (_dir, router, _tenant) = setup().await;
        assert!(matches!(
            router.resolve(None, None, None, false).await,
            Err(AuthError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tenant_not_leaked() {
        let (_dir, router, _tenant) = setup().await;
        // Valid token shape, tenant that does not exist
        let token = format!("dev:alice:{}:user", Id::random());
        assert!(matches!(
            router.resolve(Some(&token), None, None, false).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_cross_tenant_requires_platform_admin() {
        let (_dir, router, tenant) = setup().await;
        let other = Id::random();

        // Regular user targeting another tenant is refused
        let token = format!("dev:alice:{}:user", tenant.get_id());
        assert!(matches!(
            router
                .resolve(Some(&token), Some(&other.to_hex()), None, false)
                .await,
            Err(AuthError::Unauthorized)
        ));

        // Platform admin reaches it (and is recorded as impersonator),
        // though the target must exist
        let token = format!("dev:root:{}:platform_admin", tenant.get_id());
        assert!(matches!(
            router
                .resolve(Some(&token), Some(&other.to_hex()), None, false)
                .await,
            Err(AuthError::Unauthorized)
        ));

        let session = router
            .resolve(Some(&token), Some(&tenant.get_id().to_hex()), None, false)
            .await
            .unwrap();
        assert!(session.ctx.get_actor().get_impersonator().is_none());
    }

    #[tokio::test]
    async fn test_suspended_tenant_read_only() {
        let (_dir, router, mut tenant) = setup().await;
        tenant.set_status(festa_common::tenant::TenantStatus::Suspended);
        router.storage.save_tenant(&tenant).await.unwrap();

        let token = format!("dev:alice:{}:user", tenant.get_id());

        // Writes are rejected
        assert!(matches!(
            router.resolve(Some(&token), None, None, true).await,
            Err(AuthError::TenantSuspended)
        ));

        // Reads still work, flagged read-only
        let session = router.resolve(Some(&token), None, None, false).await.unwrap();
        assert!(session.read_only);
    }
}
