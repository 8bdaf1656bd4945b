use crate::{crypto::Id, time::TimestampMillis};
use tokio::sync::watch;

// Roles carried by a verified bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Staff,
    TenantAdmin,
    PlatformAdmin,
}

impl Role {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "staff" => Some(Role::Staff),
            "tenant_admin" => Some(Role::TenantAdmin),
            "platform_admin" => Some(Role::PlatformAdmin),
            _ => None,
        }
    }
}

// Who is acting: the credential subject plus an optional impersonator
// when a platform admin operates inside a tenant
#[derive(Debug, Clone)]
pub struct Actor {
    subject: String,
    roles: Vec<Role>,
    impersonator: Option<String>,
    ip: Option<String>,
}

impl Actor {
    pub fn new(subject: String, roles: Vec<Role>) -> Self {
        Self {
            subject,
            roles,
            impersonator: None,
            ip: None,
        }
    }

    pub fn with_impersonator(mut self, impersonator: String) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    pub fn with_ip(mut self, ip: String) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn get_subject(&self) -> &str {
        &self.subject
    }

    pub fn get_roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn get_impersonator(&self) -> Option<&str> {
        self.impersonator.as_deref()
    }

    pub fn get_ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_platform_admin(&self) -> bool {
        self.has_role(Role::PlatformAdmin)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::TenantAdmin) || self.has_role(Role::PlatformAdmin)
    }
}

// Cooperative cancellation signal shared by request handlers and task
// workers. Cloneable; the source side flips the flag once.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, Cancellation) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, Cancellation { receiver })
    }

    pub fn cancel(&self) {
        // Receivers may all be gone already, which is fine
        let _ = self.sender.send(true);
    }
}

impl Cancellation {
    // A cancellation that never fires, for callers without a lifecycle.
    // One process-wide channel backs every instance.
    pub fn never() -> Self {
        use std::sync::OnceLock;
        static NEVER: OnceLock<watch::Receiver<bool>> = OnceLock::new();

        let receiver = NEVER
            .get_or_init(|| {
                let (sender, receiver) = watch::channel(false);
                // Keep the sender alive forever so the channel never closes
                std::mem::forget(sender);
                receiver
            })
            .clone();
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    // Suspend until cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        // An error means the source was dropped without cancelling:
        // treat that as "never cancelled" and park forever
        while self.receiver.changed().await.is_ok() {
            if self.is_cancelled() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

// Per-request execution context: tenant binding, actor, deadline and
// cancel signal, passed explicitly through every layer. No process-wide
// ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: Id,
    namespace: String,
    actor: Actor,
    deadline: Option<TimestampMillis>,
    cancellation: Cancellation,
}

impl RequestContext {
    pub fn new(tenant_id: Id, namespace: String, actor: Actor) -> Self {
        Self {
            tenant_id,
            namespace,
            actor,
            deadline: None,
            cancellation: Cancellation::never(),
        }
    }

    pub fn with_deadline(mut self, deadline: TimestampMillis) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn get_tenant_id(&self) -> &Id {
        &self.tenant_id
    }

    pub fn get_namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get_actor(&self) -> &Actor {
        &self.actor
    }

    pub fn get_deadline(&self) -> Option<TimestampMillis> {
        self.deadline
    }

    pub fn get_cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        let actor = Actor::new("user:42".to_string(), vec![Role::User, Role::Staff]);
        assert!(actor.has_role(Role::Staff));
        assert!(!actor.is_admin());

        let admin = Actor::new("platform:root".to_string(), vec![Role::PlatformAdmin]);
        assert!(admin.is_platform_admin());
        assert!(admin.is_admin());
    }

    #[tokio::test]
    async fn test_cancellation_fires() {
        let (source, cancellation) = CancellationSource::new();
        assert!(!cancellation.is_cancelled());

        source.cancel();
        assert!(cancellation.is_cancelled());

        let mut waiter = cancellation.clone();
        // Must return immediately once cancelled
        waiter.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancellation_never() {
        let cancellation = Cancellation::never();
        assert!(!cancellation.is_cancelled());
    }
}
