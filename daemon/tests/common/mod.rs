// Shared harness for the end-to-end scenarios: a sled store in a temp
// directory, one tenant, a ledger with a drained event channel, and a
// sync engine wired to a log-only audit sink.
#![allow(dead_code)]

use festa_common::{
    context::{Actor, RequestContext, Role},
    crypto::{sign, Id, Signature, SigningKey},
    sync::OfflineTransaction,
    tenant::Tenant,
    transaction::TransactionKind,
};
use festa_daemon::core::{
    audit::AuditSink,
    ledger::{Ledger, LedgerConfig, LedgerEvent},
    storage::{SledStorage, TenantProvider, TenantStore, WalletProvider},
    sync::SyncEngine,
    verifier::OfflineVerifier,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Harness {
    // Keeps the temp directory alive for the duration of the test
    pub _dir: tempfile::TempDir,
    pub storage: Arc<SledStorage>,
    pub ledger: Arc<Ledger>,
    pub sync: Arc<SyncEngine>,
    pub tenant: Tenant,
    pub store: TenantStore,
    pub ctx: RequestContext,
    pub events: mpsc::Receiver<LedgerEvent>,
}

pub async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SledStorage::open(dir.path()).unwrap());

    let tenant = Tenant::new(
        Id::random(),
        "Testfest".to_string(),
        "testfest".to_string(),
        SigningKey::random(),
        0,
    );
    storage.save_tenant(&tenant).await.unwrap();
    let store = storage.tenant_store(tenant.get_namespace()).unwrap();

    let (events_tx, events) = mpsc::channel(1024);
    let ledger = Arc::new(Ledger::new(events_tx, LedgerConfig::default()));
    let sync = Arc::new(SyncEngine::new(
        ledger.clone(),
        OfflineVerifier::new(festa_common::config::DEFAULT_SIGNATURE_FRESHNESS_SECS),
        AuditSink::log_only(),
    ));

    let ctx = RequestContext::new(
        *tenant.get_id(),
        tenant.get_namespace().to_string(),
        Actor::new("staff:test".to_string(), vec![Role::Staff]),
    );

    Harness {
        _dir: dir,
        storage,
        ledger,
        sync,
        tenant,
        store,
        ctx,
        events,
    }
}

impl Harness {
    // A fresh active wallet funded to the requested balance
    pub async fn wallet_with_balance(&self, balance: u64) -> Id {
        let wallet = self
            .ledger
            .open_wallet(
                &self.ctx,
                &self.store,
                Id::random(),
                "token".to_string(),
                1000,
            )
            .await
            .unwrap();
        let wallet_id = *wallet.get_id();

        if balance > 0 {
            self.ledger
                .credit(
                    &self.ctx,
                    &self.store,
                    &wallet_id,
                    balance,
                    "initial funding".to_string(),
                    format!("fund:{}", wallet_id),
                    Default::default(),
                )
                .await
                .unwrap();
        }
        wallet_id
    }

    pub async fn balance(&self, wallet_id: &Id) -> u64 {
        self.store
            .get_wallet(wallet_id)
            .await
            .unwrap()
            .get_balance()
    }

    // A device-signed offline transaction for this tenant
    pub fn offline_tx(
        &self,
        local_id: &str,
        device_id: &str,
        wallet_id: Id,
        amount: u64,
        kind: TransactionKind,
    ) -> OfflineTransaction {
        let mut tx = OfflineTransaction {
            local_id: local_id.to_string(),
            wallet_id,
            amount,
            kind,
            stand_id: Some(Id::random()),
            staff_id: None,
            product_ids: Vec::new(),
            signature: Signature::zero(),
            timestamp: festa_common::time::get_current_time_in_millis(),
            device_id: device_id.to_string(),
        };
        tx.signature = sign(
            self.tenant.get_signing_key(),
            &tx.signing_payload(self.tenant.get_id()),
        );
        tx
    }
}
