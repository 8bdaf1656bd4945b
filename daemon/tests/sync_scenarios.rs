mod common;

use common::harness;
use festa_common::{
    api::sync::SubmitBatchParams,
    crypto::{Id, Signature},
    sync::SyncOutcome,
    transaction::TransactionKind,
};
use festa_daemon::core::error::SyncError;

#[tokio::test]
async fn offline_batch_with_conflict() {
    let h = harness().await;
    let wallet_w = h.wallet_with_balance(500).await;
    let wallet_x = h.wallet_with_balance(1000).await;

    let params = SubmitBatchParams {
        batch_id: Id::random(),
        device_id: "pos-07".to_string(),
        transactions: vec![
            h.offline_tx("t1", "pos-07", wallet_w, 200, TransactionKind::Payment),
            h.offline_tx("t2", "pos-07", wallet_w, 400, TransactionKind::Payment),
            h.offline_tx("t3", "pos-07", wallet_x, 100, TransactionKind::Payment),
        ],
    };

    let result = h
        .sync
        .submit_batch(&h.ctx, &h.store, &h.tenant, params)
        .await
        .unwrap();

    assert_eq!(result.status, "partial");
    assert_eq!(result.summary.total, 3);
    assert_eq!(result.summary.success, 2);
    assert_eq!(result.summary.conflicts, 1);

    // Items come back in input order
    assert_eq!(result.results[0].local_id, "t1");
    assert_eq!(result.results[0].outcome, SyncOutcome::Success);
    assert_eq!(result.results[1].outcome, SyncOutcome::Conflict);
    assert_eq!(
        result.results[1].reason.as_deref(),
        Some("insufficient_balance")
    );
    assert_eq!(result.results[1].resolution.as_deref(), Some("server_wins"));
    assert_eq!(result.results[2].outcome, SyncOutcome::Success);

    assert_eq!(h.balance(&wallet_w).await, 300);
    assert_eq!(h.balance(&wallet_x).await, 900);
}

#[tokio::test]
async fn duplicate_detection_across_batches() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(1000).await;

    let first = SubmitBatchParams {
        batch_id: Id::random(),
        device_id: "pos-07".to_string(),
        transactions: vec![h.offline_tx("t1", "pos-07", wallet, 200, TransactionKind::Payment)],
    };
    let first_result = h
        .sync
        .submit_batch(&h.ctx, &h.store, &h.tenant, first)
        .await
        .unwrap();
    let original_tx_id = first_result.results[0].server_tx_id.unwrap();

    // New batch resubmitting t1 plus a fresh t4
    let second = SubmitBatchParams {
        batch_id: Id::random(),
        device_id: "pos-07".to_string(),
        transactions: vec![
            h.offline_tx("t1", "pos-07", wallet, 200, TransactionKind::Payment),
            h.offline_tx("t4", "pos-07", wallet, 100, TransactionKind::Payment),
        ],
    };
    let second_result = h
        .sync
        .submit_batch(&h.ctx, &h.store, &h.tenant, second)
        .await
        .unwrap();

    assert_eq!(second_result.results[0].outcome, SyncOutcome::Duplicate);
    assert_eq!(
        second_result.results[0].server_tx_id,
        Some(original_tx_id)
    );
    assert_eq!(second_result.results[1].outcome, SyncOutcome::Success);

    // No double charge: 1000 - 200 - 100
    assert_eq!(h.balance(&wallet).await, 700);
}

#[tokio::test]
async fn batch_resubmission_returns_identical_result() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(500).await;
    let batch_id = Id::random();

    let make_params = || SubmitBatchParams {
        batch_id,
        device_id: "pos-07".to_string(),
        transactions: vec![
            h.offline_tx("t1", "pos-07", wallet, 200, TransactionKind::Payment),
            h.offline_tx("t2", "pos-07", wallet, 400, TransactionKind::Payment),
        ],
    };

    let first = h
        .sync
        .submit_batch(&h.ctx, &h.store, &h.tenant, make_params())
        .await
        .unwrap();
    let second = h
        .sync
        .submit_batch(&h.ctx, &h.store, &h.tenant, make_params())
        .await
        .unwrap();

    assert_eq!(first.status, second.status);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.results.len(), second.results.len());
    for (a, b) in first.results.iter().zip(&second.results) {
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.server_tx_id, b.server_tx_id);
    }

    // Applied exactly once
    assert_eq!(h.balance(&wallet).await, 300);
}

#[tokio::test]
async fn tampered_signature_rejected() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(500).await;

    let mut tx = h.offline_tx("t1", "pos-07", wallet, 200, TransactionKind::Payment);
    // Flip one bit of the signature
    let mut bytes = *tx.signature.as_bytes();
    bytes[0] ^= 1;
    tx.signature = Signature::new(bytes);

    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: vec![tx],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.results[0].outcome, SyncOutcome::Rejected);
    assert_eq!(result.results[0].reason.as_deref(), Some("bad_signature"));
    assert_eq!(h.balance(&wallet).await, 500);
}

#[tokio::test]
async fn tampered_amount_rejected() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(500).await;

    let mut tx = h.offline_tx("t1", "pos-07", wallet, 200, TransactionKind::Payment);
    tx.amount = 2;

    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: vec![tx],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.results[0].outcome, SyncOutcome::Rejected);
    assert_eq!(h.balance(&wallet).await, 500);
}

#[tokio::test]
async fn unknown_wallet_rejected() {
    let h = harness().await;

    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: vec![h.offline_tx(
                    "t1",
                    "pos-07",
                    Id::random(),
                    200,
                    TransactionKind::Payment,
                )],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.results[0].outcome, SyncOutcome::Rejected);
    assert_eq!(result.results[0].reason.as_deref(), Some("unknown_wallet"));
}

#[tokio::test]
async fn offline_recharge_credits() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(100).await;

    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: vec![h.offline_tx(
                    "t1",
                    "pos-07",
                    wallet,
                    400,
                    TransactionKind::Recharge,
                )],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, "completed");
    assert_eq!(h.balance(&wallet).await, 500);
}

#[tokio::test]
async fn later_items_observe_earlier_ones() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(100).await;

    // The recharge first, then a debit only possible because of it
    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: vec![
                    h.offline_tx("t1", "pos-07", wallet, 500, TransactionKind::Recharge),
                    h.offline_tx("t2", "pos-07", wallet, 550, TransactionKind::Payment),
                ],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, "completed");
    assert_eq!(h.balance(&wallet).await, 50);
}

#[tokio::test]
async fn empty_batch_rejected() {
    let h = harness().await;

    let result = h
        .sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id: Id::random(),
                device_id: "pos-07".to_string(),
                transactions: Vec::new(),
            },
        )
        .await;

    assert!(matches!(result, Err(SyncError::EmptyBatch)));
}

#[tokio::test]
async fn list_pending_excludes_terminal_batches() {
    let h = harness().await;
    let wallet = h.wallet_with_balance(500).await;
    let batch_id = Id::random();

    h.sync
        .submit_batch(
            &h.ctx,
            &h.store,
            &h.tenant,
            SubmitBatchParams {
                batch_id,
                device_id: "pos-07".to_string(),
                transactions: vec![h.offline_tx(
                    "t1",
                    "pos-07",
                    wallet,
                    100,
                    TransactionKind::Payment,
                )],
            },
        )
        .await
        .unwrap();

    let pending = h.sync.list_pending(&h.store, "pos-07").await.unwrap();
    assert!(pending.batch_ids.is_empty());

    let stored = h.sync.get_batch(&h.store, &batch_id).await.unwrap().unwrap();
    assert_eq!(stored.status, "completed");
}
