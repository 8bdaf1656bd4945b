// Property tests for the money invariants: whatever sequence of
// operations arrives, a wallet never goes negative, the journal sums to
// the balance, and idempotency keys apply at most once.

mod common;

use common::harness;
use festa_daemon::core::{error::LedgerError, storage::TransactionProvider};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Credit(u64),
    Debit(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=500).prop_map(Op::Credit),
        (1u64..=500).prop_map(Op::Debit),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn balance_matches_journal_for_any_sequence(ops in prop::collection::vec(op_strategy(), 1..32)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let h = harness().await;
            let wallet = h.wallet_with_balance(0).await;
            let mut model: u64 = 0;

            for (i, op) in ops.iter().enumerate() {
                match op {
                    Op::Credit(amount) => {
                        h.ledger
                            .credit(
                                &h.ctx,
                                &h.store,
                                &wallet,
                                *amount,
                                format!("op{}", i),
                                format!("key{}", i),
                                Default::default(),
                            )
                            .await
                            .unwrap();
                        model += amount;
                    }
                    Op::Debit(amount) => {
                        let result = h
                            .ledger
                            .debit(
                                &h.ctx,
                                &h.store,
                                &wallet,
                                *amount,
                                format!("op{}", i),
                                format!("key{}", i),
                                Default::default(),
                            )
                            .await;
                        if *amount <= model {
                            result.unwrap();
                            model -= amount;
                        } else {
                            // Over-spending is rejected, state untouched
                            assert!(matches!(
                                result,
                                Err(LedgerError::InsufficientBalance { .. })
                            ));
                        }
                    }
                }

                // The committed balance tracks the model after every step
                assert_eq!(h.balance(&wallet).await, model);
            }

            // Journal sum and balance_after chain agree with the balance
            h.ledger.verify_wallet_invariant(&h.store, &wallet).await.unwrap();
        });
    }

    #[test]
    fn repeated_key_applies_at_most_once(amount in 1u64..=500, repeats in 2usize..6) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let h = harness().await;
            let wallet = h.wallet_with_balance(1000).await;

            let mut ids = Vec::new();
            for _ in 0..repeats {
                let outcome = h
                    .ledger
                    .debit(
                        &h.ctx,
                        &h.store,
                        &wallet,
                        amount,
                        "repeat".to_string(),
                        "same-key".to_string(),
                        Default::default(),
                    )
                    .await
                    .unwrap();
                ids.push(*outcome.transaction().get_id());
            }

            // One journal row; every response carries the same transaction
            assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
            assert_eq!(h.balance(&wallet).await, 1000 - amount);

            let transactions = h
                .store
                .list_transactions(&wallet, Default::default(), Default::default())
                .await
                .unwrap();
            // Initial funding plus exactly one debit
            assert_eq!(transactions.len(), 2);
        });
    }

    #[test]
    fn divergent_payload_conflicts_for_any_amounts(
        first in 1u64..=400,
        second in 401u64..=800,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let h = harness().await;
            let wallet = h.wallet_with_balance(1000).await;

            h.ledger
                .debit(
                    &h.ctx,
                    &h.store,
                    &wallet,
                    first,
                    "ref".to_string(),
                    "key".to_string(),
                    Default::default(),
                )
                .await
                .unwrap();

            let conflict = h
                .ledger
                .debit(
                    &h.ctx,
                    &h.store,
                    &wallet,
                    second,
                    "ref".to_string(),
                    "key".to_string(),
                    Default::default(),
                )
                .await;
            assert!(matches!(conflict, Err(LedgerError::IdempotencyConflict)));
            assert_eq!(h.balance(&wallet).await, 1000 - first);
        });
    }
}
