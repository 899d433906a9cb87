use paylock::domain::invoice::InvoiceStatus;
use paylock::domain::ledger::{OperationKind, sum_matching};
use paylock::domain::lock::LockBackend;
use paylock::domain::status::{DirectionTotals, project};
use paylock::error::EngineError;
use proptest::prelude::*;

mod common;
use common::{Cluster, amount, id};

fn kind() -> impl Strategy<Value = OperationKind> {
    prop_oneof![Just(OperationKind::Capture), Just(OperationKind::Refund)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_never_exceeds_authorized_amount(
        authorized in 1i64..500,
        operations in prop::collection::vec((kind(), 1i64..200, any::<bool>()), 1..30),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let cluster = Cluster::new();
            let engine = cluster.engine(LockBackend::Advisory);
            let tx = id("tx-1");
            engine.authorize(tx.clone(), amount(authorized)).await.unwrap();

            for (kind, value, confirm) in operations {
                match engine.reserve(&tx, amount(value), kind).await {
                    Ok(reservation) if reservation.is_final && confirm => {
                        engine.finalize(&tx, amount(value), kind).await.unwrap();
                    }
                    Ok(_) => {}
                    Err(EngineError::ExceedsAuthorizedAmount { .. })
                    | Err(EngineError::AlreadySettled { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }

                let entries = engine.entries(&tx, None).await.unwrap();
                for direction in [OperationKind::Capture, OperationKind::Refund] {
                    let committed = sum_matching(&entries, &direction.committed_statuses());
                    assert!(committed <= authorized);
                    let confirmed = sum_matching(&entries, &[direction.terminal()]);
                    assert!(confirmed == 0 || committed == authorized);
                }
            }
        });
    }

    #[test]
    fn projector_is_terminal_exactly_when_settled(
        ceiling in 1i64..1000,
        confirmed_share in 0i64..1000,
        reserved_share in 0i64..1000,
        pending in 0i64..1000,
        kind in kind(),
    ) {
        let confirmed = confirmed_share % (ceiling + 1);
        let reserved = reserved_share % (ceiling - confirmed + 1);
        let totals = DirectionTotals { ceiling, confirmed, reserved, pending };
        let status = project(kind, totals, InvoiceStatus::Authorized);

        prop_assert_eq!(
            status == kind.terminal_status(),
            confirmed > 0 && confirmed + reserved == ceiling
        );
        if confirmed + reserved == 0 {
            let expected = if pending > 0 { kind.in_progress_status() } else { InvoiceStatus::Authorized };
            prop_assert_eq!(status, expected);
        }
    }
}
