//! Borrow, Repay and Liquidate end to end

mod common;

use common::{Harness, FEE_WAIT};
use lendex_common::{
    ErrorClass, LendexError, PositionError, PositionKind, PositionStatus, MAX_AMOUNT,
};
use lendex_engine::{BorrowRequest, LendRequest, LiquidateRequest, RepayRequest, WithdrawRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn borrow(user_id: &str, amount: Decimal, collateral_amount: Decimal) -> BorrowRequest {
    BorrowRequest {
        user_id: user_id.into(),
        borrow_asset_id: "USDT".into(),
        amount,
        collateral_asset_id: "BTC".into(),
        collateral_amount,
        duration_days: 30,
    }
}

fn repay(user_id: &str, position_id: Uuid) -> RepayRequest {
    RepayRequest {
        user_id: user_id.into(),
        position_id,
    }
}

#[tokio::test]
async fn test_borrow_exactly_at_required_ratio() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;

    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    assert_eq!(position.kind, PositionKind::Borrowing);
    assert_eq!(position.asset_id, "USDT");
    assert_eq!(position.principal, dec!(1000));
    assert_eq!(position.annual_rate_percent, dec!(12));

    let collateral = position.collateral.clone().unwrap();
    assert_eq!(collateral.asset_id, "BTC");
    assert_eq!(collateral.amount, dec!(0.03));
    assert_eq!(collateral.value_at_origination, dec!(1500));
    assert_eq!(collateral.liquidation_price, dec!(43333.33333333));
    assert_eq!(collateral.liquidation_price.round_dp(2), dec!(43333.33));

    // Borrowed funds are available, collateral is locked
    let usdt = h.service.balance("bob", "USDT").await;
    assert_eq!(usdt.total, dec!(1000));
    assert_eq!(usdt.available(), dec!(1000));
    assert_eq!(h.locked("bob", "BTC").await, dec!(0.03));
    assert_eq!(h.total("bob", "BTC").await, dec!(0.03));
    assert!(h.service.reconcile("bob").await.is_clean());
}

#[tokio::test]
async fn test_borrow_below_required_ratio() {
    let h = Harness::new();
    h.fund("carol", "BTC", dec!(1)).await;

    let err = h
        .service
        .borrow(borrow("carol", dec!(1000), dec!(0.029998)))
        .await
        .unwrap_err();
    match err {
        LendexError::InsufficientCollateral { required, provided } => {
            assert_eq!(required, dec!(150));
            assert_eq!(provided, dec!(149.99));
        }
        other => panic!("expected InsufficientCollateral, got {other:?}"),
    }

    assert_eq!(h.locked("carol", "BTC").await, Decimal::ZERO);
    assert_eq!(h.total("carol", "USDT").await, Decimal::ZERO);
    assert!(h.service.list_positions("carol").await.positions.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_on_same_collateral() {
    let h = Harness::new();
    h.fund("dave", "BTC", dec!(0.05)).await;

    let first = {
        let service = h.service.clone();
        tokio::spawn(async move { service.borrow(borrow("dave", dec!(1000), dec!(0.03))).await })
    };
    let second = {
        let service = h.service.clone();
        tokio::spawn(async move { service.borrow(borrow("dave", dec!(1000), dec!(0.03))).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match failure {
        LendexError::InsufficientBalance {
            asset_id,
            required,
            available,
        } => {
            assert_eq!(asset_id, "BTC");
            assert_eq!(*required, dec!(0.03));
            assert_eq!(*available, dec!(0.02));
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }

    assert_eq!(h.locked("dave", "BTC").await, dec!(0.03));
    assert_eq!(h.total("dave", "USDT").await, dec!(1000));
    assert_eq!(h.service.list_positions("dave").await.positions.len(), 1);
}

#[tokio::test]
async fn test_repay_requires_principal_plus_interest() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    h.clock.advance_days(30);
    let err = h
        .service
        .repay(repay("bob", position.id))
        .await
        .unwrap_err();
    match err {
        LendexError::InsufficientBalance {
            ref asset_id,
            required,
            available,
        } => {
            assert_eq!(asset_id, "USDT");
            assert_eq!(required, dec!(1009.86301370));
            assert_eq!(available, dec!(1000));
        }
        ref other => panic!("expected InsufficientBalance, got {other:?}"),
    }
    assert_eq!(err.class(), ErrorClass::Insufficiency);

    assert_eq!(h.locked("bob", "BTC").await, dec!(0.03));
    assert_eq!(h.total("bob", "USDT").await, dec!(1000));
    let stored = h.service.ledger().get_position(position.id).await.unwrap();
    assert_eq!(stored.status, PositionStatus::Active);
}

#[tokio::test]
async fn test_repay_settles_and_releases_collateral() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    h.clock.advance_days(30);
    h.fund("bob", "USDT", dec!(10)).await;

    let result = h.service.repay(repay("bob", position.id)).await.unwrap();
    assert_eq!(result.total_interest, dec!(9.86301370));
    assert_eq!(result.platform_fee, dec!(1.47945206));
    assert_eq!(
        result.platform_fee + result.net_interest,
        result.total_interest
    );
    assert_eq!(result.amount, dec!(1009.86301370));
    assert_eq!(result.position.status, PositionStatus::Repaid);
    assert_eq!(result.position.interest_accrued, dec!(9.86301370));

    assert_eq!(h.total("bob", "USDT").await, dec!(0.13698630));
    assert_eq!(h.locked("bob", "BTC").await, Decimal::ZERO);
    assert_eq!(h.total("bob", "BTC").await, dec!(0.03));

    assert!(h.sink.wait_for(1, FEE_WAIT).await);
    assert_eq!(h.sink.collected()[0].amount_usd, dec!(1.47945206));

    let err = h
        .service
        .repay(repay("bob", position.id))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::State);
}

#[tokio::test]
async fn test_immediate_repay_owes_no_interest() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    let result = h.service.repay(repay("bob", position.id)).await.unwrap();
    assert_eq!(result.total_interest, Decimal::ZERO);
    assert_eq!(result.amount, dec!(1000));
    assert!(!result.fee_queued);
    assert_eq!(h.total("bob", "USDT").await, Decimal::ZERO);
    assert_eq!(h.locked("bob", "BTC").await, Decimal::ZERO);
}

#[tokio::test]
async fn test_repay_interest_grows_with_elapsed_days() {
    let mut owed = Vec::new();
    for days in [1, 7, 30, 90] {
        let h = Harness::new();
        h.fund("bob", "BTC", dec!(0.03)).await;
        h.fund("bob", "USDT", dec!(100)).await;
        let position = h
            .service
            .borrow(borrow("bob", dec!(1000), dec!(0.03)))
            .await
            .unwrap();

        h.clock.advance_days(days);
        let result = h.service.repay(repay("bob", position.id)).await.unwrap();
        owed.push(result.total_interest);
    }

    assert!(owed.windows(2).all(|w| w[0] <= w[1]), "{owed:?}");
}

#[tokio::test]
async fn test_liquidation_after_price_drop() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    assert!(h.service.liquidation_candidates().await.is_empty());
    let err = h
        .service
        .liquidate(LiquidateRequest {
            position_id: position.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LendexError::Position(PositionError::NotLiquidatable { .. })
    ));

    h.clock.advance_days(10);
    h.oracle.set_price("BTC", dec!(43000)).unwrap();

    let candidates = h.service.liquidation_candidates().await;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].position.id, position.id);
    assert_eq!(candidates[0].collateral_price, dec!(43000));

    let result = h
        .service
        .liquidate(LiquidateRequest {
            position_id: position.id,
        })
        .await
        .unwrap();
    assert_eq!(result.position.status, PositionStatus::Liquidated);
    assert_eq!(result.collateral_seized, dec!(0.03));
    assert_eq!(result.interest_accrued, dec!(3.28767123));
    assert_eq!(result.position.platform_fee_collected, Decimal::ZERO);

    let treasury = h.service.config().treasury_account.clone();
    assert_eq!(h.total(&treasury, "BTC").await, dec!(0.03));
    assert_eq!(h.total("bob", "BTC").await, Decimal::ZERO);
    assert_eq!(h.locked("bob", "BTC").await, Decimal::ZERO);
    assert_eq!(h.total("bob", "USDT").await, dec!(1000));
    assert!(h.service.reconcile("bob").await.is_clean());
    assert!(h.service.liquidation_candidates().await.is_empty());

    let err = h
        .service
        .repay(repay("bob", position.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LendexError::Position(PositionError::NotActive {
            status: PositionStatus::Liquidated,
            ..
        })
    ));
    assert_eq!(h.service.notifier_stats().enqueued, 0);
}

#[tokio::test]
async fn test_borrow_fails_closed_without_price() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    h.oracle.remove_price("BTC");

    let err = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap_err();
    assert!(matches!(err, LendexError::PriceUnavailable(ref asset) if asset == "BTC"));
    assert_eq!(err.class(), ErrorClass::Infrastructure);
    assert_eq!(h.locked("bob", "BTC").await, Decimal::ZERO);
    assert_eq!(h.total("bob", "USDT").await, Decimal::ZERO);
}

#[tokio::test]
async fn test_borrow_rejects_unusable_collateral() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(1)).await;

    let err = h
        .service
        .borrow(BorrowRequest {
            collateral_asset_id: "DOGE".into(),
            ..borrow("bob", dec!(1000), dec!(1))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LendexError::AssetNotSupported { .. }));

    let err = h
        .service
        .borrow(BorrowRequest {
            collateral_asset_id: "USDT".into(),
            ..borrow("bob", dec!(1000), dec!(2000))
        })
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn test_withdraw_on_borrowing_is_wrong_kind() {
    let h = Harness::new();
    h.fund("bob", "BTC", dec!(0.03)).await;
    let position = h
        .service
        .borrow(borrow("bob", dec!(1000), dec!(0.03)))
        .await
        .unwrap();

    let err = h
        .service
        .withdraw(WithdrawRequest {
            user_id: "bob".into(),
            position_id: position.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LendexError::Position(PositionError::WrongKind {
            expected: PositionKind::Lending,
            ..
        })
    ));
}

#[tokio::test]
async fn test_list_positions_summarizes_exposure() {
    let h = Harness::new();
    h.fund("erin", "BTC", dec!(0.1)).await;
    h.fund("erin", "USDC", dec!(800)).await;

    h.service
        .borrow(borrow("erin", dec!(1000), dec!(0.03)))
        .await
        .unwrap();
    h.service
        .lend(LendRequest {
            user_id: "erin".into(),
            asset_id: "USDC".into(),
            amount: dec!(800),
            duration_days: 60,
        })
        .await
        .unwrap();

    let overview = h.service.list_positions("erin").await;
    assert_eq!(overview.user_id, "erin");
    assert_eq!(overview.positions.len(), 2);
    assert_eq!(overview.summary.active_borrowing, 1);
    assert_eq!(overview.summary.active_lending, 1);
    assert_eq!(overview.summary.total_borrowed("USDT"), dec!(1000));
    assert_eq!(overview.summary.total_lent("USDC"), dec!(800));
    assert_eq!(overview.summary.exposures["BTC"].collateral_locked, dec!(0.03));
    assert!(h.service.reconcile("erin").await.is_clean());
}

#[tokio::test]
async fn test_oversized_amounts_are_rejected() {
    let h = Harness::new();

    // Unfunded caller with an out-of-range collateral amount
    let service = h.service.clone();
    let handle =
        tokio::spawn(async move { service.borrow(borrow("eve", dec!(1), Decimal::MAX / dec!(2))).await });
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, LendexError::Validation(_)));

    let huge = Decimal::from_i128_with_scale(10_i128.pow(25), 0);
    let err = h.service.deposit("bob", "BTC", huge).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(h.total("bob", "BTC").await, Decimal::ZERO);

    // In-range amounts whose value overflows at the quoted price
    h.fund("bob", "BTC", MAX_AMOUNT).await;
    h.oracle.set_price("BTC", huge).unwrap();
    let service = h.service.clone();
    let handle =
        tokio::spawn(async move { service.borrow(borrow("bob", dec!(1000), MAX_AMOUNT)).await });
    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);

    assert_eq!(h.total("bob", "BTC").await, MAX_AMOUNT);
    assert_eq!(h.locked("bob", "BTC").await, Decimal::ZERO);
    assert!(h.service.list_positions("bob").await.positions.is_empty());
    assert_eq!(
        h.service
            .metrics()
            .requests_rejected
            .with_label_values(&["borrow", "validation"])
            .get(),
        2
    );
}
