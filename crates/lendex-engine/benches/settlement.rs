//! Settlement Benchmarks
//!
//! - Interest and fee math
//! - Full lend / withdraw cycle over the in-memory store
//! - Borrow / repay cycle

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lendex_common::ManualClock;
use lendex_engine::interest::{
    accrued_interest, fixed_term_interest, liquidation_price, split_fee,
};
use lendex_engine::{
    BorrowRequest, EngineConfig, InterestPolicy, LendRequest, LendingService, RepayRequest,
    StaticPriceOracle, WithdrawRequest,
};
use rust_decimal_macros::dec;

fn bench_interest_math(c: &mut Criterion) {
    let mut group = c.benchmark_group("interest");
    let policy = InterestPolicy::default();

    for days in [1u32, 30, 365, 3650].iter() {
        group.bench_with_input(BenchmarkId::new("fixed_term", days), days, |b, &days| {
            b.iter(|| {
                let total =
                    fixed_term_interest(black_box(dec!(1000)), black_box(dec!(8.5)), days, &policy)
                        .unwrap();
                black_box(split_fee(total, dec!(15), &policy).unwrap())
            });
        });
    }

    group.bench_function("accrued", |b| {
        b.iter(|| accrued_interest(black_box(dec!(1000)), black_box(dec!(12)), 30, &policy));
    });

    group.bench_function("liquidation_price", |b| {
        b.iter(|| liquidation_price(black_box(dec!(1000)), black_box(dec!(0.03)), &policy));
    });

    group.finish();
}

fn service(rt: &tokio::runtime::Runtime, clock: Arc<ManualClock>) -> LendingService {
    let _guard = rt.enter();
    let oracle = StaticPriceOracle::new()
        .with_price("USDT", dec!(1))
        .and_then(|o| o.with_price("BTC", dec!(50000)))
        .unwrap();

    LendingService::builder(EngineConfig::default())
        .with_clock(clock)
        .with_price_oracle(Arc::new(oracle))
        .build()
        .unwrap()
}

fn bench_settlement_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let service = service(&rt, clock.clone());

    rt.block_on(async {
        service.deposit("alice", "USDT", dec!(1000000)).await.unwrap();
        service.deposit("bob", "BTC", dec!(100)).await.unwrap();
        service.deposit("bob", "USDT", dec!(1000000)).await.unwrap();
    });

    let mut group = c.benchmark_group("settlement");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("lend_withdraw", |b| {
        b.iter(|| {
            rt.block_on(async {
                let outcome = service
                    .lend(LendRequest {
                        user_id: "alice".into(),
                        asset_id: "USDT".into(),
                        amount: dec!(100),
                        duration_days: 1,
                    })
                    .await
                    .unwrap();
                clock.advance_days(1);
                black_box(
                    service
                        .withdraw(WithdrawRequest {
                            user_id: "alice".into(),
                            position_id: outcome.position.id,
                        })
                        .await
                        .unwrap(),
                )
            })
        });
    });

    group.bench_function("borrow_repay", |b| {
        b.iter(|| {
            rt.block_on(async {
                let position = service
                    .borrow(BorrowRequest {
                        user_id: "bob".into(),
                        borrow_asset_id: "USDT".into(),
                        amount: dec!(1000),
                        collateral_asset_id: "BTC".into(),
                        collateral_amount: dec!(0.03),
                        duration_days: 30,
                    })
                    .await
                    .unwrap();
                black_box(
                    service
                        .repay(RepayRequest {
                            user_id: "bob".into(),
                            position_id: position.id,
                        })
                        .await
                        .unwrap(),
                )
            })
        });
    });

    group.finish();
}

criterion_group!(math, bench_interest_math);

criterion_group!(cycles, bench_settlement_cycle);

criterion_main!(math, cycles);
