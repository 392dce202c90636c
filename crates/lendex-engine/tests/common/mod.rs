//! Shared harness for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use lendex_common::ManualClock;
use lendex_engine::{
    EngineConfig, FeeNotifierConfig, InMemoryFeeSink, LendingService, StaticPriceOracle,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

pub const FEE_WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub service: Arc<LendingService>,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<StaticPriceOracle>,
    pub sink: Arc<InMemoryFeeSink>,
}

impl Harness {
    /// Service over an in-memory store with BTC at 50000 and stablecoins at 1
    pub fn new() -> Self {
        init_tracing();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let oracle = Arc::new(
            StaticPriceOracle::new()
                .with_price("BTC", dec!(50000))
                .unwrap()
                .with_price("ETH", dec!(2500))
                .unwrap()
                .with_price("USDT", dec!(1))
                .unwrap()
                .with_price("USDC", dec!(1))
                .unwrap(),
        );
        let sink = Arc::new(InMemoryFeeSink::new());

        let config = EngineConfig {
            fee_notifier: FeeNotifierConfig {
                channel_buffer: 64,
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            ..EngineConfig::default()
        };

        let service = LendingService::builder(config)
            .with_clock(clock.clone())
            .with_price_oracle(oracle.clone())
            .with_fee_sink(sink.clone())
            .build()
            .unwrap();

        Self {
            service: Arc::new(service),
            clock,
            oracle,
            sink,
        }
    }

    pub async fn fund(&self, user_id: &str, asset_id: &str, amount: Decimal) {
        self.service.deposit(user_id, asset_id, amount).await.unwrap();
    }

    pub async fn total(&self, user_id: &str, asset_id: &str) -> Decimal {
        self.service.balance(user_id, asset_id).await.total
    }

    pub async fn locked(&self, user_id: &str, asset_id: &str) -> Decimal {
        self.service.balance(user_id, asset_id).await.locked
    }
}
