//! # Lendex Engine
//!
//! Lending and margin engines for the Lendex collateralized lending platform.
//!
//! ## Operations
//!
//! - **Lend / Withdraw**: fixed-term lending of idle balance, full-term simple interest
//! - **Borrow / Repay**: collateralized loans, interest accrued per elapsed day
//! - **Liquidate**: seizure of collateral once its price reaches the liquidation price
//! - **ListPositions**: positions of a user with an exposure summary
//!
//! ## Interest Split
//!
//! ```text
//! platform fee = interest × 15%
//! user share   = interest − platform fee
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       LendingService                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │ LendingEngine │  │ MarginEngine  │  │   FeeNotifier    │  │
//! │  └───────┬───────┘  └───────┬───────┘  └────────┬─────────┘  │
//! │          └────────┬─────────┘                   │            │
//! │     ┌─────────────▼──────────────┐     ┌────────▼─────────┐  │
//! │     │ RateTable · PriceOracle    │     │     FeeSink      │  │
//! │     │ Ledger (UnitOfWork)        │     │  (at-least-once) │  │
//! │     └────────────────────────────┘     └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod fees;
pub mod interest;
pub mod lending;
pub mod margin;
pub mod metrics;
pub mod oracle;
pub mod overview;
pub mod rates;
pub mod requests;

pub use config::{EngineConfig, InterestPolicy, RateEntry};
pub use context::EngineContext;
pub use fees::{
    FeeNotice, FeeNotifier, FeeNotifierConfig, FeeSink, FeeSinkError, InMemoryFeeSink,
    LoggingFeeSink, NotifierSnapshot,
};
pub use interest::{EarningsProjection, FeeSplit};
pub use lending::{LendOutcome, LendingEngine, SettlementResult};
pub use margin::{LiquidationCandidate, LiquidationResult, MarginEngine};
pub use metrics::EngineMetrics;
pub use oracle::{PriceOracle, StaticPriceOracle};
pub use overview::{AssetExposure, PositionSummary, PositionsOverview};
pub use rates::{RateTable, RateTableBuilder, StaticRateTable};
pub use requests::{BorrowRequest, LendRequest, LiquidateRequest, RepayRequest, WithdrawRequest};

use std::sync::Arc;

use lendex_common::{Balance, Clock, LendexError, Position, Result, SystemClock};
use lendex_ledger::{Ledger, LendingStore, ReconciliationReport};
use prometheus::Registry;
use rust_decimal::Decimal;
use tracing::{info, instrument};

/// Lending and margin operations over one ledger
pub struct LendingService {
    ctx: Arc<EngineContext>,
    lending: LendingEngine,
    margin: MarginEngine,
    registry: Registry,
    config: EngineConfig,
}

impl LendingService {
    pub fn builder(config: EngineConfig) -> LendingServiceBuilder {
        LendingServiceBuilder::new(config)
    }

    pub async fn lend(&self, request: LendRequest) -> Result<LendOutcome> {
        self.lending.lend(request).await
    }

    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<SettlementResult> {
        self.lending.withdraw(request).await
    }

    pub async fn borrow(&self, request: BorrowRequest) -> Result<Position> {
        self.margin.borrow(request).await
    }

    pub async fn repay(&self, request: RepayRequest) -> Result<SettlementResult> {
        self.margin.repay(request).await
    }

    pub async fn liquidate(&self, request: LiquidateRequest) -> Result<LiquidationResult> {
        self.margin.liquidate(request).await
    }

    pub async fn liquidation_candidates(&self) -> Vec<LiquidationCandidate> {
        self.margin.liquidation_candidates().await
    }

    /// All positions of a user, oldest first, with their summary
    #[instrument(skip(self))]
    pub async fn list_positions(&self, user_id: &str) -> PositionsOverview {
        let positions = self.ctx.ledger.list_by_user(user_id).await;
        PositionsOverview::from_positions(user_id, positions)
    }

    pub async fn balance(&self, user_id: &str, asset_id: &str) -> Balance {
        self.ctx.ledger.balance(user_id, asset_id).await
    }

    /// Fund a user balance
    pub async fn deposit(&self, user_id: &str, asset_id: &str, amount: Decimal) -> Result<Balance> {
        Ok(self.ctx.ledger.deposit(user_id, asset_id, amount).await?)
    }

    pub async fn reconcile(&self, user_id: &str) -> ReconciliationReport {
        self.ctx.ledger.reconcile(user_id).await
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.ctx.metrics
    }

    pub fn notifier_stats(&self) -> NotifierSnapshot {
        self.ctx.notifier.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Builder for [`LendingService`]
///
/// A price oracle is required. Everything else defaults to the in-memory
/// store, the system clock, the configured rate table and a logging fee sink.
pub struct LendingServiceBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn LendingStore>>,
    rates: Option<Arc<dyn RateTable>>,
    oracle: Option<Arc<dyn PriceOracle>>,
    fee_sink: Option<Arc<dyn FeeSink>>,
    registry: Option<Registry>,
}

impl LendingServiceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            store: None,
            rates: None,
            oracle: None,
            fee_sink: None,
            registry: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LendingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_rate_table(mut self, rates: Arc<dyn RateTable>) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn with_price_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_fee_sink(mut self, sink: Arc<dyn FeeSink>) -> Self {
        self.fee_sink = Some(sink);
        self
    }

    /// Register metrics on an existing registry instead of a private one
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the service; spawns the fee notifier on the current tokio runtime
    pub fn build(self) -> Result<LendingService> {
        self.config.validate()?;

        let oracle = self
            .oracle
            .ok_or_else(|| LendexError::Config("a price oracle is required".into()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ledger = match self.store {
            Some(store) => Ledger::new(store, clock),
            None => Ledger::in_memory(&self.config.store, clock),
        };
        let rates = self
            .rates
            .unwrap_or_else(|| Arc::new(StaticRateTable::from_config(&self.config)));
        let sink = self.fee_sink.unwrap_or_else(|| Arc::new(LoggingFeeSink));

        let metrics = EngineMetrics::new().map_err(|e| LendexError::Config(e.to_string()))?;
        let registry = self.registry.unwrap_or_default();
        metrics
            .register(&registry)
            .map_err(|e| LendexError::Config(e.to_string()))?;

        let notifier = FeeNotifier::spawn(self.config.fee_notifier.clone(), sink);
        let ctx = Arc::new(EngineContext {
            ledger,
            rates,
            oracle,
            notifier,
            metrics: Arc::new(metrics),
            policy: self.config.policy,
            fee_stream_id: self.config.fee_stream_id,
            treasury_account: self.config.treasury_account.clone(),
        });

        info!(
            assets = ?ctx.rates.assets(),
            platform_fee_percent = %self.config.policy.platform_fee_percent,
            "Lending service ready"
        );

        Ok(LendingService {
            lending: LendingEngine::new(ctx.clone()),
            margin: MarginEngine::new(ctx.clone()),
            ctx,
            registry,
            config: self.config,
        })
    }
}
