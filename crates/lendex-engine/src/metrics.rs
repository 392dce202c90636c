//! Prometheus metrics for the engines

use lendex_common::{ErrorClass, PositionKind, PositionStatus};
use prometheus::{
    Counter, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts, Registry,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Engine metrics
pub struct EngineMetrics {
    pub positions_opened: IntCounterVec,
    pub positions_settled: IntCounterVec,
    pub requests_rejected: IntCounterVec,
    pub platform_fees_usd: Counter,
    pub operation_duration_seconds: HistogramVec,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            positions_opened: IntCounterVec::new(
                Opts::new("lendex_positions_opened_total", "Positions opened"),
                &["kind"],
            )?,
            positions_settled: IntCounterVec::new(
                Opts::new(
                    "lendex_positions_settled_total",
                    "Positions moved to a terminal state",
                ),
                &["kind", "status"],
            )?,
            requests_rejected: IntCounterVec::new(
                Opts::new("lendex_requests_rejected_total", "Rejected engine requests"),
                &["operation", "class"],
            )?,
            platform_fees_usd: Counter::new(
                "lendex_platform_fees_usd_total",
                "Platform share of interest, in USD",
            )?,
            operation_duration_seconds: HistogramVec::new(
                HistogramOpts::new(
                    "lendex_operation_duration_seconds",
                    "Engine operation duration",
                )
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
                &["operation"],
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.positions_opened.clone()))?;
        registry.register(Box::new(self.positions_settled.clone()))?;
        registry.register(Box::new(self.requests_rejected.clone()))?;
        registry.register(Box::new(self.platform_fees_usd.clone()))?;
        registry.register(Box::new(self.operation_duration_seconds.clone()))?;
        Ok(())
    }

    pub fn record_opened(&self, kind: PositionKind) {
        self.positions_opened
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_settled(&self, kind: PositionKind, status: PositionStatus) {
        self.positions_settled
            .with_label_values(&[kind.as_str(), status.as_str()])
            .inc();
    }

    pub fn record_rejected(&self, operation: &str, class: ErrorClass) {
        self.requests_rejected
            .with_label_values(&[operation, class.as_str()])
            .inc();
    }

    pub fn record_fee(&self, amount_usd: Decimal) {
        if let Some(amount) = amount_usd.to_f64() {
            if amount > 0.0 {
                self.platform_fees_usd.inc_by(amount);
            }
        }
    }

    /// Observes the elapsed time when dropped
    pub fn start_timer(&self, operation: &str) -> HistogramTimer {
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .start_timer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_register_and_count() {
        let metrics = EngineMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.record_opened(PositionKind::Lending);
        metrics.record_settled(PositionKind::Lending, PositionStatus::Repaid);
        metrics.record_rejected("lend", ErrorClass::Insufficiency);
        metrics.record_fee(dec!(1.5));
        metrics.start_timer("lend").observe_duration();

        assert_eq!(
            metrics.positions_opened.with_label_values(&["lending"]).get(),
            1
        );
        assert!((metrics.platform_fees_usd.get() - 1.5).abs() < f64::EPSILON);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn test_double_registration_fails() {
        let metrics = EngineMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
