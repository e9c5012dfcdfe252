/*!
 * # Metrics Module
 *
 * Prometheus counters for the checkout core. All collectors live in one
 * crate-level [`REGISTRY`] so the embedding service can expose them next to its
 * own metrics via [`gather_text`].
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("checkout".into()), None)
        .expect("registry can be created");
    pub static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created");
    pub static ref ORDERS_CANCELLED: IntCounter = IntCounter::new(
        "orders_cancelled_total",
        "Total number of orders cancelled"
    )
    .expect("metric can be created");
    pub static ref ORDER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("order_failures_total", "Order operations that failed"),
        &["operation", "error_type"]
    )
    .expect("metric can be created");
    pub static ref RESERVATION_FAILURES: IntCounter = IntCounter::new(
        "inventory_reservation_failures_total",
        "Reservations rejected for insufficient stock"
    )
    .expect("metric can be created");
    pub static ref PAYMENT_CALLBACKS: IntCounterVec = IntCounterVec::new(
        Opts::new("payment_callbacks_total", "Gateway callbacks by result"),
        &["result"]
    )
    .expect("metric can be created");
    pub static ref PROMOTION_REDEMPTIONS: IntCounter = IntCounter::new(
        "promotion_redemptions_total",
        "Promotion usages recorded on payment confirmation"
    )
    .expect("metric can be created");
}

/// Registers every collector with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(ORDERS_CANCELLED.clone()),
        Box::new(ORDER_FAILURES.clone()),
        Box::new(RESERVATION_FAILURES.clone()),
        Box::new(PAYMENT_CALLBACKS.clone()),
        Box::new(PROMOTION_REDEMPTIONS.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => error!("Failed to register metric: {}", e),
        }
    }
}

/// Records a failed orchestrator operation under its error code.
pub fn record_failure(operation: &str, error_type: &str) {
    ORDER_FAILURES
        .with_label_values(&[operation, error_type])
        .inc();
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_counters_are_exported() {
        register_metrics();
        register_metrics();
        ORDERS_CREATED.inc();
        let text = gather_text();
        assert!(text.contains("checkout_orders_created_total"));
    }
}
