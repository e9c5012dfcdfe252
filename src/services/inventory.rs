//! Inventory ledger
//!
//! Stock counters change only through atomic conditional updates. Multi-line
//! reservations are all-or-nothing: rows are taken in ascending stock id order and
//! anything already taken is handed back when a later line fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::{order_detail, stock};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::repositories::{ConditionalUpdate, StockStore};
use crate::retry::{retry_contention, RetryConfig};

/// A quantity to take from (or return to) one stock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub stock_id: Uuid,
    pub quantity: i32,
}

impl ReservationLine {
    pub fn new(stock_id: Uuid, quantity: i32) -> Self {
        Self { stock_id, quantity }
    }
}

/// Merges lines per stock row and orders them by ascending stock id.
pub fn merge_lines(lines: &[ReservationLine]) -> Result<Vec<ReservationLine>, ServiceError> {
    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for line in lines {
        validate_quantity(line.quantity)?;
        let total = merged.entry(line.stock_id).or_insert(0);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Quantity overflow for stock {}",
                line.stock_id
            ))
        })?;
    }
    Ok(merged
        .into_iter()
        .map(|(stock_id, quantity)| ReservationLine { stock_id, quantity })
        .collect())
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct InventoryLedger {
    stocks: Arc<dyn StockStore>,
    retry: RetryConfig,
    event_sender: Option<EventSender>,
}

impl InventoryLedger {
    pub fn new(stocks: Arc<dyn StockStore>, retry: RetryConfig) -> Self {
        Self {
            stocks,
            retry,
            event_sender: None,
        }
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    /// Takes `qty` units from a stock row. Returns the quantity left.
    #[instrument(skip(self))]
    pub async fn reserve(&self, stock_id: Uuid, qty: i32) -> Result<i32, ServiceError> {
        validate_quantity(qty)?;

        let outcome = retry_contention(&self.retry, || {
            self.stocks.decrement_if_available(stock_id, qty)
        })
        .await?;

        match outcome {
            ConditionalUpdate::Applied { current } => {
                info!(remaining = current, "Reserved stock");
                self.publish(Event::InventoryReserved {
                    stock_id,
                    quantity: qty,
                })
                .await;
                Ok(current)
            }
            ConditionalUpdate::Rejected { current } => {
                metrics::RESERVATION_FAILURES.inc();
                warn!(available = current, "Insufficient stock");
                Err(ServiceError::InsufficientStock {
                    stock_id,
                    requested: qty,
                    available: current,
                })
            }
        }
    }

    /// Returns `qty` units to a stock row. Returns the new quantity.
    #[instrument(skip(self))]
    pub async fn release(&self, stock_id: Uuid, qty: i32) -> Result<i32, ServiceError> {
        validate_quantity(qty)?;

        let current =
            retry_contention(&self.retry, || self.stocks.increment(stock_id, qty)).await?;
        info!(quantity = current, "Released stock");
        self.publish(Event::InventoryReleased {
            stock_id,
            quantity: qty,
        })
        .await;
        Ok(current)
    }

    /// Reserves every line or none of them.
    ///
    /// Returns the merged lines that were reserved; release exactly these on rollback.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve_all(
        &self,
        lines: &[ReservationLine],
    ) -> Result<Vec<ReservationLine>, ServiceError> {
        let merged = merge_lines(lines)?;
        let mut reserved: Vec<ReservationLine> = Vec::with_capacity(merged.len());

        for line in &merged {
            if let Err(e) = self.reserve(line.stock_id, line.quantity).await {
                warn!(
                    stock_id = %line.stock_id,
                    rollback = reserved.len(),
                    "Reservation failed, rolling back: {}",
                    e
                );
                self.rollback(&reserved).await?;
                return Err(e);
            }
            reserved.push(*line);
        }

        Ok(merged)
    }

    /// Releases every line, continuing past failures. Returns the first failure.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn release_all(&self, lines: &[ReservationLine]) -> Result<(), ServiceError> {
        let mut first_error = None;
        for line in lines {
            if let Err(e) = self.release(line.stock_id, line.quantity).await {
                error!(stock_id = %line.stock_id, quantity = line.quantity, "Failed to release stock: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Finds the stock row an order line draws from.
    ///
    /// Lines written before stock references existed carry only product and colour;
    /// those fall back to an exact product + colour match.
    pub async fn resolve_stock(
        &self,
        detail: &order_detail::Model,
    ) -> Result<stock::Model, ServiceError> {
        if let Some(stock_id) = detail.stock_id {
            return self
                .stocks
                .find_stock(stock_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)));
        }

        // legacy rows
        let Some(color_name) = detail.color_name.as_deref() else {
            return Err(ServiceError::NotFound(format!(
                "Order line {} has no stock reference",
                detail.id
            )));
        };
        warn!(
            detail_id = %detail.id,
            product_id = %detail.product_id,
            "Resolving stock for legacy order line by product and colour"
        );
        self.stocks
            .find_stock_by_variant(detail.product_id, color_name)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No stock for product {} in colour {}",
                    detail.product_id, color_name
                ))
            })
    }

    /// Undoes `reserved` newest first. A failed release wins over the reservation error.
    async fn rollback(&self, reserved: &[ReservationLine]) -> Result<(), ServiceError> {
        let mut first_error = None;
        for line in reserved.iter().rev() {
            if let Err(e) = self.release(line.stock_id, line.quantity).await {
                error!(
                    stock_id = %line.stock_id,
                    quantity = line.quantity,
                    "Failed to roll back reservation: {}",
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryStore;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn seed(store: &InMemoryStore, quantity: i32) -> stock::Model {
        let row = stock::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Canvas tote".into(),
            color_name: "Olive".into(),
            quantity,
            price: dec!(120000),
            updated_at: Utc::now(),
        };
        store.save_stock(row.clone()).await.unwrap();
        row
    }

    fn ledger(store: Arc<InMemoryStore>) -> InventoryLedger {
        InventoryLedger::new(store, RetryConfig::no_retry())
    }

    #[test]
    fn test_merge_lines_sums_and_sorts() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        let merged = merge_lines(&[
            ReservationLine::new(a, 1),
            ReservationLine::new(b, 2),
            ReservationLine::new(a, 3),
        ])
        .unwrap();
        assert_eq!(
            merged,
            vec![ReservationLine::new(b, 2), ReservationLine::new(a, 4)]
        );
    }

    #[test]
    fn test_merge_lines_rejects_non_positive() {
        assert_matches!(
            merge_lines(&[ReservationLine::new(Uuid::new_v4(), 0)]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_quantity() {
        let store = Arc::new(InMemoryStore::new());
        let row = seed(&store, 5).await;
        let ledger = ledger(store.clone());

        assert_eq!(ledger.reserve(row.id, 3).await.unwrap(), 2);
        assert_eq!(ledger.release(row.id, 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_row_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let row = seed(&store, 2).await;
        let ledger = ledger(store.clone());

        assert_matches!(
            ledger.reserve(row.id, 3).await,
            Err(ServiceError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        );
        assert_eq!(store.find_stock(row.id).await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_unknown_stock_is_not_found() {
        let ledger = ledger(Arc::new(InMemoryStore::new()));
        assert_matches!(
            ledger.reserve(Uuid::new_v4(), 1).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_reserve_all_rolls_back_on_failure() {
        let store = Arc::new(InMemoryStore::new());
        let plenty = seed(&store, 10).await;
        let scarce = seed(&store, 1).await;
        let ledger = ledger(store.clone());

        let result = ledger
            .reserve_all(&[
                ReservationLine::new(plenty.id, 4),
                ReservationLine::new(scarce.id, 2),
            ])
            .await;

        assert_matches!(result, Err(ServiceError::InsufficientStock { .. }));
        assert_eq!(store.find_stock(plenty.id).await.unwrap().unwrap().quantity, 10);
        assert_eq!(store.find_stock(scarce.id).await.unwrap().unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn test_resolve_stock_falls_back_to_product_and_colour() {
        let store = Arc::new(InMemoryStore::new());
        let row = seed(&store, 3).await;
        let ledger = ledger(store.clone());

        let mut detail = order_detail::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            stock_id: None,
            product_id: row.product_id,
            product_name: row.product_name.clone(),
            color_name: Some("Olive".into()),
            quantity: 1,
            unit_price: row.price,
            promotion_id: None,
            reviewed: false,
        };
        assert_eq!(ledger.resolve_stock(&detail).await.unwrap().id, row.id);

        detail.color_name = Some("olive".into());
        assert_matches!(
            ledger.resolve_stock(&detail).await,
            Err(ServiceError::NotFound(_))
        );

        detail.color_name = None;
        assert_matches!(
            ledger.resolve_stock(&detail).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
