use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    CallbackLedger, ConditionalUpdate, OrderStore, PromotionStore, StatusChange, StockStore,
};
use crate::entities::{order, order_detail, payment_callback, promotion, stock, OrderStatus};
use crate::errors::ServiceError;

/// Process-local store backed by sharded maps.
///
/// Conditional updates run under the entry's shard lock, so each one is atomic
/// with respect to every other call on the same row.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    orders: DashMap<Uuid, order::Model>,
    details: DashMap<Uuid, Vec<order_detail::Model>>,
    stocks: DashMap<Uuid, stock::Model>,
    promotions: DashMap<Uuid, promotion::Model>,
    promotion_codes: DashMap<String, Uuid>,
    callbacks: DashMap<String, payment_callback::Model>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(
        &self,
        order: order::Model,
        details: Vec<order_detail::Model>,
    ) -> Result<(), ServiceError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(ServiceError::ValidationError(format!(
                "Order {} already exists",
                order.id
            ))),
            Entry::Vacant(slot) => {
                self.details.insert(order.id, details);
                slot.insert(order);
                Ok(())
            }
        }
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(self.orders.get(&order_id).map(|o| o.clone()))
    }

    async fn find_details(&self, order_id: Uuid) -> Result<Vec<order_detail::Model>, ServiceError> {
        Ok(self
            .details
            .get(&order_id)
            .map(|d| d.clone())
            .unwrap_or_default())
    }

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        let mut orders: Vec<order::Model> = self
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Option<order::Model>, ServiceError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != expected {
            return Ok(None);
        }
        change.apply_to(&mut order);
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn find_stock(&self, stock_id: Uuid) -> Result<Option<stock::Model>, ServiceError> {
        Ok(self.stocks.get(&stock_id).map(|s| s.clone()))
    }

    async fn find_stock_by_variant(
        &self,
        product_id: Uuid,
        color_name: &str,
    ) -> Result<Option<stock::Model>, ServiceError> {
        Ok(self
            .stocks
            .iter()
            .find(|s| s.product_id == product_id && s.color_name == color_name)
            .map(|s| s.clone()))
    }

    async fn save_stock(&self, stock: stock::Model) -> Result<(), ServiceError> {
        if stock.quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Stock quantity cannot be negative".to_string(),
            ));
        }
        self.stocks.insert(stock.id, stock);
        Ok(())
    }

    async fn decrement_if_available(
        &self,
        stock_id: Uuid,
        qty: i32,
    ) -> Result<ConditionalUpdate, ServiceError> {
        let mut stock = self
            .stocks
            .get_mut(&stock_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;
        if stock.quantity < qty {
            return Ok(ConditionalUpdate::Rejected {
                current: stock.quantity,
            });
        }
        stock.quantity -= qty;
        stock.updated_at = Utc::now();
        Ok(ConditionalUpdate::Applied {
            current: stock.quantity,
        })
    }

    async fn increment(&self, stock_id: Uuid, qty: i32) -> Result<i32, ServiceError> {
        let mut stock = self
            .stocks
            .get_mut(&stock_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;
        stock.quantity = stock
            .quantity
            .checked_add(qty)
            .ok_or_else(|| ServiceError::ValidationError("Stock quantity overflow".to_string()))?;
        stock.updated_at = Utc::now();
        Ok(stock.quantity)
    }
}

#[async_trait]
impl PromotionStore for InMemoryStore {
    async fn find_promotion(
        &self,
        promotion_id: Uuid,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        Ok(self.promotions.get(&promotion_id).map(|p| p.clone()))
    }

    async fn find_promotion_by_code(
        &self,
        code: &str,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        let Some(id) = self.promotion_codes.get(code).map(|id| *id) else {
            return Ok(None);
        };
        self.find_promotion(id).await
    }

    async fn save_promotion(&self, promotion: promotion::Model) -> Result<(), ServiceError> {
        promotion.check_invariants()?;
        if let Some(existing) = self.promotion_codes.get(&promotion.code) {
            if *existing != promotion.id {
                return Err(ServiceError::ValidationError(format!(
                    "Promotion code {} is already in use",
                    promotion.code
                )));
            }
        }
        if let Some(previous) = self.promotions.get(&promotion.id) {
            if previous.code != promotion.code {
                self.promotion_codes.remove(&previous.code);
            }
        }
        self.promotion_codes
            .insert(promotion.code.clone(), promotion.id);
        self.promotions.insert(promotion.id, promotion);
        Ok(())
    }

    async fn increment_usage_if_below_limit(
        &self,
        promotion_id: Uuid,
    ) -> Result<ConditionalUpdate, ServiceError> {
        let mut promotion = self.promotions.get_mut(&promotion_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Promotion {} not found", promotion_id))
        })?;
        if promotion.usage_count >= promotion.usage_limit {
            return Ok(ConditionalUpdate::Rejected {
                current: promotion.usage_count,
            });
        }
        promotion.usage_count += 1;
        Ok(ConditionalUpdate::Applied {
            current: promotion.usage_count,
        })
    }
}

#[async_trait]
impl CallbackLedger for InMemoryStore {
    async fn find_callback(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<payment_callback::Model>, ServiceError> {
        Ok(self.callbacks.get(transaction_ref).map(|c| c.clone()))
    }

    async fn claim(&self, record: payment_callback::Model) -> Result<bool, ServiceError> {
        match self.callbacks.entry(record.transaction_ref.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn forget(&self, transaction_ref: &str) -> Result<(), ServiceError> {
        self.callbacks.remove(transaction_ref);
        Ok(())
    }
}
