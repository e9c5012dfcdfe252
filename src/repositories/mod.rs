//! Persistence seams for the checkout core.
//!
//! Every mutating call is a single atomic conditional update on one row; callers
//! never read-modify-write across two calls. A call that fails with
//! `Contention` has written nothing and may be retried. Two implementations exist:
//! [`memory::InMemoryStore`] and the sea-orm backed [`database::DatabaseStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{order, order_detail, payment_callback, promotion, stock, OrderStatus};
use crate::errors::ServiceError;

pub mod database;
pub mod memory;

pub use database::DatabaseStore;
pub use memory::InMemoryStore;

/// Result of a guarded single-row update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalUpdate {
    /// The guard held; `current` is the value after the update.
    Applied { current: i32 },
    /// The guard failed; nothing changed and `current` is the value that blocked it.
    Rejected { current: i32 },
}

/// Column values written together with a status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub target: OrderStatus,
    pub cancel_reason: Option<String>,
    pub approved_by: Option<Uuid>,
    pub payment_transaction_ref: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn to(target: OrderStatus) -> Self {
        Self {
            target,
            cancel_reason: None,
            approved_by: None,
            payment_transaction_ref: None,
            at: Utc::now(),
        }
    }

    pub fn with_cancel_reason(mut self, reason: impl Into<String>) -> Self {
        self.cancel_reason = Some(reason.into());
        self
    }

    pub fn approved_by(mut self, user_id: Uuid) -> Self {
        self.approved_by = Some(user_id);
        self
    }

    pub fn with_transaction_ref(mut self, transaction_ref: impl Into<String>) -> Self {
        self.payment_transaction_ref = Some(transaction_ref.into());
        self
    }

    /// Applies the change to an in-memory copy of the order.
    pub fn apply_to(&self, order: &mut order::Model) {
        order.status = self.target;
        if let Some(reason) = &self.cancel_reason {
            order.cancel_reason = Some(reason.clone());
        }
        if let Some(user_id) = self.approved_by {
            order.approved_by = Some(user_id);
        }
        if let Some(transaction_ref) = &self.payment_transaction_ref {
            order.payment_transaction_ref = Some(transaction_ref.clone());
        }
        order.updated_at = self.at;
        order.version += 1;
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order with all of its lines as one unit.
    async fn insert_order(
        &self,
        order: order::Model,
        details: Vec<order_detail::Model>,
    ) -> Result<(), ServiceError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError>;

    async fn find_details(&self, order_id: Uuid) -> Result<Vec<order_detail::Model>, ServiceError>;

    /// Orders placed by a customer, newest first.
    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<order::Model>, ServiceError>;

    /// Sets the status only while it still equals `expected`.
    ///
    /// Returns the updated order, `None` when the stored status had moved on, and
    /// `NotFound` when the order does not exist.
    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Option<order::Model>, ServiceError>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn find_stock(&self, stock_id: Uuid) -> Result<Option<stock::Model>, ServiceError>;

    /// Legacy lookup by product and colour, exact match.
    async fn find_stock_by_variant(
        &self,
        product_id: Uuid,
        color_name: &str,
    ) -> Result<Option<stock::Model>, ServiceError>;

    async fn save_stock(&self, stock: stock::Model) -> Result<(), ServiceError>;

    /// `quantity -= qty` only when `quantity >= qty`.
    async fn decrement_if_available(
        &self,
        stock_id: Uuid,
        qty: i32,
    ) -> Result<ConditionalUpdate, ServiceError>;

    /// `quantity += qty`; returns the new quantity.
    async fn increment(&self, stock_id: Uuid, qty: i32) -> Result<i32, ServiceError>;
}

#[async_trait]
pub trait PromotionStore: Send + Sync {
    async fn find_promotion(&self, promotion_id: Uuid)
        -> Result<Option<promotion::Model>, ServiceError>;

    async fn find_promotion_by_code(&self, code: &str)
        -> Result<Option<promotion::Model>, ServiceError>;

    async fn save_promotion(&self, promotion: promotion::Model) -> Result<(), ServiceError>;

    /// `usage_count += 1` only when `usage_count < usage_limit`.
    async fn increment_usage_if_below_limit(
        &self,
        promotion_id: Uuid,
    ) -> Result<ConditionalUpdate, ServiceError>;
}

/// Idempotency ledger for gateway callbacks.
///
/// Keyed by merchant reference plus gateway transaction number, see
/// [`CallbackParams::callback_key`](crate::services::payment_gateway::CallbackParams::callback_key).
#[async_trait]
pub trait CallbackLedger: Send + Sync {
    async fn find_callback(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<payment_callback::Model>, ServiceError>;

    /// Inserts the record unless one exists for the same reference; true when inserted.
    async fn claim(&self, record: payment_callback::Model) -> Result<bool, ServiceError>;

    /// Drops a claim whose effects were never applied.
    async fn forget(&self, transaction_ref: &str) -> Result<(), ServiceError>;
}

/// The stores a checkout deployment runs against.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub stocks: Arc<dyn StockStore>,
    pub promotions: Arc<dyn PromotionStore>,
    pub callbacks: Arc<dyn CallbackLedger>,
}

impl Stores {
    /// Uses one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: OrderStore + StockStore + PromotionStore + CallbackLedger + 'static,
    {
        Self {
            orders: store.clone(),
            stocks: store.clone(),
            promotions: store.clone(),
            callbacks: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
