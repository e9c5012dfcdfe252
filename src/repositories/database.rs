use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    CallbackLedger, ConditionalUpdate, OrderStore, PromotionStore, StatusChange, StockStore,
};
use crate::entities::{order, order_detail, payment_callback, promotion, stock, OrderStatus};
use crate::errors::ServiceError;

/// sea-orm backed store.
///
/// Conditional updates are single `UPDATE ... WHERE` statements. The row is read
/// back inside the same transaction, so an error before commit leaves nothing
/// written and a contention retry cannot apply the update twice.
#[derive(Debug, Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn begin(&self) -> Result<DatabaseTransaction, ServiceError> {
        self.db.begin().await.map_err(ServiceError::from_db)
    }
}

/// Commit outcome is unknown once the statement was sent; never report it as retryable.
async fn commit(txn: DatabaseTransaction) -> Result<(), ServiceError> {
    txn.commit().await.map_err(ServiceError::DatabaseError)
}

fn order_active_model(order: order::Model) -> order::ActiveModel {
    order::ActiveModel {
        id: Set(order.id),
        customer_id: Set(order.customer_id),
        status: Set(order.status),
        payment_type: Set(order.payment_type),
        subtotal: Set(order.subtotal),
        product_discount: Set(order.product_discount),
        shipping_discount: Set(order.shipping_discount),
        shipping_fee: Set(order.shipping_fee),
        final_total: Set(order.final_total),
        recipient_name: Set(order.recipient_name),
        recipient_phone: Set(order.recipient_phone),
        shipping_address: Set(order.shipping_address),
        promotion_id: Set(order.promotion_id),
        promotion_code: Set(order.promotion_code),
        created_by: Set(order.created_by),
        approved_by: Set(order.approved_by),
        cancel_reason: Set(order.cancel_reason),
        payment_transaction_ref: Set(order.payment_transaction_ref),
        created_at: Set(order.created_at),
        updated_at: Set(order.updated_at),
        version: Set(order.version),
    }
}

fn detail_active_model(detail: order_detail::Model) -> order_detail::ActiveModel {
    order_detail::ActiveModel {
        id: Set(detail.id),
        order_id: Set(detail.order_id),
        stock_id: Set(detail.stock_id),
        product_id: Set(detail.product_id),
        product_name: Set(detail.product_name),
        color_name: Set(detail.color_name),
        quantity: Set(detail.quantity),
        unit_price: Set(detail.unit_price),
        promotion_id: Set(detail.promotion_id),
        reviewed: Set(detail.reviewed),
    }
}

#[async_trait]
impl OrderStore for DatabaseStore {
    #[instrument(skip(self, order, details), fields(order_id = %order.id, lines = details.len()))]
    async fn insert_order(
        &self,
        order: order::Model,
        details: Vec<order_detail::Model>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        order_active_model(order)
            .insert(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        for detail in details {
            detail_active_model(detail)
                .insert(&txn)
                .await
                .map_err(ServiceError::from_db)?;
        }

        commit(txn).await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn find_details(&self, order_id: Uuid) -> Result<Vec<order_detail::Model>, ServiceError> {
        order_detail::Entity::find()
            .filter(order_detail::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    #[instrument(skip(self, change), fields(to = %change.target))]
    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Option<order::Model>, ServiceError> {
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(change.target))
            .col_expr(order::Column::UpdatedAt, Expr::value(change.at))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );
        if let Some(reason) = change.cancel_reason {
            update = update.col_expr(order::Column::CancelReason, Expr::value(reason));
        }
        if let Some(user_id) = change.approved_by {
            update = update.col_expr(order::Column::ApprovedBy, Expr::value(user_id));
        }
        if let Some(transaction_ref) = change.payment_transaction_ref {
            update = update.col_expr(
                order::Column::PaymentTransactionRef,
                Expr::value(transaction_ref),
            );
        }

        let txn = self.begin().await?;
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(expected))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        let current = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        commit(txn).await?;

        if result.rows_affected == 0 {
            debug!(actual = %current.status, "status compare-and-set lost");
            return Ok(None);
        }
        Ok(Some(current))
    }
}

#[async_trait]
impl StockStore for DatabaseStore {
    async fn find_stock(&self, stock_id: Uuid) -> Result<Option<stock::Model>, ServiceError> {
        stock::Entity::find_by_id(stock_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn find_stock_by_variant(
        &self,
        product_id: Uuid,
        color_name: &str,
    ) -> Result<Option<stock::Model>, ServiceError> {
        stock::Entity::find()
            .filter(stock::Column::ProductId.eq(product_id))
            .filter(stock::Column::ColorName.eq(color_name))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn save_stock(&self, stock: stock::Model) -> Result<(), ServiceError> {
        let active = stock::ActiveModel {
            id: Set(stock.id),
            product_id: Set(stock.product_id),
            product_name: Set(stock.product_name),
            color_name: Set(stock.color_name),
            quantity: Set(stock.quantity),
            price: Set(stock.price),
            updated_at: Set(stock.updated_at),
        };
        stock::Entity::insert(active)
            .on_conflict(
                OnConflict::column(stock::Column::Id)
                    .update_columns([
                        stock::Column::ProductName,
                        stock::Column::ColorName,
                        stock::Column::Quantity,
                        stock::Column::Price,
                        stock::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await
            .map_err(ServiceError::from_db)?;
        Ok(())
    }

    async fn decrement_if_available(
        &self,
        stock_id: Uuid,
        qty: i32,
    ) -> Result<ConditionalUpdate, ServiceError> {
        let txn = self.begin().await?;
        let result = stock::Entity::update_many()
            .col_expr(stock::Column::Quantity, Expr::col(stock::Column::Quantity).sub(qty))
            .col_expr(stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock::Column::Id.eq(stock_id))
            .filter(stock::Column::Quantity.gte(qty))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        let current = stock::Entity::find_by_id(stock_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?
            .quantity;
        commit(txn).await?;

        if result.rows_affected == 0 {
            Ok(ConditionalUpdate::Rejected { current })
        } else {
            Ok(ConditionalUpdate::Applied { current })
        }
    }

    async fn increment(&self, stock_id: Uuid, qty: i32) -> Result<i32, ServiceError> {
        let txn = self.begin().await?;
        let result = stock::Entity::update_many()
            .col_expr(stock::Column::Quantity, Expr::col(stock::Column::Quantity).add(qty))
            .col_expr(stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock::Column::Id.eq(stock_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Stock {} not found", stock_id)));
        }

        let current = stock::Entity::find_by_id(stock_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .map(|s| s.quantity)
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;
        commit(txn).await?;
        Ok(current)
    }
}

#[async_trait]
impl PromotionStore for DatabaseStore {
    async fn find_promotion(
        &self,
        promotion_id: Uuid,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        promotion::Entity::find_by_id(promotion_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn find_promotion_by_code(
        &self,
        code: &str,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        promotion::Entity::find()
            .filter(promotion::Column::Code.eq(code))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn save_promotion(&self, promotion: promotion::Model) -> Result<(), ServiceError> {
        promotion.check_invariants()?;
        let active = promotion::ActiveModel {
            id: Set(promotion.id),
            code: Set(promotion.code),
            promotion_type: Set(promotion.promotion_type),
            value: Set(promotion.value),
            max_discount_amount: Set(promotion.max_discount_amount),
            min_order_value: Set(promotion.min_order_value),
            usage_limit: Set(promotion.usage_limit),
            usage_count: Set(promotion.usage_count),
            is_active: Set(promotion.is_active),
            start_date: Set(promotion.start_date),
            end_date: Set(promotion.end_date),
        };
        promotion::Entity::insert(active)
            .on_conflict(
                OnConflict::column(promotion::Column::Id)
                    .update_columns([
                        promotion::Column::Code,
                        promotion::Column::PromotionType,
                        promotion::Column::Value,
                        promotion::Column::MaxDiscountAmount,
                        promotion::Column::MinOrderValue,
                        promotion::Column::UsageLimit,
                        promotion::Column::UsageCount,
                        promotion::Column::IsActive,
                        promotion::Column::StartDate,
                        promotion::Column::EndDate,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await
            .map_err(ServiceError::from_db)?;
        Ok(())
    }

    async fn increment_usage_if_below_limit(
        &self,
        promotion_id: Uuid,
    ) -> Result<ConditionalUpdate, ServiceError> {
        let txn = self.begin().await?;
        let result = promotion::Entity::update_many()
            .col_expr(
                promotion::Column::UsageCount,
                Expr::col(promotion::Column::UsageCount).add(1),
            )
            .filter(promotion::Column::Id.eq(promotion_id))
            .filter(
                Expr::col(promotion::Column::UsageCount)
                    .lt(Expr::col(promotion::Column::UsageLimit)),
            )
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        let current = promotion::Entity::find_by_id(promotion_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Promotion {} not found", promotion_id))
            })?
            .usage_count;
        commit(txn).await?;

        if result.rows_affected == 0 {
            Ok(ConditionalUpdate::Rejected { current })
        } else {
            Ok(ConditionalUpdate::Applied { current })
        }
    }
}

#[async_trait]
impl CallbackLedger for DatabaseStore {
    async fn find_callback(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<payment_callback::Model>, ServiceError> {
        payment_callback::Entity::find_by_id(transaction_ref.to_string())
            .one(&*self.db)
            .await
            .map_err(ServiceError::from_db)
    }

    async fn claim(&self, record: payment_callback::Model) -> Result<bool, ServiceError> {
        let active = payment_callback::ActiveModel {
            transaction_ref: Set(record.transaction_ref),
            order_id: Set(record.order_id),
            outcome: Set(record.outcome),
            processed_at: Set(record.processed_at),
        };
        let inserted = payment_callback::Entity::insert(active)
            .on_conflict(
                OnConflict::column(payment_callback::Column::TransactionRef)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await;

        match inserted {
            Ok(rows) => Ok(rows > 0),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(ServiceError::from_db(e)),
        }
    }

    async fn forget(&self, transaction_ref: &str) -> Result<(), ServiceError> {
        payment_callback::Entity::delete_by_id(transaction_ref.to_string())
            .exec(&*self.db)
            .await
            .map_err(ServiceError::from_db)?;
        Ok(())
    }
}
