use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::{
    entities::order::{Model as OrderModel, OrderStatus},
    errors::ServiceError,
    repositories::{OrderStore, StatusChange},
    retry::{retry_contention, RetryConfig},
};

/// Enforces the order status graph. Holds no state of its own: every
/// transition is a compare-and-set against the stored status.
#[derive(Clone)]
pub struct StatusTransitionGuard {
    orders: Arc<dyn OrderStore>,
    retry: RetryConfig,
}

impl StatusTransitionGuard {
    pub fn new(orders: Arc<dyn OrderStore>, retry: RetryConfig) -> Self {
        Self { orders, retry }
    }

    /// Pure lookup in the transition table.
    pub fn can_transition(current: OrderStatus, target: OrderStatus) -> bool {
        current.can_transition_to(target)
    }

    /// Moves `order` to `change.target` if the edge exists and nobody changed the
    /// stored status since `order` was read.
    ///
    /// When another writer got there first the error carries the status actually
    /// stored, not the stale one the caller saw.
    #[instrument(skip(self, order, change), fields(order_id = %order.id, from = %order.status, to = %change.target))]
    pub async fn transition(
        &self,
        order: &OrderModel,
        change: StatusChange,
    ) -> Result<OrderModel, ServiceError> {
        let target = change.target;
        if !Self::can_transition(order.status, target) {
            warn!("Rejected status transition from {} to {}", order.status, target);
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status,
                to: target,
            });
        }

        let applied = retry_contention(&self.retry, || {
            self.orders
                .compare_and_set_status(order.id, order.status, change.clone())
        })
        .await
        .map_err(|e| {
            error!("Failed to update order {} status: {}", order.id, e);
            e
        })?;

        match applied {
            Some(updated) => {
                info!(
                    "Order {} status updated from '{}' to '{}'",
                    order.id, order.status, target
                );
                Ok(updated)
            }
            None => {
                let actual = self
                    .orders
                    .find_order(order.id)
                    .await?
                    .map(|o| o.status)
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
                warn!(
                    "Order {} status changed concurrently: expected {}, found {}",
                    order.id, order.status, actual
                );
                Err(ServiceError::InvalidStatusTransition {
                    from: actual,
                    to: target,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::PaymentType;
    use crate::repositories::InMemoryStore;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn pending_order() -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::PendingPayment,
            payment_type: PaymentType::CashOnDelivery,
            subtotal: dec!(100),
            product_discount: dec!(0),
            shipping_discount: dec!(0),
            shipping_fee: dec!(10),
            final_total: dec!(110),
            recipient_name: "Mai".into(),
            recipient_phone: "0900000000".into(),
            shipping_address: "1 Le Loi".into(),
            promotion_id: None,
            promotion_code: None,
            created_by: Uuid::new_v4(),
            approved_by: None,
            cancel_reason: None,
            payment_transaction_ref: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    async fn guard_with(order: &OrderModel) -> StatusTransitionGuard {
        let store = Arc::new(InMemoryStore::new());
        store.insert_order(order.clone(), Vec::new()).await.unwrap();
        StatusTransitionGuard::new(store, RetryConfig::no_retry())
    }

    #[test]
    fn test_transition_table_is_exactly_the_edge_list() {
        use OrderStatus::*;
        const STATUSES: [OrderStatus; 10] = [
            PendingPayment,
            FailedPayment,
            Paid,
            Processing,
            AwaitingShipment,
            Shipped,
            Delivered,
            Cancelled,
            ReturnRequested,
            Refunded,
        ];
        const EDGES: [(OrderStatus, OrderStatus); 7] = [
            (PendingPayment, FailedPayment),
            (PendingPayment, Paid),
            (PendingPayment, Cancelled),
            (Paid, Processing),
            (Processing, AwaitingShipment),
            (AwaitingShipment, Shipped),
            (Shipped, Delivered),
        ];

        assert_eq!(OrderStatus::ALL.len(), STATUSES.len());
        let mut allowed = 0;
        for from in STATUSES {
            for to in STATUSES {
                let expected = EDGES.contains(&(from, to));
                assert_eq!(
                    StatusTransitionGuard::can_transition(from, to),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
                allowed += usize::from(expected);
            }
        }
        assert_eq!(allowed, EDGES.len());
    }

    #[tokio::test]
    async fn test_valid_transition_bumps_version() {
        let order = pending_order();
        let guard = guard_with(&order).await;
        let updated = guard
            .transition(&order, StatusChange::to(OrderStatus::Paid).with_transaction_ref("T1"))
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Paid);
        assert_eq!(updated.version, order.version + 1);
        assert_eq!(updated.payment_transaction_ref.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_missing_edge_is_rejected_without_touching_store() {
        let order = pending_order();
        let guard = guard_with(&order).await;
        let result = guard
            .transition(&order, StatusChange::to(OrderStatus::Shipped))
            .await;
        assert_matches!(
            result,
            Err(ServiceError::InvalidStatusTransition {
                from: OrderStatus::PendingPayment,
                to: OrderStatus::Shipped
            })
        );
    }

    #[tokio::test]
    async fn test_stale_read_reports_actual_status() {
        let order = pending_order();
        let guard = guard_with(&order).await;
        guard
            .transition(&order, StatusChange::to(OrderStatus::Cancelled))
            .await
            .unwrap();

        // `order` still says PENDING_PAYMENT
        let result = guard
            .transition(&order, StatusChange::to(OrderStatus::Paid))
            .await;
        assert_matches!(
            result,
            Err(ServiceError::InvalidStatusTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Paid
            })
        );
    }
}
