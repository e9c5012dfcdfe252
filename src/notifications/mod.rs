use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order;

/// Represents a customer-facing notification about an order
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
}

/// Types of notifications
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    OrderConfirmation,
    PaymentReceived,
    OrderCancelled,
}

impl Notification {
    pub fn order_confirmation(order: &order::Model) -> Self {
        Self::for_order(
            order,
            NotificationType::OrderConfirmation,
            format!(
                "Your order {} has been placed. Total: {}",
                order.id,
                format_amount(order.final_total)
            ),
        )
    }

    pub fn payment_received(order: &order::Model) -> Self {
        Self::for_order(
            order,
            NotificationType::PaymentReceived,
            format!("Payment for order {} was received", order.id),
        )
    }

    pub fn order_cancelled(order: &order::Model) -> Self {
        Self::for_order(
            order,
            NotificationType::OrderCancelled,
            format!("Order {} was cancelled", order.id),
        )
    }

    fn for_order(order: &order::Model, notification_type: NotificationType, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id: order.customer_id,
            order_id: order.id,
            message,
            notification_type,
            created_at: Utc::now(),
        }
    }
}

fn format_amount(amount: Decimal) -> String {
    amount.round_dp(2).normalize().to_string()
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound channel for order notifications (email, SMS, push).
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log; used when no delivery channel is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    #[instrument(skip(self, notification), fields(id = %notification.id, order_id = %notification.order_id))]
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&notification)?;
        info!(notification = %payload, "Notification dispatched");
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: RwLock<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl OrderNotifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}
