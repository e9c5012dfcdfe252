use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

// Domain events raised by the checkout core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        final_total: Decimal,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentCaptured {
        order_id: Uuid,
        transaction_ref: String,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Uuid,
        transaction_ref: String,
        response_code: String,
    },
    InventoryReserved {
        stock_id: Uuid,
        quantity: i32,
    },
    InventoryReleased {
        stock_id: Uuid,
        quantity: i32,
    },
    PromotionRedeemed {
        promotion_id: Uuid,
        order_id: Uuid,
    },
}

impl Event {
    /// The order this event concerns, when it concerns one.
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderCancelled { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::PaymentCaptured { order_id, .. }
            | Event::PaymentFailed { order_id, .. }
            | Event::PromotionRedeemed { order_id, .. } => Some(*order_id),
            Event::InventoryReserved { .. } | Event::InventoryReleased { .. } => None,
        }
    }
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                customer_id,
                final_total,
            } => {
                info!(%order_id, %customer_id, %final_total, "order created");
            }
            Event::OrderCancelled { order_id, reason } => {
                info!(%order_id, reason = ?reason, "order cancelled");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, from = %old_status, to = %new_status, "order status changed");
            }
            Event::PaymentCaptured {
                order_id,
                transaction_ref,
                amount,
            } => {
                info!(%order_id, transaction_ref = %transaction_ref, %amount, "payment captured");
            }
            Event::PaymentFailed {
                order_id,
                transaction_ref,
                response_code,
            } => {
                warn!(%order_id, transaction_ref = %transaction_ref, response_code = %response_code, "payment failed");
            }
            Event::InventoryReserved { stock_id, quantity } => {
                debug!(%stock_id, quantity, "inventory reserved");
            }
            Event::InventoryReleased { stock_id, quantity } => {
                debug!(%stock_id, quantity, "inventory released");
            }
            Event::PromotionRedeemed {
                promotion_id,
                order_id,
            } => {
                info!(%promotion_id, %order_id, "promotion redeemed");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sent_events_reach_the_receiver() {
        let (sender, mut rx) = EventSender::channel(4);
        let order_id = Uuid::new_v4();
        sender
            .send(Event::OrderCancelled {
                order_id,
                reason: Some("changed my mind".into()),
            })
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.order_id(), Some(order_id));
    }

    #[tokio::test]
    async fn test_send_fails_once_receiver_is_dropped() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        let result = sender
            .send(Event::InventoryReleased {
                stock_id: Uuid::new_v4(),
                quantity: 1,
            })
            .await;
        assert!(result.is_err());
    }
}
