use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    actor::Actor,
    config::{AppConfig, CheckoutConfig, PaymentGatewayConfig},
    entities::{
        order::{Model as OrderModel, OrderStatus, PaymentType},
        order_detail::Model as OrderDetailModel,
        payment_callback::{self, PaymentOutcome},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    money::{checked_total, round_money},
    notifications::{LogNotifier, Notification, OrderNotifier},
    repositories::{StatusChange, Stores},
    retry::{retry_contention, RetryConfig},
    services::{
        inventory::{merge_lines, InventoryLedger, ReservationLine},
        order_status::StatusTransitionGuard,
        payment_gateway::{CallbackParams, PaymentCallbackVerifier, VerificationOutcome},
        promotions::{AppliedPromotion, PromotionEngine},
    },
};

const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

/// One requested line of a checkout
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub stock_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(custom = "validate_lines")]
    pub lines: Vec<OrderLineRequest>,
    pub payment_type: PaymentType,
    pub promotion_code: Option<String>,
    #[validate(length(max = 255), custom = "validate_not_blank")]
    pub recipient_name: String,
    #[validate(length(max = 32), custom = "validate_not_blank")]
    pub recipient_phone: String,
    #[validate(length(max = 1024), custom = "validate_not_blank")]
    pub shipping_address: String,
    /// Customer address forwarded to the payment gateway
    pub client_ip: Option<String>,
}

fn validate_lines(lines: &[OrderLineRequest]) -> Result<(), ValidationError> {
    if lines.is_empty() {
        let mut err = ValidationError::new("lines");
        err.message = Some("Order must contain at least one line".into());
        return Err(err);
    }
    if lines.iter().any(|line| line.validate().is_err()) {
        let mut err = ValidationError::new("lines");
        err.message = Some("Quantity must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub product_discount: Decimal,
    pub shipping_discount: Decimal,
    pub shipping_fee: Decimal,
    pub final_total: Decimal,
    pub payment_redirect_url: Option<String>,
}

/// An order together with its lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    pub order: OrderModel,
    pub details: Vec<OrderDetailModel>,
}

/// What happened to a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackReport {
    pub order_id: Uuid,
    pub transaction_ref: String,
    pub outcome: PaymentOutcome,
    pub status: OrderStatus,
    /// The transaction had been processed before; nothing was applied this time.
    pub replayed: bool,
    /// Payment went through but the promotion had no uses left.
    pub promotion_usage_rejected: bool,
}

/// Drives an order from checkout to its final status.
#[derive(Clone)]
pub struct OrderOrchestrator {
    stores: Stores,
    guard: StatusTransitionGuard,
    inventory: InventoryLedger,
    promotions: PromotionEngine,
    verifier: PaymentCallbackVerifier,
    checkout: CheckoutConfig,
    retry: RetryConfig,
    callback_timeout: Duration,
    event_sender: Option<EventSender>,
    notifier: Arc<dyn OrderNotifier>,
}

impl OrderOrchestrator {
    pub fn new(
        stores: Stores,
        checkout: CheckoutConfig,
        gateway: PaymentGatewayConfig,
        retry: RetryConfig,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            guard: StatusTransitionGuard::new(stores.orders.clone(), retry.clone()),
            inventory: InventoryLedger::new(stores.stocks.clone(), retry.clone()),
            promotions: PromotionEngine::new(stores.promotions.clone(), retry.clone()),
            verifier: PaymentCallbackVerifier::new(gateway),
            stores,
            checkout,
            retry,
            callback_timeout,
            event_sender: None,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn from_config(stores: Stores, config: &AppConfig) -> Self {
        Self::new(
            stores,
            config.checkout.clone(),
            config.payment_gateway.clone(),
            config.retry.clone(),
            config.callback_timeout(),
        )
    }

    pub fn with_event_sender(mut self, event_sender: EventSender) -> Self {
        self.inventory = self.inventory.with_event_sender(event_sender.clone());
        self.event_sender = Some(event_sender);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn OrderNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn verifier(&self) -> &PaymentCallbackVerifier {
        &self.verifier
    }

    pub fn inventory(&self) -> &InventoryLedger {
        &self.inventory
    }

    /// Prices the request, reserves stock and persists a PENDING_PAYMENT order.
    ///
    /// Promotion usage is not consumed here; that happens when payment is confirmed.
    #[instrument(skip(self, request), fields(customer_id = %actor.user_id, lines = request.lines.len()))]
    pub async fn create_order(
        &self,
        actor: Actor,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        let result = self.place_order(actor, request).await;
        if let Err(e) = &result {
            metrics::record_failure("create_order", e.error_code());
        }
        result
    }

    async fn place_order(
        &self,
        actor: Actor,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let lines: Vec<ReservationLine> = request
            .lines
            .iter()
            .map(|line| ReservationLine::new(line.stock_id, line.quantity))
            .collect();
        let merged = merge_lines(&lines)?;

        // prices are snapshotted from the stock rows
        let mut details = Vec::with_capacity(merged.len());
        for line in &merged {
            let stock = self
                .stores
                .stocks
                .find_stock(line.stock_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", line.stock_id)))?;
            details.push(OrderDetailModel {
                id: Uuid::new_v4(),
                order_id,
                stock_id: Some(stock.id),
                product_id: stock.product_id,
                product_name: stock.product_name,
                color_name: Some(stock.color_name),
                quantity: line.quantity,
                unit_price: stock.price,
                promotion_id: None,
                reviewed: false,
            });
        }
        let line_totals = details
            .iter()
            .map(OrderDetailModel::line_total)
            .collect::<Result<Vec<_>, _>>()?;
        let subtotal = round_money(checked_total(line_totals)?);
        let shipping_fee = round_money(self.checkout.shipping_fee);

        let applied = match request
            .promotion_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
        {
            Some(code) => {
                let promotion = self.promotions.find_valid(code, now).await?;
                Some(PromotionEngine::apply(&promotion, subtotal, shipping_fee)?)
            }
            None => None,
        };
        let (product_discount, shipping_discount) = applied
            .as_ref()
            .map(|a| (a.product_discount, a.shipping_discount))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let final_total = round_money(checked_total([
            subtotal,
            -product_discount,
            shipping_fee,
            -shipping_discount,
        ])?);

        if let Some(AppliedPromotion { promotion_id, .. }) = &applied {
            for detail in &mut details {
                detail.promotion_id = Some(*promotion_id);
            }
        }

        let order = OrderModel {
            id: order_id,
            customer_id: actor.user_id,
            status: OrderStatus::PendingPayment,
            payment_type: request.payment_type,
            subtotal,
            product_discount,
            shipping_discount,
            shipping_fee,
            final_total,
            recipient_name: request.recipient_name.trim().to_string(),
            recipient_phone: request.recipient_phone.trim().to_string(),
            shipping_address: request.shipping_address.trim().to_string(),
            promotion_id: applied.as_ref().map(|a| a.promotion_id),
            promotion_code: applied.as_ref().map(|a| a.code.clone()),
            created_by: actor.user_id,
            approved_by: None,
            cancel_reason: None,
            payment_transaction_ref: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let payment_redirect_url = if order.payment_type.requires_redirect() {
            let client_ip = request.client_ip.as_deref().unwrap_or(DEFAULT_CLIENT_IP);
            Some(
                self.verifier
                    .payment_url(&order, &self.checkout.currency, client_ip, now)?,
            )
        } else {
            None
        };

        let reserved = self.inventory.reserve_all(&lines).await?;

        if let Err(e) = retry_contention(&self.retry, || {
            self.stores
                .orders
                .insert_order(order.clone(), details.clone())
        })
        .await
        {
            error!(order_id = %order_id, "Failed to persist order, releasing stock: {}", e);
            if let Err(release_error) = self.inventory.release_all(&reserved).await {
                error!(order_id = %order_id, "Failed to release stock after persistence failure: {}", release_error);
                return Err(release_error);
            }
            return Err(e);
        }

        metrics::ORDERS_CREATED.inc();
        info!(
            order_id = %order_id,
            final_total = %final_total,
            promotion = ?order.promotion_code,
            "Order created"
        );

        self.publish(Event::OrderCreated {
            order_id,
            customer_id: order.customer_id,
            final_total,
        })
        .await;
        self.notify(Notification::order_confirmation(&order)).await;

        Ok(CreateOrderResponse {
            order_id,
            status: order.status,
            subtotal,
            product_discount,
            shipping_discount,
            shipping_fee,
            final_total,
            payment_redirect_url,
        })
    }

    /// Applies a gateway callback at most once per transaction reference.
    ///
    /// Processing runs on its own task; if it outlives the callback timeout the
    /// caller gets `Timeout` while the task still finishes, so a callback is never
    /// left half applied.
    #[instrument(skip(self, raw_params), fields(params = raw_params.len()))]
    pub async fn handle_payment_callback(
        &self,
        raw_params: &BTreeMap<String, String>,
    ) -> Result<CallbackReport, ServiceError> {
        let this = self.clone();
        let params = raw_params.clone();
        let task = tokio::spawn(async move { this.process_callback(&params).await });

        let result = match tokio::time::timeout(self.callback_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ServiceError::InternalError(format!(
                "Callback processing aborted: {}",
                join_error
            ))),
            Err(_) => {
                warn!(timeout = ?self.callback_timeout, "Payment callback timed out");
                Err(ServiceError::Timeout(
                    "Payment callback processing exceeded its deadline".to_string(),
                ))
            }
        };

        let label = match &result {
            Ok(report) if report.replayed => "replayed",
            Ok(report) => match report.outcome {
                PaymentOutcome::PaymentSuccess => "success",
                PaymentOutcome::PaymentFailure => "failure",
            },
            Err(e) => e.error_code(),
        };
        metrics::PAYMENT_CALLBACKS.with_label_values(&[label]).inc();
        result
    }

    async fn process_callback(
        &self,
        raw_params: &BTreeMap<String, String>,
    ) -> Result<CallbackReport, ServiceError> {
        let callback = CallbackParams::new(raw_params);

        let outcome = match self.verifier.verify(raw_params) {
            VerificationOutcome::SignatureInvalid => {
                warn!("Rejected payment callback with invalid signature");
                return Err(ServiceError::SignatureInvalid);
            }
            VerificationOutcome::PaymentSuccess => PaymentOutcome::PaymentSuccess,
            VerificationOutcome::PaymentFailure => PaymentOutcome::PaymentFailure,
        };

        let callback_key = callback.callback_key()?;
        let transaction_ref = callback.transaction_ref()?;
        let order_id = callback.order_id()?;

        if let Some(previous) = self.stores.callbacks.find_callback(&callback_key).await? {
            info!(callback_key = %callback_key, "Replaying processed payment callback");
            return self.replay(previous, order_id, transaction_ref).await;
        }

        let order = self
            .stores
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let amount = callback.amount()?;
        if amount != order.final_total {
            warn!(
                order_id = %order_id,
                expected = %order.final_total,
                received = %amount,
                "Payment callback amount mismatch"
            );
            return Err(ServiceError::ValidationError(format!(
                "Callback amount {} does not match order total {}",
                amount, order.final_total
            )));
        }

        let claimed = self
            .stores
            .callbacks
            .claim(payment_callback::Model {
                transaction_ref: callback_key.clone(),
                order_id,
                outcome,
                processed_at: Utc::now(),
            })
            .await?;
        if !claimed {
            return match self.stores.callbacks.find_callback(&callback_key).await? {
                Some(previous) => self.replay(previous, order_id, transaction_ref).await,
                None => Err(ServiceError::DuplicateCallback(callback_key)),
            };
        }

        let target = match outcome {
            PaymentOutcome::PaymentSuccess => OrderStatus::Paid,
            PaymentOutcome::PaymentFailure => OrderStatus::FailedPayment,
        };
        let change = StatusChange::to(target).with_transaction_ref(transaction_ref.clone());
        let updated = match self.guard.transition(&order, change).await {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(forget_error) = self.stores.callbacks.forget(&callback_key).await {
                    error!(callback_key = %callback_key, "Failed to drop callback claim: {}", forget_error);
                }
                return Err(match e {
                    ServiceError::InvalidStatusTransition { from, .. } if from.is_payment_settled() => {
                        warn!(
                            order_id = %order_id,
                            status = %from,
                            "Order already settled by another transaction"
                        );
                        ServiceError::DuplicateCallback(format!(
                            "Order {} is already {}",
                            order_id, from
                        ))
                    }
                    other => other,
                });
            }
        };
        self.publish_status_change(&order, &updated).await;

        let mut promotion_usage_rejected = false;
        match outcome {
            PaymentOutcome::PaymentSuccess => {
                if let Some(promotion_id) = updated.promotion_id {
                    match self.promotions.record_usage(promotion_id).await {
                        Ok(_) => {
                            self.publish(Event::PromotionRedeemed {
                                promotion_id,
                                order_id,
                            })
                            .await;
                        }
                        Err(ServiceError::PromotionUsageExceeded(_)) => {
                            warn!(
                                order_id = %order_id,
                                promotion_id = %promotion_id,
                                "Order paid after promotion ran out of uses"
                            );
                            promotion_usage_rejected = true;
                        }
                        Err(e) => {
                            error!(
                                order_id = %order_id,
                                promotion_id = %promotion_id,
                                "Order paid but promotion usage was not recorded: {}",
                                e
                            );
                            return Err(e);
                        }
                    }
                }
                self.publish(Event::PaymentCaptured {
                    order_id,
                    transaction_ref: transaction_ref.clone(),
                    amount,
                })
                .await;
                self.notify(Notification::payment_received(&updated)).await;
            }
            PaymentOutcome::PaymentFailure => {
                let released = self.release_order_stock(order_id).await;
                self.publish(Event::PaymentFailed {
                    order_id,
                    transaction_ref: transaction_ref.clone(),
                    response_code: callback.response_code().unwrap_or_default().to_string(),
                })
                .await;
                released?;
            }
        }

        info!(
            order_id = %order_id,
            transaction_ref = %transaction_ref,
            outcome = %outcome,
            "Payment callback applied"
        );

        Ok(CallbackReport {
            order_id,
            transaction_ref,
            outcome,
            status: updated.status,
            replayed: false,
            promotion_usage_rejected,
        })
    }

    async fn replay(
        &self,
        previous: payment_callback::Model,
        order_id: Uuid,
        transaction_ref: String,
    ) -> Result<CallbackReport, ServiceError> {
        if previous.order_id != order_id {
            warn!(
                recorded = %previous.order_id,
                received = %order_id,
                "Callback key was recorded for another order"
            );
            return Err(ServiceError::ValidationError(format!(
                "Callback for order {} matches a transaction of order {}",
                order_id, previous.order_id
            )));
        }
        let order = self
            .stores
            .orders
            .find_order(previous.order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", previous.order_id))
            })?;
        Ok(CallbackReport {
            order_id: previous.order_id,
            transaction_ref,
            outcome: previous.outcome,
            status: order.status,
            replayed: true,
            promotion_usage_rejected: false,
        })
    }

    /// Cancels an order that has not shipped and returns its stock.
    #[instrument(skip(self, reason), fields(order_id = %order_id, actor = %actor.user_id))]
    pub async fn cancel_order(
        &self,
        actor: Actor,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let result = self.cancel(actor, order_id, reason).await;
        if let Err(e) = &result {
            metrics::record_failure("cancel_order", e.error_code());
        }
        result
    }

    async fn cancel(
        &self,
        actor: Actor,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        let order = self.find_order(order_id).await?;
        if !actor.is_staff() && order.customer_id != actor.user_id {
            return Err(ServiceError::Forbidden(format!(
                "Order {} belongs to another customer",
                order_id
            )));
        }

        if order.status.is_terminal()
            || matches!(order.status, OrderStatus::Shipped | OrderStatus::Delivered)
        {
            warn!(status = %order.status, "Order can no longer be cancelled");
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let mut change = StatusChange::to(OrderStatus::Cancelled);
        if let Some(reason) = reason {
            change = change.with_cancel_reason(reason);
        }
        let updated = self.guard.transition(&order, change).await?;

        let released = self.release_order_stock(order_id).await;

        metrics::ORDERS_CANCELLED.inc();
        info!(reason = ?reason, "Order cancelled");
        self.publish_status_change(&order, &updated).await;
        self.publish(Event::OrderCancelled {
            order_id,
            reason: reason.map(str::to_string),
        })
        .await;
        self.notify(Notification::order_cancelled(&updated)).await;

        released?;
        Ok(updated)
    }

    /// Staff moves a paid order along fulfilment, one step at a time.
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor.user_id))]
    pub async fn advance_fulfilment(
        &self,
        actor: Actor,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        if !actor.is_staff() {
            return Err(ServiceError::Forbidden(
                "Only staff can advance fulfilment".to_string(),
            ));
        }
        if !matches!(
            target,
            OrderStatus::Processing
                | OrderStatus::AwaitingShipment
                | OrderStatus::Shipped
                | OrderStatus::Delivered
        ) {
            return Err(ServiceError::ValidationError(format!(
                "{} is not a fulfilment status",
                target
            )));
        }

        let order = self.find_order(order_id).await?;
        let change = StatusChange::to(target).approved_by(actor.user_id);
        let updated = self.guard.transition(&order, change).await?;
        self.publish_status_change(&order, &updated).await;
        Ok(updated)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_order(order_id).await?;
        let details = self.stores.orders.find_details(order_id).await?;
        Ok(OrderView { order, details })
    }

    pub async fn list_customer_orders(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        self.stores.orders.find_by_customer(customer_id).await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.stores
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Returns every line of an order to stock.
    ///
    /// Keeps going past a failed line and reports the first failure.
    async fn release_order_stock(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let details = self.stores.orders.find_details(order_id).await.map_err(|e| {
            error!(order_id = %order_id, "Failed to load order lines for release: {}", e);
            e
        })?;

        let mut first_error = None;
        for detail in &details {
            let released = match self.inventory.resolve_stock(detail).await {
                Ok(stock) => self.inventory.release(stock.id, detail.quantity).await,
                Err(e) => Err(e),
            };
            if let Err(e) = released {
                error!(
                    order_id = %order_id,
                    detail_id = %detail.id,
                    quantity = detail.quantity,
                    "Failed to release stock for order line: {}",
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish_status_change(&self, before: &OrderModel, after: &OrderModel) {
        self.publish(Event::OrderStatusChanged {
            order_id: after.id,
            old_status: before.status,
            new_status: after.status,
        })
        .await;
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn notify(&self, notification: Notification) {
        let order_id = notification.order_id;
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(order_id = %order_id, "Failed to send notification: {}", e);
        }
    }
}
