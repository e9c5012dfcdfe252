#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stateset_checkout::{
    actor::Actor,
    config::{CheckoutConfig, PaymentGatewayConfig},
    entities::{order, order_detail, promotion, stock, OrderStatus, PaymentType, PromotionType},
    errors::ServiceError,
    events::{Event, EventSender},
    money::to_minor_units,
    notifications::{InMemoryNotifier, Notification, NotificationError, OrderNotifier},
    repositories::{
        CallbackLedger, ConditionalUpdate, InMemoryStore, OrderStore, PromotionStore,
        StatusChange, StockStore, Stores,
    },
    retry::RetryConfig,
    services::{
        payment_gateway::{
            CallbackParams, PARAM_AMOUNT, PARAM_ORDER_INFO, PARAM_RESPONSE_CODE,
            PARAM_TRANSACTION_NO, PARAM_TRANSACTION_STATUS, PARAM_TXN_REF,
        },
        CreateOrderRequest, OrderLineRequest, OrderOrchestrator,
    },
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test_gateway_secret_for_checkout_tests";
pub const SHIPPING_FEE: Decimal = dec!(30000);

pub fn gateway_config() -> PaymentGatewayConfig {
    PaymentGatewayConfig {
        merchant_code: "TESTSHOP".to_string(),
        secret_key: TEST_SECRET.to_string(),
        ..PaymentGatewayConfig::default()
    }
}

/// Orchestrator wired against an in-memory store, with captured events and notifications.
pub struct TestCheckout {
    pub orchestrator: OrderOrchestrator,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<InMemoryNotifier>,
    pub events: mpsc::Receiver<Event>,
}

impl TestCheckout {
    pub fn new() -> Self {
        Self::with_stores(Arc::new(InMemoryStore::new()), |_| {})
    }

    /// Same as `new` but with the order store replaced.
    pub fn with_order_store(orders: Arc<dyn OrderStore>) -> Self {
        Self::with_stores(Arc::new(InMemoryStore::new()), move |stores| {
            stores.orders = orders;
        })
    }

    /// Stock writes go through a store that refuses to return units.
    pub fn with_failing_release() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let stocks: Arc<dyn StockStore> = Arc::new(FailingReleaseStore::new(store.clone()));
        Self::with_stores(store, move |stores| stores.stocks = stocks)
    }

    /// Promotion usage cannot be recorded; lookups still work.
    pub fn with_failing_usage() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let promotions: Arc<dyn PromotionStore> = Arc::new(FailingUsageStore::new(store.clone()));
        Self::with_stores(store, move |stores| stores.promotions = promotions)
    }

    fn with_stores(store: Arc<InMemoryStore>, customize: impl FnOnce(&mut Stores)) -> Self {
        let mut stores = Stores::shared(store.clone());
        customize(&mut stores);
        let notifier = Arc::new(InMemoryNotifier::new());
        let (event_sender, events) = EventSender::channel(256);

        let orchestrator = OrderOrchestrator::new(
            stores,
            CheckoutConfig {
                shipping_fee: SHIPPING_FEE,
                currency: "VND".to_string(),
            },
            gateway_config(),
            RetryConfig::no_retry(),
            Duration::from_secs(5),
        )
        .with_event_sender(event_sender)
        .with_notifier(notifier.clone());

        Self {
            orchestrator,
            store,
            notifier,
            events,
        }
    }

    pub async fn seed_stock(&self, quantity: i32, price: Decimal) -> stock::Model {
        let stock = stock::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Linen shirt".to_string(),
            color_name: "Navy".to_string(),
            quantity,
            price,
            updated_at: Utc::now(),
        };
        self.store
            .save_stock(stock.clone())
            .await
            .expect("seed stock");
        stock
    }

    pub async fn seed_promotion(
        &self,
        code: &str,
        promotion_type: PromotionType,
        value: Decimal,
        usage_limit: i32,
    ) -> promotion::Model {
        let now = Utc::now();
        let promotion = promotion::Model {
            id: Uuid::new_v4(),
            code: code.to_string(),
            promotion_type,
            value,
            max_discount_amount: None,
            min_order_value: None,
            usage_limit,
            usage_count: 0,
            is_active: true,
            start_date: now - ChronoDuration::days(1),
            end_date: now + ChronoDuration::days(1),
        };
        self.store
            .save_promotion(promotion.clone())
            .await
            .expect("seed promotion");
        promotion
    }

    pub async fn stock_quantity(&self, stock_id: Uuid) -> i32 {
        self.store
            .find_stock(stock_id)
            .await
            .expect("stock lookup")
            .expect("stock exists")
            .quantity
    }

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        self.store
            .find_order(order_id)
            .await
            .expect("order lookup")
            .expect("order exists")
    }

    pub async fn promotion_usage(&self, promotion_id: Uuid) -> i32 {
        self.store
            .find_promotion(promotion_id)
            .await
            .expect("promotion lookup")
            .expect("promotion exists")
            .usage_count
    }

    /// Forces an order into `status` without going through the guard.
    pub async fn force_status(&self, order_id: Uuid, status: OrderStatus) {
        let current = self.order(order_id).await.status;
        self.store
            .compare_and_set_status(order_id, current, StatusChange::to(status))
            .await
            .expect("force status")
            .expect("status applied");
    }

    /// Callback parameters as the gateway would send them, signed with the test secret.
    pub fn signed_callback(
        &self,
        order: &order::Model,
        transaction_no: &str,
        response_code: &str,
    ) -> BTreeMap<String, String> {
        let mut params = callback_params(order, transaction_no, response_code);
        let signature = self
            .orchestrator
            .verifier()
            .sign(&params)
            .expect("sign callback");
        params.insert(
            self.orchestrator.verifier().config().signature_param.clone(),
            signature,
        );
        params.insert(
            self.orchestrator.verifier().config().signature_type_param.clone(),
            "HmacSHA512".to_string(),
        );
        params
    }

    /// Whether the ledger holds a record for this callback.
    pub async fn callback_recorded(&self, params: &BTreeMap<String, String>) -> bool {
        let key = CallbackParams::new(params)
            .callback_key()
            .expect("callback key");
        self.store
            .find_callback(&key)
            .await
            .expect("ledger lookup")
            .is_some()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn callback_params(
    order: &order::Model,
    transaction_no: &str,
    response_code: &str,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert(
        PARAM_AMOUNT.to_string(),
        to_minor_units(order.final_total)
            .expect("amount fits")
            .to_string(),
    );
    params.insert(PARAM_TXN_REF.to_string(), order.id.simple().to_string());
    params.insert(
        PARAM_ORDER_INFO.to_string(),
        format!("Payment for order {}", order.id),
    );
    params.insert(PARAM_RESPONSE_CODE.to_string(), response_code.to_string());
    params.insert(
        PARAM_TRANSACTION_STATUS.to_string(),
        response_code.to_string(),
    );
    params.insert(PARAM_TRANSACTION_NO.to_string(), transaction_no.to_string());
    params
}

pub fn order_request(lines: Vec<(Uuid, i32)>, payment_type: PaymentType) -> CreateOrderRequest {
    CreateOrderRequest {
        lines: lines
            .into_iter()
            .map(|(stock_id, quantity)| OrderLineRequest { stock_id, quantity })
            .collect(),
        payment_type,
        promotion_code: None,
        recipient_name: "Nguyen Van A".to_string(),
        recipient_phone: "0901234567".to_string(),
        shipping_address: "12 Le Loi, District 1".to_string(),
        client_ip: Some("10.0.0.7".to_string()),
    }
}

pub fn customer() -> Actor {
    Actor::customer(Uuid::new_v4())
}

pub fn staff() -> Actor {
    Actor::staff(Uuid::new_v4())
}

/// Order store whose inserts always fail; reads and updates pass through.
pub struct FailingOrderStore {
    inner: InMemoryStore,
}

impl FailingOrderStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
        }
    }
}

#[async_trait]
impl OrderStore for FailingOrderStore {
    async fn insert_order(
        &self,
        _order: order::Model,
        _details: Vec<order_detail::Model>,
    ) -> Result<(), ServiceError> {
        Err(ServiceError::InternalError(
            "orders table unavailable".to_string(),
        ))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        self.inner.find_order(order_id).await
    }

    async fn find_details(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_detail::Model>, ServiceError> {
        self.inner.find_details(order_id).await
    }

    async fn find_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        self.inner.find_by_customer(customer_id).await
    }

    async fn compare_and_set_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        change: StatusChange,
    ) -> Result<Option<order::Model>, ServiceError> {
        self.inner
            .compare_and_set_status(order_id, expected, change)
            .await
    }
}

/// Notifier that always fails delivery.
pub struct FailingNotifier;

#[async_trait]
impl OrderNotifier for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), NotificationError> {
        Err(NotificationError::Delivery("smtp down".to_string()))
    }
}

/// Stock store whose increments always fail; everything else passes through.
pub struct FailingReleaseStore {
    inner: Arc<InMemoryStore>,
}

impl FailingReleaseStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StockStore for FailingReleaseStore {
    async fn find_stock(&self, stock_id: Uuid) -> Result<Option<stock::Model>, ServiceError> {
        self.inner.find_stock(stock_id).await
    }

    async fn find_stock_by_variant(
        &self,
        product_id: Uuid,
        color_name: &str,
    ) -> Result<Option<stock::Model>, ServiceError> {
        self.inner.find_stock_by_variant(product_id, color_name).await
    }

    async fn save_stock(&self, stock: stock::Model) -> Result<(), ServiceError> {
        self.inner.save_stock(stock).await
    }

    async fn decrement_if_available(
        &self,
        stock_id: Uuid,
        qty: i32,
    ) -> Result<ConditionalUpdate, ServiceError> {
        self.inner.decrement_if_available(stock_id, qty).await
    }

    async fn increment(&self, _stock_id: Uuid, _qty: i32) -> Result<i32, ServiceError> {
        Err(ServiceError::InternalError(
            "stocks table unavailable".to_string(),
        ))
    }
}

/// Promotion store whose usage increments always fail.
pub struct FailingUsageStore {
    inner: Arc<InMemoryStore>,
}

impl FailingUsageStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PromotionStore for FailingUsageStore {
    async fn find_promotion(
        &self,
        promotion_id: Uuid,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        self.inner.find_promotion(promotion_id).await
    }

    async fn find_promotion_by_code(
        &self,
        code: &str,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        self.inner.find_promotion_by_code(code).await
    }

    async fn save_promotion(&self, promotion: promotion::Model) -> Result<(), ServiceError> {
        self.inner.save_promotion(promotion).await
    }

    async fn increment_usage_if_below_limit(
        &self,
        _promotion_id: Uuid,
    ) -> Result<ConditionalUpdate, ServiceError> {
        Err(ServiceError::InternalError(
            "promotions table unavailable".to_string(),
        ))
    }
}
