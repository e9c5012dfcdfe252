use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle states.
///
/// ```text
/// PENDING_PAYMENT ──► PAID ──► PROCESSING ──► AWAITING_SHIPMENT ──► SHIPPED ──► DELIVERED
///        │
///        ├──► FAILED_PAYMENT
///        └──► CANCELLED
/// ```
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING_PAYMENT")]
    PendingPayment,
    #[sea_orm(string_value = "FAILED_PAYMENT")]
    FailedPayment,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "AWAITING_SHIPMENT")]
    AwaitingShipment,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "RETURN_REQUESTED")]
    ReturnRequested,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::PendingPayment,
        OrderStatus::FailedPayment,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::AwaitingShipment,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::ReturnRequested,
        OrderStatus::Refunded,
    ];

    /// Statuses reachable in one step from `self`.
    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            PendingPayment => &[FailedPayment, Paid, Cancelled],
            Paid => &[Processing],
            Processing => &[AwaitingShipment],
            AwaitingShipment => &[Shipped],
            Shipped => &[Delivered],
            FailedPayment | Delivered | Cancelled | ReturnRequested | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::FailedPayment
                | OrderStatus::Refunded
        )
    }

    /// True once a payment outcome (success or failure) has been applied.
    pub fn is_payment_settled(self) -> bool {
        !matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::Cancelled
        )
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    #[sea_orm(string_value = "CASH_ON_DELIVERY")]
    CashOnDelivery,
    #[sea_orm(string_value = "ONLINE_GATEWAY")]
    OnlineGateway,
}

impl PaymentType {
    /// Gateway payments send the customer to a signed checkout URL.
    pub fn requires_redirect(self) -> bool {
        matches!(self, PaymentType::OnlineGateway)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_type: PaymentType,
    pub subtotal: Decimal,
    pub product_discount: Decimal,
    pub shipping_discount: Decimal,
    pub shipping_fee: Decimal,
    pub final_total: Decimal,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub shipping_address: String,
    pub promotion_id: Option<Uuid>,
    pub promotion_code: Option<String>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub payment_transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_detail::Entity")]
    OrderDetail,
}

impl Related<super::order_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderDetail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
