use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a verified gateway callback.
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
pub enum PaymentOutcome {
    #[sea_orm(string_value = "PAYMENT_SUCCESS")]
    PaymentSuccess,
    #[sea_orm(string_value = "PAYMENT_FAILURE")]
    PaymentFailure,
}

/// Idempotency ledger row. `transaction_ref` holds the callback key:
/// merchant reference and gateway transaction number joined by `:`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_callbacks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction_ref: String,
    pub order_id: Uuid,
    pub outcome: PaymentOutcome,
    pub processed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
