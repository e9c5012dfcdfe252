use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

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
pub enum PromotionType {
    #[sea_orm(string_value = "PERCENTAGE")]
    Percentage,
    #[sea_orm(string_value = "FIXED_AMOUNT")]
    FixedAmount,
    #[sea_orm(string_value = "SHIPPING_DISCOUNT")]
    ShippingDiscount,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub promotion_type: PromotionType,
    pub value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_value: Option<Decimal>,
    pub usage_limit: i32,
    pub usage_count: i32,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Model {
    pub fn has_remaining_uses(&self) -> bool {
        self.usage_count < self.usage_limit
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    /// Row-level rules every stored promotion satisfies.
    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.code.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Promotion code must not be blank".to_string(),
            ));
        }
        if self.start_date >= self.end_date {
            return Err(ServiceError::ValidationError(format!(
                "Promotion {} must start before it ends",
                self.code
            )));
        }
        if self.value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Promotion {} has a negative value",
                self.code
            )));
        }
        if self.usage_count < 0 || self.usage_count > self.usage_limit {
            return Err(ServiceError::ValidationError(format!(
                "Promotion {} usage {} is outside 0..={}",
                self.code, self.usage_count, self.usage_limit
            )));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn promotion() -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "WELCOME".into(),
            promotion_type: PromotionType::FixedAmount,
            value: dec!(10000),
            max_discount_amount: None,
            min_order_value: None,
            usage_limit: 5,
            usage_count: 5,
            is_active: true,
            start_date: now,
            end_date: now + Duration::days(7),
        }
    }

    #[test]
    fn test_invariants_hold_at_the_usage_limit() {
        assert!(promotion().check_invariants().is_ok());
    }

    #[test]
    fn test_invariants_reject_bad_window_and_usage() {
        let mut promo = promotion();
        promo.end_date = promo.start_date;
        assert!(matches!(promo.check_invariants(), Err(ServiceError::ValidationError(_))));

        let mut promo = promotion();
        promo.usage_count = 6;
        assert!(matches!(promo.check_invariants(), Err(ServiceError::ValidationError(_))));

        let mut promo = promotion();
        promo.usage_count = -1;
        assert!(matches!(promo.check_invariants(), Err(ServiceError::ValidationError(_))));

        let mut promo = promotion();
        promo.value = dec!(-1);
        assert!(matches!(promo.check_invariants(), Err(ServiceError::ValidationError(_))));
    }
}
