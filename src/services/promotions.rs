use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::promotion::{Model as PromotionModel, PromotionType},
    errors::ServiceError,
    metrics,
    money::{percent_of, round_money},
    repositories::{ConditionalUpdate, PromotionStore},
    retry::{retry_contention, RetryConfig},
};

/// How a promotion reduces the price, with the parameters it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountRule {
    /// `percent` of the subtotal, optionally capped.
    Percentage { percent: Decimal, max: Option<Decimal> },
    /// A flat amount off the subtotal.
    FixedAmount { amount: Decimal },
    /// `percent` of the shipping fee, optionally capped.
    Shipping { percent: Decimal, max: Option<Decimal> },
}

impl DiscountRule {
    /// True when the rule discounts the shipping fee rather than the goods.
    pub fn applies_to_shipping(&self) -> bool {
        matches!(self, DiscountRule::Shipping { .. })
    }
}

impl From<&PromotionModel> for DiscountRule {
    fn from(promotion: &PromotionModel) -> Self {
        match promotion.promotion_type {
            PromotionType::Percentage => DiscountRule::Percentage {
                percent: promotion.value,
                max: promotion.max_discount_amount,
            },
            PromotionType::FixedAmount => DiscountRule::FixedAmount {
                amount: promotion.value,
            },
            PromotionType::ShippingDiscount => DiscountRule::Shipping {
                percent: promotion.value,
                max: promotion.max_discount_amount,
            },
        }
    }
}

/// Discount produced by `rule` against `amount`.
///
/// The result is rounded to two places and always lies in `[0, amount]`.
/// Fails with `ValidationError` when the percentage overflows.
pub fn calculate_discount(rule: &DiscountRule, amount: Decimal) -> Result<Decimal, ServiceError> {
    if amount <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }

    let raw = match *rule {
        DiscountRule::Percentage { percent, max } | DiscountRule::Shipping { percent, max } => {
            let discount = percent_of(amount, percent)?;
            match max {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountRule::FixedAmount { amount: off } => off,
    };

    Ok(round_money(raw).max(Decimal::ZERO).min(amount))
}

/// Discounts a promotion grants on one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPromotion {
    pub promotion_id: Uuid,
    pub code: String,
    pub product_discount: Decimal,
    pub shipping_discount: Decimal,
}

#[derive(Clone)]
pub struct PromotionEngine {
    promotions: Arc<dyn PromotionStore>,
    retry: RetryConfig,
}

impl PromotionEngine {
    pub fn new(promotions: Arc<dyn PromotionStore>, retry: RetryConfig) -> Self {
        Self { promotions, retry }
    }

    /// Looks up a promotion code that can be used at `now`.
    #[instrument(skip(self))]
    pub async fn find_valid(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<PromotionModel, ServiceError> {
        let promotion = self
            .promotions
            .find_promotion_by_code(code)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ServiceError::NotFound(format!("Promotion {} not found", code)))?;

        if !promotion.is_within_window(now) {
            debug!(
                start = %promotion.start_date,
                end = %promotion.end_date,
                "Promotion outside its validity window"
            );
            return Err(ServiceError::PromotionExpired(code.to_string()));
        }

        if !promotion.has_remaining_uses() {
            warn!("Promotion {} has reached usage limit", code);
            return Err(ServiceError::PromotionUsageExceeded(code.to_string()));
        }

        Ok(promotion)
    }

    /// True when `amount` meets the promotion's minimum order value.
    pub fn is_valid_for_amount(promotion: &PromotionModel, amount: Decimal) -> bool {
        promotion
            .min_order_value
            .map_or(true, |minimum| amount >= minimum)
    }

    /// Prices a promotion against a checkout: goods discounts come off the
    /// subtotal, shipping discounts off the shipping fee.
    pub fn apply(
        promotion: &PromotionModel,
        subtotal: Decimal,
        shipping_fee: Decimal,
    ) -> Result<AppliedPromotion, ServiceError> {
        if !Self::is_valid_for_amount(promotion, subtotal) {
            return Err(ServiceError::ValidationError(format!(
                "Order subtotal {} is below the minimum {} for promotion {}",
                subtotal,
                promotion.min_order_value.unwrap_or_default(),
                promotion.code
            )));
        }

        let rule = DiscountRule::from(promotion);
        let (product_discount, shipping_discount) = if rule.applies_to_shipping() {
            (Decimal::ZERO, calculate_discount(&rule, shipping_fee)?)
        } else {
            (calculate_discount(&rule, subtotal)?, Decimal::ZERO)
        };

        Ok(AppliedPromotion {
            promotion_id: promotion.id,
            code: promotion.code.clone(),
            product_discount,
            shipping_discount,
        })
    }

    /// Consumes one use. Fails with `PromotionUsageExceeded` once the limit is reached.
    #[instrument(skip(self), fields(promotion_id = %promotion_id))]
    pub async fn record_usage(&self, promotion_id: Uuid) -> Result<i32, ServiceError> {
        let outcome = retry_contention(&self.retry, || {
            self.promotions.increment_usage_if_below_limit(promotion_id)
        })
        .await?;

        match outcome {
            ConditionalUpdate::Applied { current } => {
                metrics::PROMOTION_REDEMPTIONS.inc();
                info!(usage_count = current, "Recorded promotion usage");
                Ok(current)
            }
            ConditionalUpdate::Rejected { current } => {
                warn!(usage_count = current, "Promotion usage limit reached");
                Err(ServiceError::PromotionUsageExceeded(promotion_id.to_string()))
            }
        }
    }
}
