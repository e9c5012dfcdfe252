use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::money::line_amount;

/// One purchased line. `stock_id` is empty only for rows written before stock
/// references existed; those are matched back by product and color name.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub stock_id: Option<Uuid>,
    pub product_id: Uuid,
    pub product_name: String,
    pub color_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub promotion_id: Option<Uuid>,
    pub reviewed: bool,
}

impl Model {
    pub fn line_total(&self) -> Result<Decimal, ServiceError> {
        line_amount(self.unit_price, self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
