use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Store-scoped stock record. Owned exclusively by one store; the stock
/// quantity is mutated only through deduction and replenishment operations.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    pub unit: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub stock_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub minimum_threshold: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversion_mapping::Entity")]
    ConversionMappings,
}

impl Related<super::conversion_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversionMappings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
