use crate::{
    db::DbPool,
    entities::inventory_item,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Summary of one store's stock position.
#[derive(Debug, Clone)]
pub struct InventoryStatus {
    pub store_id: Uuid,
    pub total_items: usize,
    pub low_stock_items: Vec<inventory_item::Model>,
}

/// Store inventory reads and replenishment.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Store-wide status with items at or below their minimum threshold.
    #[instrument(skip(self))]
    pub async fn store_status(&self, store_id: Uuid) -> Result<InventoryStatus, ServiceError> {
        let db = self.db.as_ref();

        let items = inventory_item::Entity::find()
            .filter(inventory_item::Column::StoreId.eq(store_id))
            .filter(inventory_item::Column::IsActive.eq(true))
            .order_by_asc(inventory_item::Column::Name)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let low_stock_items: Vec<_> = items
            .iter()
            .filter(|item| {
                item.minimum_threshold
                    .map(|threshold| item.stock_quantity <= threshold)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        Ok(InventoryStatus {
            store_id,
            total_items: items.len(),
            low_stock_items,
        })
    }

    /// Adds received stock to a store's item. The write is conditional on
    /// the observed quantity so it cannot lose a concurrent deduction.
    #[instrument(skip(self))]
    pub async fn receive_stock(
        &self,
        store_id: Uuid,
        inventory_item_id: Uuid,
        quantity: Decimal,
    ) -> Result<inventory_item::Model, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "replenishment quantity must be positive".to_string(),
            ));
        }

        let db = self.db.as_ref();

        loop {
            let Some(item) = inventory_item::Entity::find_by_id(inventory_item_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
            else {
                return Err(ServiceError::NotFound(format!(
                    "Inventory item {} not found",
                    inventory_item_id
                )));
            };

            if item.store_id != store_id {
                return Err(ServiceError::InvalidOperation(format!(
                    "Inventory item {} belongs to store {}, not {}",
                    item.id, item.store_id, store_id
                )));
            }

            let previous = item.stock_quantity;
            let new_stock = previous + quantity;

            let update = inventory_item::Entity::update_many()
                .col_expr(
                    inventory_item::Column::StockQuantity,
                    Expr::value(new_stock),
                )
                .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(inventory_item::Column::Id.eq(item.id))
                .filter(inventory_item::Column::StockQuantity.eq(previous))
                .exec(db)
                .await
                .map_err(ServiceError::db_error)?;

            if update.rows_affected == 0 {
                // Lost the race against a concurrent deduction; reread.
                continue;
            }

            if let Err(e) = self
                .event_sender
                .send(Event::StockReplenished {
                    store_id,
                    inventory_item_id,
                    quantity,
                    new_stock,
                })
                .await
            {
                warn!(error = %e, "failed to emit replenishment event");
            }

            return Ok(inventory_item::Model {
                stock_quantity: new_stock,
                updated_at: Utc::now(),
                ..item
            });
        }
    }
}
