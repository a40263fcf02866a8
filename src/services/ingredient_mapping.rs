use crate::{
    db::DbPool,
    entities::{conversion_mapping, inventory_item, recipe_ingredient},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// How the target inventory item was found. Fallback name matches are
/// inherently fragile and callers surface them as low-confidence warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingConfidence {
    /// Direct inventory reference on the recipe ingredient (or menu item).
    Direct,
    /// Explicit conversion mapping keyed by (store, ingredient name).
    Mapped,
    /// Case-insensitive / substring name match against the store's items.
    Fuzzy,
}

/// A deduction ready to execute: the target item in the requesting store and
/// the quantity in the item's storage unit.
#[derive(Debug, Clone)]
pub struct ResolvedDeduction {
    pub inventory_item_id: Uuid,
    pub item_name: String,
    pub ingredient_name: String,
    pub quantity: Decimal,
    pub confidence: MappingConfidence,
}

/// Configuration anomalies found during resolution. None of these are
/// retryable; they require manual data correction and are reported without
/// blocking the sale.
#[derive(Debug, Clone)]
pub enum MappingAnomaly {
    /// The mapping points at another store's inventory. The deduction is
    /// refused outright; applying it would corrupt the other store's stock.
    CrossStore {
        ingredient_name: String,
        inventory_item_id: Uuid,
        expected_store_id: Uuid,
        found_store_id: Uuid,
    },
    /// A conversion mapping with a zero or negative factor.
    InvalidConversion {
        ingredient_name: String,
        factor: Decimal,
    },
    /// No resolution path produced an inventory item in this store.
    Unmapped {
        ingredient_name: String,
        detail: String,
    },
}

impl MappingAnomaly {
    pub fn message(&self) -> String {
        match self {
            MappingAnomaly::CrossStore {
                ingredient_name,
                inventory_item_id,
                expected_store_id,
                found_store_id,
            } => format!(
                "Cross-store mapping for '{}': inventory item {} belongs to store {}, not {}",
                ingredient_name, inventory_item_id, found_store_id, expected_store_id
            ),
            MappingAnomaly::InvalidConversion {
                ingredient_name,
                factor,
            } => format!(
                "Invalid conversion factor {} for '{}'",
                factor, ingredient_name
            ),
            MappingAnomaly::Unmapped {
                ingredient_name,
                detail,
            } => format!("Unmapped ingredient '{}': {}", ingredient_name, detail),
        }
    }
}

/// Translates a required recipe quantity into inventory units. The factor is
/// recipe units per inventory unit, so twelve pieces against a factor-12 box
/// mapping yields exactly one box.
pub fn convert_to_inventory_units(required: Decimal, factor: Decimal) -> Option<Decimal> {
    if factor <= Decimal::ZERO {
        return None;
    }
    Some(required / factor)
}

fn normalized(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Name-match fallback: exact case-insensitive match wins, then a substring
/// match in either direction.
pub fn match_by_name<'a>(
    ingredient_name: &str,
    items: &'a [inventory_item::Model],
) -> Option<&'a inventory_item::Model> {
    let wanted = normalized(ingredient_name);
    if wanted.is_empty() {
        return None;
    }

    if let Some(exact) = items.iter().find(|i| normalized(&i.name) == wanted) {
        return Some(exact);
    }

    items.iter().find(|i| {
        let item_name = normalized(&i.name);
        item_name.contains(&wanted) || wanted.contains(&item_name)
    })
}

/// Resolves recipe ingredients to store-scoped inventory items.
///
/// Resolution never crosses store boundaries: every returned
/// `ResolvedDeduction` targets an item whose store equals the requesting
/// store, and direct references to foreign stores come back as
/// `MappingAnomaly::CrossStore`.
#[derive(Clone)]
pub struct IngredientMapper {
    db: Arc<DbPool>,
    fuzzy_enabled: bool,
}

impl IngredientMapper {
    pub fn new(db: Arc<DbPool>, fuzzy_enabled: bool) -> Self {
        Self { db, fuzzy_enabled }
    }

    /// Resolve one recipe ingredient. The outer `Result` is infrastructure;
    /// the inner one separates a usable resolution from a configuration
    /// anomaly.
    #[instrument(skip(self, ingredient), fields(ingredient = %ingredient.ingredient_name))]
    pub async fn resolve(
        &self,
        store_id: Uuid,
        ingredient: &recipe_ingredient::Model,
        required_quantity: Decimal,
    ) -> Result<Result<ResolvedDeduction, MappingAnomaly>, ServiceError> {
        // 1. Direct reference, validated against the store boundary.
        if let Some(item_id) = ingredient.inventory_item_id {
            return self
                .resolve_direct_reference(
                    store_id,
                    item_id,
                    &ingredient.ingredient_name,
                    required_quantity,
                )
                .await;
        }

        let db = self.db.as_ref();

        // 2. Explicit conversion mapping keyed by (store, ingredient name).
        let mapping = conversion_mapping::Entity::find()
            .filter(conversion_mapping::Column::StoreId.eq(store_id))
            .filter(
                conversion_mapping::Column::IngredientName.eq(&ingredient.ingredient_name),
            )
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(mapping) = mapping {
            let Some(quantity) =
                convert_to_inventory_units(required_quantity, mapping.conversion_factor)
            else {
                return Ok(Err(MappingAnomaly::InvalidConversion {
                    ingredient_name: ingredient.ingredient_name.clone(),
                    factor: mapping.conversion_factor,
                }));
            };

            let Some(item) = inventory_item::Entity::find_by_id(mapping.inventory_item_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
            else {
                return Ok(Err(MappingAnomaly::Unmapped {
                    ingredient_name: ingredient.ingredient_name.clone(),
                    detail: format!(
                        "conversion mapping {} references missing inventory item {}",
                        mapping.id, mapping.inventory_item_id
                    ),
                }));
            };

            if item.store_id != store_id {
                return Ok(Err(MappingAnomaly::CrossStore {
                    ingredient_name: ingredient.ingredient_name.clone(),
                    inventory_item_id: item.id,
                    expected_store_id: store_id,
                    found_store_id: item.store_id,
                }));
            }

            debug!(item = %item.name, factor = %mapping.conversion_factor, "resolved via conversion mapping");
            return Ok(Ok(ResolvedDeduction {
                inventory_item_id: item.id,
                item_name: item.name,
                ingredient_name: ingredient.ingredient_name.clone(),
                quantity,
                confidence: MappingConfidence::Mapped,
            }));
        }

        // 3. Name-match fallback within the store, if enabled.
        if self.fuzzy_enabled {
            let items = inventory_item::Entity::find()
                .filter(inventory_item::Column::StoreId.eq(store_id))
                .filter(inventory_item::Column::IsActive.eq(true))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;

            if let Some(item) = match_by_name(&ingredient.ingredient_name, &items) {
                debug!(item = %item.name, "resolved via name-match fallback");
                return Ok(Ok(ResolvedDeduction {
                    inventory_item_id: item.id,
                    item_name: item.name.clone(),
                    ingredient_name: ingredient.ingredient_name.clone(),
                    quantity: required_quantity,
                    confidence: MappingConfidence::Fuzzy,
                }));
            }
        }

        // 4. Nothing matched: manual intervention required.
        Ok(Err(MappingAnomaly::Unmapped {
            ingredient_name: ingredient.ingredient_name.clone(),
            detail: format!("no mapping or matching inventory item in store {}", store_id),
        }))
    }

    /// Resolve a direct inventory reference (recipe ingredient mapping or a
    /// menu item's direct-sale link), enforcing the store boundary.
    pub async fn resolve_direct_reference(
        &self,
        store_id: Uuid,
        inventory_item_id: Uuid,
        label: &str,
        quantity: Decimal,
    ) -> Result<Result<ResolvedDeduction, MappingAnomaly>, ServiceError> {
        let db = self.db.as_ref();

        let Some(item) = inventory_item::Entity::find_by_id(inventory_item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(Err(MappingAnomaly::Unmapped {
                ingredient_name: label.to_string(),
                detail: format!("direct reference to missing inventory item {}", inventory_item_id),
            }));
        };

        if item.store_id != store_id {
            return Ok(Err(MappingAnomaly::CrossStore {
                ingredient_name: label.to_string(),
                inventory_item_id: item.id,
                expected_store_id: store_id,
                found_store_id: item.store_id,
            }));
        }

        Ok(Ok(ResolvedDeduction {
            inventory_item_id: item.id,
            item_name: item.name,
            ingredient_name: label.to_string(),
            quantity,
            confidence: MappingConfidence::Direct,
        }))
    }
}
