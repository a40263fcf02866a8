use crate::{
    db::DbPool,
    entities::{conversion_mapping, inventory_item, recipe, recipe_ingredient},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A recipe ingredient whose direct mapping points at another store's stock.
#[derive(Debug, Clone)]
pub struct CrossStoreMapping {
    pub recipe_id: Uuid,
    pub recipe_name: String,
    pub ingredient_name: String,
    pub inventory_item_id: Uuid,
    pub foreign_store_id: Uuid,
}

/// A recipe ingredient with no resolution path at all: no direct reference
/// and no conversion mapping for its store.
#[derive(Debug, Clone)]
pub struct MissingMapping {
    pub recipe_id: Uuid,
    pub recipe_name: String,
    pub ingredient_name: String,
}

#[derive(Debug, Clone)]
pub struct MappingAuditReport {
    pub store_id: Uuid,
    pub cross_store_mappings: Vec<CrossStoreMapping>,
    pub missing_mappings: Vec<MissingMapping>,
}

impl MappingAuditReport {
    pub fn is_valid(&self) -> bool {
        self.cross_store_mappings.is_empty() && self.missing_mappings.is_empty()
    }
}

/// Read-only scan of a store's recipe mappings for the admin dashboard.
///
/// The deduction write path independently refuses cross-store mappings; this
/// scan exists so defects get fixed before they show up as refused
/// deductions.
#[derive(Clone)]
pub struct MappingAuditService {
    db: Arc<DbPool>,
}

impl MappingAuditService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn validate_store_mappings(
        &self,
        store_id: Uuid,
    ) -> Result<MappingAuditReport, ServiceError> {
        let db = self.db.as_ref();

        let recipes = recipe::Entity::find()
            .filter(recipe::Column::StoreId.eq(store_id))
            .filter(recipe::Column::IsActive.eq(true))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let recipe_names: HashMap<Uuid, String> =
            recipes.iter().map(|r| (r.id, r.name.clone())).collect();
        let recipe_ids: Vec<Uuid> = recipes.iter().map(|r| r.id).collect();

        let mut cross_store_mappings = Vec::new();
        let mut missing_mappings = Vec::new();

        if recipe_ids.is_empty() {
            return Ok(MappingAuditReport {
                store_id,
                cross_store_mappings,
                missing_mappings,
            });
        }

        let ingredients = recipe_ingredient::Entity::find()
            .filter(recipe_ingredient::Column::RecipeId.is_in(recipe_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        // Batch-load the referenced items and the store's mapping keys.
        let referenced_ids: Vec<Uuid> = ingredients
            .iter()
            .filter_map(|i| i.inventory_item_id)
            .collect();
        let referenced_items: HashMap<Uuid, inventory_item::Model> = if referenced_ids.is_empty() {
            HashMap::new()
        } else {
            inventory_item::Entity::find()
                .filter(inventory_item::Column::Id.is_in(referenced_ids))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|item| (item.id, item))
                .collect()
        };

        let mapped_names: HashSet<String> = conversion_mapping::Entity::find()
            .filter(conversion_mapping::Column::StoreId.eq(store_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|m| m.ingredient_name)
            .collect();

        for ingredient in &ingredients {
            let recipe_name = recipe_names
                .get(&ingredient.recipe_id)
                .cloned()
                .unwrap_or_default();

            match ingredient.inventory_item_id {
                Some(item_id) => match referenced_items.get(&item_id) {
                    Some(item) if item.store_id != store_id => {
                        cross_store_mappings.push(CrossStoreMapping {
                            recipe_id: ingredient.recipe_id,
                            recipe_name,
                            ingredient_name: ingredient.ingredient_name.clone(),
                            inventory_item_id: item_id,
                            foreign_store_id: item.store_id,
                        });
                    }
                    Some(_) => {}
                    None => {
                        missing_mappings.push(MissingMapping {
                            recipe_id: ingredient.recipe_id,
                            recipe_name,
                            ingredient_name: ingredient.ingredient_name.clone(),
                        });
                    }
                },
                None => {
                    if !mapped_names.contains(&ingredient.ingredient_name) {
                        missing_mappings.push(MissingMapping {
                            recipe_id: ingredient.recipe_id,
                            recipe_name,
                            ingredient_name: ingredient.ingredient_name.clone(),
                        });
                    }
                }
            }
        }

        Ok(MappingAuditReport {
            store_id,
            cross_store_mappings,
            missing_mappings,
        })
    }
}
