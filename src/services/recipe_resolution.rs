use crate::{
    db::DbPool,
    entities::{menu_item, recipe, recipe_ingredient},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Outcome of resolving a sold menu item to its ingredient requirements.
#[derive(Debug, Clone)]
pub enum RecipeResolution {
    /// The menu item has a recipe with at least one ingredient.
    Recipe {
        recipe: recipe::Model,
        ingredients: Vec<recipe_ingredient::Model>,
    },
    /// No recipe indirection: the product deducts one inventory unit per
    /// unit sold against a single inventory item (bottled drinks and the
    /// like).
    DirectItem { inventory_item_id: Uuid },
    /// A recipe exists but has zero ingredients. Almost always a data-entry
    /// defect, so it is surfaced as its own anomaly instead of being treated
    /// as "nothing to deduct".
    EmptyRecipe {
        recipe_id: Uuid,
        recipe_name: String,
    },
    /// Lookup failed (unknown menu item, store mismatch, missing or inactive
    /// recipe). Non-fatal: the caller degrades this to a warning and the
    /// sale proceeds.
    NoRecipe { menu_item_id: Uuid, detail: String },
}

/// Resolves menu items to recipes within one store.
#[derive(Clone)]
pub struct RecipeResolver {
    db: Arc<DbPool>,
}

impl RecipeResolver {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        menu_item_id: Uuid,
        store_id: Uuid,
    ) -> Result<RecipeResolution, ServiceError> {
        let db = self.db.as_ref();

        let Some(item) = menu_item::Entity::find_by_id(menu_item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!("Menu item {} not found", menu_item_id),
            });
        };

        if item.store_id != store_id {
            warn!(
                %menu_item_id, expected_store = %store_id, actual_store = %item.store_id,
                "menu item belongs to another store"
            );
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!(
                    "Menu item '{}' belongs to store {}, not {}",
                    item.name, item.store_id, store_id
                ),
            });
        }

        let Some(recipe_id) = item.recipe_id else {
            if let Some(inventory_item_id) = item.inventory_item_id {
                return Ok(RecipeResolution::DirectItem { inventory_item_id });
            }
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!(
                    "Menu item '{}' has neither a recipe nor a direct inventory link",
                    item.name
                ),
            });
        };

        let Some(recipe) = recipe::Entity::find_by_id(recipe_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!("Recipe {} for menu item '{}' not found", recipe_id, item.name),
            });
        };

        if recipe.store_id != store_id {
            // Recipes are instantiated per store; a menu item pointing at
            // another store's recipe is a deployment defect, degraded to a
            // warning here so the sale is not blocked.
            warn!(
                %recipe_id, expected_store = %store_id, actual_store = %recipe.store_id,
                "recipe belongs to another store"
            );
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!(
                    "Recipe '{}' belongs to store {}, not {}",
                    recipe.name, recipe.store_id, store_id
                ),
            });
        }

        if !recipe.is_active {
            return Ok(RecipeResolution::NoRecipe {
                menu_item_id,
                detail: format!("Recipe '{}' is inactive", recipe.name),
            });
        }

        let ingredients = recipe_ingredient::Entity::find()
            .filter(recipe_ingredient::Column::RecipeId.eq(recipe.id))
            .order_by_asc(recipe_ingredient::Column::IngredientName)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if ingredients.is_empty() {
            return Ok(RecipeResolution::EmptyRecipe {
                recipe_id: recipe.id,
                recipe_name: recipe.name,
            });
        }

        Ok(RecipeResolution::Recipe { recipe, ingredients })
    }
}
