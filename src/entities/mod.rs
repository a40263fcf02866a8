pub mod conversion_mapping;
pub mod deduction_audit;
pub mod inventory_item;
pub mod menu_item;
pub mod recipe;
pub mod recipe_ingredient;
