pub mod deduction;
pub mod ingredient_mapping;
pub mod inventory;
pub mod mapping_audit;
pub mod recipe_resolution;
pub mod recovery;
