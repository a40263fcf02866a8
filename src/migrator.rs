use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_inventory_items_table::Migration),
            Box::new(m20240301_000002_create_recipes_table::Migration),
            Box::new(m20240301_000003_create_recipe_ingredients_table::Migration),
            Box::new(m20240301_000004_create_menu_items_table::Migration),
            Box::new(m20240301_000005_create_conversion_mappings_table::Migration),
            Box::new(m20240301_000006_create_deduction_audit_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_inventory_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::StoreId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(ColumnDef::new(InventoryItems::Unit).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::StockQuantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::MinimumThreshold)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_store_active")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::StoreId)
                        .col(InventoryItems::IsActive)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryItems {
        Table,
        Id,
        StoreId,
        Name,
        Unit,
        StockQuantity,
        MinimumThreshold,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_recipes_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_recipes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Recipes::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Recipes::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Recipes::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Recipes::TemplateId).uuid().null())
                        .col(ColumnDef::new(Recipes::Name).string().not_null())
                        .col(
                            ColumnDef::new(Recipes::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_recipes_store_id")
                        .table(Recipes::Table)
                        .col(Recipes::StoreId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Recipes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Recipes {
        Table,
        Id,
        StoreId,
        TemplateId,
        Name,
        IsActive,
    }
}

mod m20240301_000003_create_recipe_ingredients_table {

    use sea_orm_migration::prelude::*;

    use super::m20240301_000002_create_recipes_table::Recipes;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_recipe_ingredients_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RecipeIngredients::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RecipeIngredients::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RecipeIngredients::RecipeId).uuid().not_null())
                        .col(
                            ColumnDef::new(RecipeIngredients::IngredientName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeIngredients::Quantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(RecipeIngredients::Unit).string().not_null())
                        .col(
                            ColumnDef::new(RecipeIngredients::InventoryItemId)
                                .uuid()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_recipe_ingredients_recipe")
                                .from(RecipeIngredients::Table, RecipeIngredients::RecipeId)
                                .to(Recipes::Table, Recipes::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_recipe_ingredients_recipe_id")
                        .table(RecipeIngredients::Table)
                        .col(RecipeIngredients::RecipeId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RecipeIngredients::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum RecipeIngredients {
        Table,
        Id,
        RecipeId,
        IngredientName,
        Quantity,
        Unit,
        InventoryItemId,
    }
}

mod m20240301_000004_create_menu_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_menu_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MenuItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(MenuItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(MenuItems::StoreId).uuid().not_null())
                        .col(ColumnDef::new(MenuItems::Name).string().not_null())
                        .col(
                            ColumnDef::new(MenuItems::Price)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(MenuItems::RecipeId).uuid().null())
                        .col(ColumnDef::new(MenuItems::InventoryItemId).uuid().null())
                        .col(
                            ColumnDef::new(MenuItems::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_menu_items_store_id")
                        .table(MenuItems::Table)
                        .col(MenuItems::StoreId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MenuItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum MenuItems {
        Table,
        Id,
        StoreId,
        Name,
        Price,
        RecipeId,
        InventoryItemId,
        IsActive,
    }
}

mod m20240301_000005_create_conversion_mappings_table {

    use sea_orm_migration::prelude::*;

    use super::m20240301_000001_create_inventory_items_table::InventoryItems;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_conversion_mappings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ConversionMappings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ConversionMappings::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ConversionMappings::StoreId).uuid().not_null())
                        .col(
                            ColumnDef::new(ConversionMappings::IngredientName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConversionMappings::IngredientUnit)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConversionMappings::InventoryItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConversionMappings::ConversionFactor)
                                .decimal_len(16, 6)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConversionMappings::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_conversion_mappings_inventory_item")
                                .from(
                                    ConversionMappings::Table,
                                    ConversionMappings::InventoryItemId,
                                )
                                .to(InventoryItems::Table, InventoryItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // One mapping per ingredient name per store
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_conversion_mappings_store_ingredient")
                        .table(ConversionMappings::Table)
                        .col(ConversionMappings::StoreId)
                        .col(ConversionMappings::IngredientName)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ConversionMappings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ConversionMappings {
        Table,
        Id,
        StoreId,
        IngredientName,
        IngredientUnit,
        InventoryItemId,
        ConversionFactor,
        CreatedAt,
    }
}

mod m20240301_000006_create_deduction_audit_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_deduction_audit_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DeductionAudit::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DeductionAudit::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DeductionAudit::SaleId).uuid().not_null())
                        .col(ColumnDef::new(DeductionAudit::StoreId).uuid().not_null())
                        .col(
                            ColumnDef::new(DeductionAudit::InventoryItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DeductionAudit::Direction).string().not_null())
                        .col(
                            ColumnDef::new(DeductionAudit::QuantityDelta)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DeductionAudit::PreviousStock)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DeductionAudit::NewStock)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DeductionAudit::Status).string().not_null())
                        .col(ColumnDef::new(DeductionAudit::ErrorDetail).string().null())
                        .col(
                            ColumnDef::new(DeductionAudit::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Idempotence key: one deduction and one reversal per sale per item
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_deduction_audit_sale_item_direction")
                        .table(DeductionAudit::Table)
                        .col(DeductionAudit::SaleId)
                        .col(DeductionAudit::InventoryItemId)
                        .col(DeductionAudit::Direction)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_deduction_audit_store_created")
                        .table(DeductionAudit::Table)
                        .col(DeductionAudit::StoreId)
                        .col(DeductionAudit::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DeductionAudit::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum DeductionAudit {
        Table,
        Id,
        SaleId,
        StoreId,
        InventoryItemId,
        Direction,
        QuantityDelta,
        PreviousStock,
        NewStock,
        Status,
        ErrorDetail,
        CreatedAt,
    }
}
