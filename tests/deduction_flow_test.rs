use assert_matches::assert_matches;
use chrono::Utc;
use croffle_inventory::{
    db::{establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{
        conversion_mapping, deduction_audit,
        deduction_audit::{AuditStatus, Direction},
        inventory_item, menu_item, recipe, recipe_ingredient,
    },
    events::{process_events, EventSender},
    DeductionConfig, DeductionService, InventoryService, MappingAuditService, RecoveryService,
    SaleInput, SaleLineItem, ServiceError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

async fn setup_db() -> Arc<DbPool> {
    // One connection so every query in a test sees the same in-memory
    // database.
    let cfg = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = establish_connection_with_config(&cfg)
        .await
        .expect("Failed to create DB pool");
    run_migrations(&db).await.expect("Failed to run migrations");
    Arc::new(db)
}

fn event_sender() -> EventSender {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(process_events(rx));
    EventSender::new(tx)
}

fn deduction_service(db: &Arc<DbPool>) -> DeductionService {
    DeductionService::new(db.clone(), event_sender(), DeductionConfig::default())
}

async fn create_item(
    db: &DbPool,
    store_id: Uuid,
    name: &str,
    unit: &str,
    stock: Decimal,
    threshold: Option<Decimal>,
) -> inventory_item::Model {
    inventory_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store_id),
        name: Set(name.to_string()),
        unit: Set(unit.to_string()),
        stock_quantity: Set(stock),
        minimum_threshold: Set(threshold),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("Failed to insert inventory item")
}

async fn create_recipe(db: &DbPool, store_id: Uuid, name: &str) -> recipe::Model {
    recipe::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store_id),
        template_id: Set(Some(Uuid::new_v4())),
        name: Set(name.to_string()),
        is_active: Set(true),
    }
    .insert(db)
    .await
    .expect("Failed to insert recipe")
}

async fn add_ingredient(
    db: &DbPool,
    recipe_id: Uuid,
    name: &str,
    quantity: Decimal,
    unit: &str,
    inventory_item_id: Option<Uuid>,
) -> recipe_ingredient::Model {
    recipe_ingredient::ActiveModel {
        id: Set(Uuid::new_v4()),
        recipe_id: Set(recipe_id),
        ingredient_name: Set(name.to_string()),
        quantity: Set(quantity),
        unit: Set(unit.to_string()),
        inventory_item_id: Set(inventory_item_id),
    }
    .insert(db)
    .await
    .expect("Failed to insert recipe ingredient")
}

async fn create_menu_item(
    db: &DbPool,
    store_id: Uuid,
    name: &str,
    recipe_id: Option<Uuid>,
    inventory_item_id: Option<Uuid>,
) -> menu_item::Model {
    menu_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store_id),
        name: Set(name.to_string()),
        price: Set(dec!(125)),
        recipe_id: Set(recipe_id),
        inventory_item_id: Set(inventory_item_id),
        is_active: Set(true),
    }
    .insert(db)
    .await
    .expect("Failed to insert menu item")
}

async fn add_mapping(
    db: &DbPool,
    store_id: Uuid,
    ingredient_name: &str,
    ingredient_unit: &str,
    inventory_item_id: Uuid,
    factor: Decimal,
) -> conversion_mapping::Model {
    conversion_mapping::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store_id),
        ingredient_name: Set(ingredient_name.to_string()),
        ingredient_unit: Set(ingredient_unit.to_string()),
        inventory_item_id: Set(inventory_item_id),
        conversion_factor: Set(factor),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("Failed to insert conversion mapping")
}

async fn get_stock(db: &DbPool, item_id: Uuid) -> Decimal {
    inventory_item::Entity::find_by_id(item_id)
        .one(db)
        .await
        .expect("query failed")
        .expect("item missing")
        .stock_quantity
}

async fn audit_count(db: &DbPool, sale_id: Uuid, direction: Direction) -> u64 {
    deduction_audit::Entity::find()
        .filter(deduction_audit::Column::SaleId.eq(sale_id))
        .filter(deduction_audit::Column::Direction.eq(direction.as_str()))
        .count(db)
        .await
        .expect("count failed")
}

fn sale(store_id: Uuid, menu_item_id: Uuid, quantity: u32) -> SaleInput {
    SaleInput {
        sale_id: Uuid::new_v4(),
        store_id,
        line_items: vec![SaleLineItem {
            menu_item_id,
            quantity,
        }],
    }
}

#[tokio::test]
async fn oreo_conversion_scenario_deducts_one_box() {
    let db = setup_db().await;
    let store_a = Uuid::new_v4();

    let box_item = create_item(&db, store_a, "Oreo Cookies Box", "box", dec!(5), None).await;
    let recipe = create_recipe(&db, store_a, "Croffle Overload").await;
    add_ingredient(&db, recipe.id, "Oreo Cookies", dec!(2), "pieces", None).await;
    add_mapping(&db, store_a, "Oreo Cookies", "pieces", box_item.id, dec!(12)).await;
    let menu = create_menu_item(&db, store_a, "Croffle Overload", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    // 6 units sold -> 12 pieces required -> exactly one box.
    let input = sale(store_a, menu.id, 6);
    let result = service.deduct_for_sale(&input).await.expect("deduct");

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].status, AuditStatus::Succeeded);
    assert_eq!(result.items[0].requested_quantity, dec!(1));
    assert_eq!(result.items[0].previous_stock, dec!(5));
    assert_eq!(result.items[0].new_stock, dec!(4));
    assert_eq!(get_stock(&db, box_item.id).await, dec!(4));

    let audits = deduction_audit::Entity::find()
        .filter(deduction_audit::Column::SaleId.eq(input.sale_id))
        .all(db.as_ref())
        .await
        .expect("audit query");
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].quantity_delta, dec!(-1));
    assert_eq!(audits[0].status().unwrap(), AuditStatus::Succeeded);
}

#[tokio::test]
async fn deduction_is_idempotent_per_sale() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let box_item = create_item(&db, store, "Oreo Cookies Box", "box", dec!(5), None).await;
    let recipe = create_recipe(&db, store, "Croffle Overload").await;
    add_ingredient(&db, recipe.id, "Oreo Cookies", dec!(2), "pieces", None).await;
    add_mapping(&db, store, "Oreo Cookies", "pieces", box_item.id, dec!(12)).await;
    let menu = create_menu_item(&db, store, "Croffle Overload", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let input = sale(store, menu.id, 6);

    let first = service.deduct_for_sale(&input).await.expect("first");
    assert_eq!(first.items[0].status, AuditStatus::Succeeded);

    // Duplicate invocation for the same sale: a no-op, never a second
    // decrement.
    let second = service.deduct_for_sale(&input).await.expect("second");
    assert_eq!(second.items[0].status, AuditStatus::AlreadyApplied);
    assert!(second
        .warnings
        .iter()
        .any(|w| w.contains("already recorded")));

    assert_eq!(get_stock(&db, box_item.id).await, dec!(4));
    assert_eq!(audit_count(&db, input.sale_id, Direction::Deduct).await, 1);
}

#[tokio::test]
async fn insufficient_stock_clamps_at_zero_with_warning() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let syrup = create_item(&db, store, "Caramel Syrup", "ml", dec!(5), None).await;
    let recipe = create_recipe(&db, store, "Caramel Latte").await;
    add_ingredient(&db, recipe.id, "Caramel Syrup", dec!(10), "ml", Some(syrup.id)).await;
    let menu = create_menu_item(&db, store, "Caramel Latte", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 1))
        .await
        .expect("deduct");

    assert!(result.success);
    assert_eq!(result.items[0].status, AuditStatus::InsufficientStock);
    assert_eq!(result.items[0].new_stock, dec!(0));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Insufficient stock")));
    assert_eq!(get_stock(&db, syrup.id).await, dec!(0));
}

#[tokio::test]
async fn allow_negative_policy_lets_stock_go_below_zero() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let syrup = create_item(&db, store, "Caramel Syrup", "ml", dec!(5), None).await;
    let recipe = create_recipe(&db, store, "Caramel Latte").await;
    add_ingredient(&db, recipe.id, "Caramel Syrup", dec!(10), "ml", Some(syrup.id)).await;
    let menu = create_menu_item(&db, store, "Caramel Latte", Some(recipe.id), None).await;

    let config = DeductionConfig {
        allow_negative_stock: true,
        ..Default::default()
    };
    let service = DeductionService::new(db.clone(), event_sender(), config);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 1))
        .await
        .expect("deduct");

    assert_eq!(result.items[0].status, AuditStatus::InsufficientStock);
    assert_eq!(get_stock(&db, syrup.id).await, dec!(-5));
}

#[tokio::test]
async fn cross_store_mapping_is_refused_and_nothing_moves() {
    let db = setup_db().await;
    let store_a = Uuid::new_v4();
    let store_b = Uuid::new_v4();

    // The recipe lives in store A but its ingredient points at store B's
    // stock.
    let foreign_item = create_item(&db, store_b, "Oreo Cookies Box", "box", dec!(5), None).await;
    let recipe = create_recipe(&db, store_a, "Croffle Overload").await;
    add_ingredient(
        &db,
        recipe.id,
        "Oreo Cookies",
        dec!(2),
        "pieces",
        Some(foreign_item.id),
    )
    .await;
    let menu = create_menu_item(&db, store_a, "Croffle Overload", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let input = sale(store_a, menu.id, 6);
    let result = service.deduct_for_sale(&input).await.expect("deduct");

    assert!(!result.success);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("Cross-store mapping")));
    assert!(result.items.is_empty());
    assert_eq!(get_stock(&db, foreign_item.id).await, dec!(5));
    assert_eq!(audit_count(&db, input.sale_id, Direction::Deduct).await, 0);
}

#[tokio::test]
async fn empty_recipe_is_a_distinct_anomaly() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let recipe = create_recipe(&db, store, "Phantom Croffle").await;
    let menu = create_menu_item(&db, store, "Phantom Croffle", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let input = sale(store, menu.id, 1);
    let result = service.deduct_for_sale(&input).await.expect("deduct");

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("Empty recipe")));
    assert!(result.items.is_empty());
    assert_eq!(audit_count(&db, input.sale_id, Direction::Deduct).await, 0);
}

#[tokio::test]
async fn unmapped_ingredient_is_reported_for_manual_intervention() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let recipe = create_recipe(&db, store, "Matcha Croffle").await;
    add_ingredient(&db, recipe.id, "Matcha Powder", dec!(5), "g", None).await;
    let menu = create_menu_item(&db, store, "Matcha Croffle", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 1))
        .await
        .expect("deduct");

    assert!(!result.success);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("Unmapped ingredient 'Matcha Powder'")));
}

#[tokio::test]
async fn name_match_fallback_is_flagged_low_confidence() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let cream = create_item(&db, store, "Whipped Cream", "serving", dec!(20), None).await;
    let recipe = create_recipe(&db, store, "Cream Croffle").await;
    add_ingredient(&db, recipe.id, "whipped cream", dec!(1), "serving", None).await;
    let menu = create_menu_item(&db, store, "Cream Croffle", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 2))
        .await
        .expect("deduct");

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Low-confidence match")));
    assert_eq!(get_stock(&db, cream.id).await, dec!(18));
}

#[tokio::test]
async fn direct_sale_product_deducts_without_recipe() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let bottled = create_item(&db, store, "Bottled Water", "bottle", dec!(24), None).await;
    let menu = create_menu_item(&db, store, "Bottled Water", None, Some(bottled.id)).await;

    let service = deduction_service(&db);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 3))
        .await
        .expect("deduct");

    assert!(result.success);
    assert_eq!(result.items.len(), 1);
    assert_eq!(get_stock(&db, bottled.id).await, dec!(21));
}

#[tokio::test]
async fn product_without_recipe_or_link_degrades_to_warning() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let menu = create_menu_item(&db, store, "Gift Card", None, None).await;

    let service = deduction_service(&db);
    let result = service
        .deduct_for_sale(&sale(store, menu.id, 1))
        .await
        .expect("deduct");

    // The sale is never blocked by a missing recipe.
    assert!(result.success);
    assert!(result.items.is_empty());
    assert!(!result.warnings.is_empty());
}

#[tokio::test]
async fn rollback_returns_stock_to_presale_value() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let box_item = create_item(&db, store, "Oreo Cookies Box", "box", dec!(5), None).await;
    let recipe = create_recipe(&db, store, "Croffle Overload").await;
    add_ingredient(&db, recipe.id, "Oreo Cookies", dec!(2), "pieces", None).await;
    add_mapping(&db, store, "Oreo Cookies", "pieces", box_item.id, dec!(12)).await;
    let menu = create_menu_item(&db, store, "Croffle Overload", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let input = sale(store, menu.id, 6);
    service.deduct_for_sale(&input).await.expect("deduct");
    assert_eq!(get_stock(&db, box_item.id).await, dec!(4));

    let rollback = service
        .rollback_for_sale(input.sale_id, store)
        .await
        .expect("rollback");
    assert!(rollback.success);
    assert_eq!(rollback.restored.len(), 1);
    assert_eq!(rollback.restored[0].quantity_restored, dec!(1));
    assert_eq!(get_stock(&db, box_item.id).await, dec!(5));

    // Rolling back twice is a no-op.
    let again = service
        .rollback_for_sale(input.sale_id, store)
        .await
        .expect("second rollback");
    assert!(again.success);
    assert_eq!(again.restored[0].status, AuditStatus::AlreadyApplied);
    assert_eq!(get_stock(&db, box_item.id).await, dec!(5));
}

#[tokio::test]
async fn clamped_deduction_rolls_back_to_exact_presale_stock() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let syrup = create_item(&db, store, "Caramel Syrup", "ml", dec!(3), None).await;
    let recipe = create_recipe(&db, store, "Caramel Latte").await;
    add_ingredient(&db, recipe.id, "Caramel Syrup", dec!(5), "ml", Some(syrup.id)).await;
    let menu = create_menu_item(&db, store, "Caramel Latte", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let input = sale(store, menu.id, 1);
    let result = service.deduct_for_sale(&input).await.expect("deduct");
    assert_eq!(result.items[0].status, AuditStatus::InsufficientStock);
    assert_eq!(get_stock(&db, syrup.id).await, dec!(0));

    // Only the delta actually applied is restored: back to 3, not 5.
    let rollback = service
        .rollback_for_sale(input.sale_id, store)
        .await
        .expect("rollback");
    assert!(rollback.success);
    assert_eq!(rollback.restored[0].quantity_restored, dec!(3));
    assert_eq!(get_stock(&db, syrup.id).await, dec!(3));
}

#[tokio::test]
async fn recovery_reprocesses_missed_sales_idempotently() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let box_item = create_item(&db, store, "Oreo Cookies Box", "box", dec!(10), None).await;
    let recipe = create_recipe(&db, store, "Croffle Overload").await;
    add_ingredient(&db, recipe.id, "Oreo Cookies", dec!(2), "pieces", None).await;
    add_mapping(&db, store, "Oreo Cookies", "pieces", box_item.id, dec!(12)).await;
    let menu = create_menu_item(&db, store, "Croffle Overload", Some(recipe.id), None).await;

    let service = Arc::new(deduction_service(&db));
    let processed = sale(store, menu.id, 6);
    let missed = sale(store, menu.id, 12);

    service.deduct_for_sale(&processed).await.expect("deduct");
    assert_eq!(get_stock(&db, box_item.id).await, dec!(9));

    let recovery = RecoveryService::new(service.clone());
    let result = recovery
        .recover_sales(vec![processed.clone(), missed.clone()])
        .await
        .expect("recovery");

    assert_eq!(result.processed_sales, 2);
    assert_eq!(result.failed_sales, 0);
    assert_eq!(result.deductions_applied, 1);
    assert_eq!(result.deductions_skipped, 1);
    // 9 - 2 boxes for the missed sale; the already-processed sale no-ops.
    assert_eq!(get_stock(&db, box_item.id).await, dec!(7));
}

#[tokio::test]
async fn mapping_audit_reports_cross_store_and_missing_mappings() {
    let db = setup_db().await;
    let store_a = Uuid::new_v4();
    let store_b = Uuid::new_v4();

    let foreign_item = create_item(&db, store_b, "Oreo Cookies Box", "box", dec!(5), None).await;
    let recipe = create_recipe(&db, store_a, "Croffle Overload").await;
    add_ingredient(
        &db,
        recipe.id,
        "Oreo Cookies",
        dec!(2),
        "pieces",
        Some(foreign_item.id),
    )
    .await;
    add_ingredient(&db, recipe.id, "Matcha Powder", dec!(5), "g", None).await;

    let audit = MappingAuditService::new(db.clone());
    let report = audit
        .validate_store_mappings(store_a)
        .await
        .expect("audit scan");

    assert!(!report.is_valid());
    assert_eq!(report.cross_store_mappings.len(), 1);
    assert_eq!(report.cross_store_mappings[0].foreign_store_id, store_b);
    assert_eq!(report.missing_mappings.len(), 1);
    assert_eq!(report.missing_mappings[0].ingredient_name, "Matcha Powder");
}

#[tokio::test]
async fn store_status_reports_items_at_or_below_threshold() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    create_item(&db, store, "Oreo Cookies Box", "box", dec!(10), Some(dec!(3))).await;
    let low = create_item(&db, store, "Caramel Syrup", "ml", dec!(2), Some(dec!(5))).await;
    create_item(&db, store, "Whipped Cream", "serving", dec!(7), None).await;

    let inventory = InventoryService::new(db.clone(), event_sender());
    let status = inventory.store_status(store).await.expect("status");

    assert_eq!(status.total_items, 3);
    assert_eq!(status.low_stock_items.len(), 1);
    assert_eq!(status.low_stock_items[0].id, low.id);
}

#[tokio::test]
async fn receive_stock_replenishes_and_guards_store_scope() {
    let db = setup_db().await;
    let store = Uuid::new_v4();
    let other_store = Uuid::new_v4();

    let item = create_item(&db, store, "Croffle Dough", "kg", dec!(4), None).await;

    let inventory = InventoryService::new(db.clone(), event_sender());
    let updated = inventory
        .receive_stock(store, item.id, dec!(6))
        .await
        .expect("replenish");
    assert_eq!(updated.stock_quantity, dec!(10));
    assert_eq!(get_stock(&db, item.id).await, dec!(10));

    let err = inventory
        .receive_stock(other_store, item.id, dec!(1))
        .await
        .expect_err("wrong store must be refused");
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
    assert_eq!(get_stock(&db, item.id).await, dec!(10));
}

#[tokio::test]
async fn validate_for_sale_reports_shortage_without_mutating() {
    let db = setup_db().await;
    let store = Uuid::new_v4();

    let syrup = create_item(&db, store, "Caramel Syrup", "ml", dec!(5), None).await;
    let recipe = create_recipe(&db, store, "Caramel Latte").await;
    add_ingredient(&db, recipe.id, "Caramel Syrup", dec!(10), "ml", Some(syrup.id)).await;
    let menu = create_menu_item(&db, store, "Caramel Latte", Some(recipe.id), None).await;

    let service = deduction_service(&db);
    let report = service
        .validate_for_sale(&sale(store, menu.id, 1))
        .await
        .expect("validate");

    assert!(!report.valid);
    assert_eq!(report.insufficient.len(), 1);
    assert_eq!(report.insufficient[0].required, dec!(10));
    assert_eq!(report.insufficient[0].available, dec!(5));
    assert_eq!(get_stock(&db, syrup.id).await, dec!(5));
}

#[tokio::test]
async fn malformed_input_is_rejected_up_front() {
    let db = setup_db().await;
    let service = deduction_service(&db);

    let empty = SaleInput {
        sale_id: Uuid::new_v4(),
        store_id: Uuid::new_v4(),
        line_items: vec![],
    };
    assert_matches!(
        service.deduct_for_sale(&empty).await,
        Err(ServiceError::ValidationError(_))
    );

    let zero_quantity = SaleInput {
        sale_id: Uuid::new_v4(),
        store_id: Uuid::new_v4(),
        line_items: vec![SaleLineItem {
            menu_item_id: Uuid::new_v4(),
            quantity: 0,
        }],
    };
    assert_matches!(
        service.deduct_for_sale(&zero_quantity).await,
        Err(ServiceError::ValidationError(_))
    );
}
