use crate::{
    config::DeductionConfig,
    db::DbPool,
    entities::{
        deduction_audit::{self, AuditStatus, Direction},
        inventory_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        ingredient_mapping::{
            IngredientMapper, MappingAnomaly, MappingConfidence, ResolvedDeduction,
        },
        recipe_resolution::{RecipeResolution, RecipeResolver},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr, TransactionError,
    TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One completed sale, as handed over by the transaction-completion flow.
#[derive(Debug, Clone)]
pub struct SaleInput {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub line_items: Vec<SaleLineItem>,
}

#[derive(Debug, Clone)]
pub struct SaleLineItem {
    pub menu_item_id: Uuid,
    pub quantity: u32,
}

/// Per-ingredient outcome of one sale's deduction.
#[derive(Debug, Clone)]
pub struct ItemDeduction {
    pub inventory_item_id: Uuid,
    pub item_name: String,
    pub ingredient_name: String,
    pub requested_quantity: Decimal,
    pub previous_stock: Decimal,
    pub new_stock: Decimal,
    pub status: AuditStatus,
    pub confidence: MappingConfidence,
}

/// Structured result returned to the transaction-completion flow and shown
/// on the admin dashboards. `success` means "no errors"; the sale itself is
/// never rolled back because of anything in here.
#[derive(Debug, Clone)]
pub struct SaleDeductionResult {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub success: bool,
    pub items: Vec<ItemDeduction>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// One restored item of a cancelled sale.
#[derive(Debug, Clone)]
pub struct ItemRestore {
    pub inventory_item_id: Uuid,
    pub quantity_restored: Decimal,
    pub previous_stock: Decimal,
    pub new_stock: Decimal,
    pub status: AuditStatus,
}

#[derive(Debug, Clone)]
pub struct SaleRollbackResult {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub success: bool,
    pub restored: Vec<ItemRestore>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// An ingredient that would run short if a proposed sale went through.
#[derive(Debug, Clone)]
pub struct InsufficientItem {
    pub item_name: String,
    pub ingredient_name: String,
    pub required: Decimal,
    pub available: Decimal,
    pub unit: String,
}

/// Read-only pre-sale availability check. Mutates nothing.
#[derive(Debug, Clone)]
pub struct AvailabilityReport {
    pub valid: bool,
    pub insufficient: Vec<InsufficientItem>,
    pub warnings: Vec<String>,
}

/// Everything resolution produced for one sale, before execution.
struct SaleResolution {
    resolved: Vec<ResolvedDeduction>,
    anomalies: Vec<MappingAnomaly>,
    empty_recipes: Vec<String>,
    warnings: Vec<String>,
}

/// Internal outcome of one applied (or skipped) deduction attempt.
enum ApplyOutcome {
    Applied {
        previous_stock: Decimal,
        new_stock: Decimal,
        status: AuditStatus,
        minimum_threshold: Option<Decimal>,
    },
    AlreadyApplied {
        previous_stock: Decimal,
        new_stock: Decimal,
    },
    ItemNotFound,
    IntegrityFailed {
        detail: String,
    },
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// The authoritative entry point for recipe-based inventory deduction.
///
/// Ingredients within one sale are deducted sequentially so the audit trail
/// stays deterministic; distinct sales may run concurrently and are kept
/// correct by the conditional decrement inside each per-ingredient
/// transaction.
#[derive(Clone)]
pub struct DeductionService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    config: DeductionConfig,
    resolver: RecipeResolver,
    mapper: IngredientMapper,
}

impl DeductionService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, config: DeductionConfig) -> Self {
        let resolver = RecipeResolver::new(db.clone());
        let mapper = IngredientMapper::new(db.clone(), config.fuzzy_matching_enabled);
        Self {
            db,
            event_sender,
            config,
            resolver,
            mapper,
        }
    }

    /// Applies all inventory deductions for one completed sale.
    ///
    /// Anomalies and per-ingredient failures are collected into the result;
    /// `Err` is reserved for malformed input.
    #[instrument(skip(self, input), fields(sale_id = %input.sale_id, store_id = %input.store_id))]
    pub async fn deduct_for_sale(
        &self,
        input: &SaleInput,
    ) -> Result<SaleDeductionResult, ServiceError> {
        self.validate_input(input)?;

        let resolution = self.resolve_sale(input).await?;

        let mut errors = Vec::new();
        let mut warnings = resolution.warnings;

        for recipe_name in &resolution.empty_recipes {
            errors.push(format!(
                "Empty recipe '{}': no ingredients defined, nothing deducted",
                recipe_name
            ));
        }

        for anomaly in &resolution.anomalies {
            errors.push(anomaly.message());
            self.emit_anomaly_event(input.store_id, anomaly).await;
        }

        let mut items = Vec::with_capacity(resolution.resolved.len());
        for resolved in &resolution.resolved {
            if resolved.confidence == MappingConfidence::Fuzzy {
                warnings.push(format!(
                    "Low-confidence match for '{}' -> '{}'",
                    resolved.ingredient_name, resolved.item_name
                ));
            }

            let item = self
                .apply_deduction(input.sale_id, input.store_id, resolved)
                .await;

            match item.status {
                AuditStatus::Succeeded => {}
                AuditStatus::InsufficientStock => {
                    warnings.push(format!(
                        "Insufficient stock for '{}': required {}, available {}",
                        item.item_name, item.requested_quantity, item.previous_stock
                    ));
                }
                AuditStatus::ItemNotFound => {
                    errors.push(format!(
                        "Inventory item {} for '{}' not found",
                        item.inventory_item_id, item.ingredient_name
                    ));
                }
                AuditStatus::Failed => {
                    errors.push(format!(
                        "Deduction failed for '{}' (inventory item {})",
                        item.ingredient_name, item.inventory_item_id
                    ));
                }
                AuditStatus::AlreadyApplied => {
                    warnings.push(format!(
                        "Deduction for '{}' already recorded for this sale, skipped",
                        item.item_name
                    ));
                }
            }

            items.push(item);
        }

        let success = errors.is_empty();
        info!(
            deducted = items
                .iter()
                .filter(|i| i.status.applied_stock())
                .count(),
            errors = errors.len(),
            warnings = warnings.len(),
            "sale deduction completed"
        );

        Ok(SaleDeductionResult {
            sale_id: input.sale_id,
            store_id: input.store_id,
            success,
            items,
            errors,
            warnings,
        })
    }

    /// Restores stock for a cancelled sale by replaying its applied audit
    /// rows equal-and-opposite. Idempotent: a second rollback is a no-op.
    #[instrument(skip(self))]
    pub async fn rollback_for_sale(
        &self,
        sale_id: Uuid,
        store_id: Uuid,
    ) -> Result<SaleRollbackResult, ServiceError> {
        let db = self.db.as_ref();

        let deductions = deduction_audit::Entity::find()
            .filter(deduction_audit::Column::SaleId.eq(sale_id))
            .filter(deduction_audit::Column::StoreId.eq(store_id))
            .filter(deduction_audit::Column::Direction.eq(Direction::Deduct.as_str()))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut restored = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let applied: Vec<_> = deductions
            .into_iter()
            .filter(|row| row.status().map(|s| s.applied_stock()).unwrap_or(false))
            .collect();

        if applied.is_empty() {
            warnings.push(format!("No applied deductions found for sale {}", sale_id));
        }

        for row in &applied {
            let outcome = self
                .with_retry("rollback", move || self.try_restore(row))
                .await;

            let restore_amount = row.previous_stock - row.new_stock;
            match outcome {
                Ok(ApplyOutcome::Applied {
                    previous_stock,
                    new_stock,
                    ..
                }) => {
                    restored.push(ItemRestore {
                        inventory_item_id: row.inventory_item_id,
                        quantity_restored: restore_amount,
                        previous_stock,
                        new_stock,
                        status: AuditStatus::Succeeded,
                    });
                }
                Ok(ApplyOutcome::AlreadyApplied {
                    previous_stock,
                    new_stock,
                }) => {
                    warnings.push(format!(
                        "Rollback for inventory item {} already recorded, skipped",
                        row.inventory_item_id
                    ));
                    restored.push(ItemRestore {
                        inventory_item_id: row.inventory_item_id,
                        quantity_restored: Decimal::ZERO,
                        previous_stock,
                        new_stock,
                        status: AuditStatus::AlreadyApplied,
                    });
                }
                Ok(ApplyOutcome::ItemNotFound) => {
                    errors.push(format!(
                        "Inventory item {} no longer exists, cannot restore {}",
                        row.inventory_item_id, restore_amount
                    ));
                    restored.push(ItemRestore {
                        inventory_item_id: row.inventory_item_id,
                        quantity_restored: Decimal::ZERO,
                        previous_stock: Decimal::ZERO,
                        new_stock: Decimal::ZERO,
                        status: AuditStatus::ItemNotFound,
                    });
                }
                Ok(ApplyOutcome::IntegrityFailed { detail }) => {
                    self.record_restore_failure(&mut errors, &mut restored, row, detail)
                        .await;
                }
                Err(err) => {
                    self.record_restore_failure(&mut errors, &mut restored, row, err.to_string())
                        .await;
                }
            }
        }

        let items_restored = restored
            .iter()
            .filter(|r| r.status == AuditStatus::Succeeded)
            .count();
        if let Err(e) = self
            .event_sender
            .send(Event::SaleRolledBack {
                sale_id,
                store_id,
                items_restored,
            })
            .await
        {
            warn!(error = %e, "failed to emit rollback event");
        }

        Ok(SaleRollbackResult {
            sale_id,
            store_id,
            success: errors.is_empty(),
            restored,
            errors,
            warnings,
        })
    }

    async fn record_restore_failure(
        &self,
        errors: &mut Vec<String>,
        restored: &mut Vec<ItemRestore>,
        row: &deduction_audit::Model,
        detail: String,
    ) {
        self.record_hard_failure(
            row.sale_id,
            row.store_id,
            row.inventory_item_id,
            Direction::Restore,
            &detail,
        )
        .await;
        errors.push(format!(
            "Failed to restore inventory item {}: {}",
            row.inventory_item_id, detail
        ));
        restored.push(ItemRestore {
            inventory_item_id: row.inventory_item_id,
            quantity_restored: Decimal::ZERO,
            previous_stock: Decimal::ZERO,
            new_stock: Decimal::ZERO,
            status: AuditStatus::Failed,
        });
    }

    /// Read-only availability check for a proposed sale.
    #[instrument(skip(self, input), fields(store_id = %input.store_id))]
    pub async fn validate_for_sale(
        &self,
        input: &SaleInput,
    ) -> Result<AvailabilityReport, ServiceError> {
        self.validate_input(input)?;

        let resolution = self.resolve_sale(input).await?;
        let db = self.db.as_ref();

        let mut warnings = resolution.warnings;
        for recipe_name in &resolution.empty_recipes {
            warnings.push(format!("Empty recipe '{}'", recipe_name));
        }
        for anomaly in &resolution.anomalies {
            warnings.push(anomaly.message());
        }

        let mut insufficient = Vec::new();
        for resolved in &resolution.resolved {
            let Some(item) = inventory_item::Entity::find_by_id(resolved.inventory_item_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
            else {
                warnings.push(format!(
                    "Inventory item {} for '{}' not found",
                    resolved.inventory_item_id, resolved.ingredient_name
                ));
                continue;
            };

            if item.stock_quantity < resolved.quantity {
                insufficient.push(InsufficientItem {
                    item_name: item.name,
                    ingredient_name: resolved.ingredient_name.clone(),
                    required: resolved.quantity,
                    available: item.stock_quantity,
                    unit: item.unit,
                });
            }
        }

        Ok(AvailabilityReport {
            valid: insufficient.is_empty(),
            insufficient,
            warnings,
        })
    }

    fn validate_input(&self, input: &SaleInput) -> Result<(), ServiceError> {
        if input.sale_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "sale_id must not be nil".to_string(),
            ));
        }
        if input.store_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "store_id must not be nil".to_string(),
            ));
        }
        if input.line_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "sale has no line items".to_string(),
            ));
        }
        if input.line_items.iter().any(|li| li.quantity == 0) {
            return Err(ServiceError::ValidationError(
                "line item quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves every line item of the sale into concrete deductions plus
    /// the anomalies found on the way. Mutates nothing.
    async fn resolve_sale(&self, input: &SaleInput) -> Result<SaleResolution, ServiceError> {
        let mut resolved = Vec::new();
        let mut anomalies = Vec::new();
        let mut empty_recipes = Vec::new();
        let mut warnings = Vec::new();

        for line in &input.line_items {
            let sold_quantity = Decimal::from(line.quantity);

            match self.resolver.resolve(line.menu_item_id, input.store_id).await? {
                RecipeResolution::Recipe { ingredients, .. } => {
                    for ingredient in &ingredients {
                        let required = ingredient.quantity * sold_quantity;
                        match self
                            .mapper
                            .resolve(input.store_id, ingredient, required)
                            .await?
                        {
                            Ok(deduction) => resolved.push(deduction),
                            Err(anomaly) => anomalies.push(anomaly),
                        }
                    }
                }
                RecipeResolution::DirectItem { inventory_item_id } => {
                    match self
                        .mapper
                        .resolve_direct_reference(
                            input.store_id,
                            inventory_item_id,
                            "direct sale item",
                            sold_quantity,
                        )
                        .await?
                    {
                        Ok(deduction) => resolved.push(deduction),
                        Err(anomaly) => anomalies.push(anomaly),
                    }
                }
                RecipeResolution::EmptyRecipe { recipe_name, .. } => {
                    empty_recipes.push(recipe_name);
                }
                RecipeResolution::NoRecipe { detail, .. } => {
                    warnings.push(detail);
                }
            }
        }

        Ok(SaleResolution {
            resolved,
            anomalies,
            empty_recipes,
            warnings,
        })
    }

    /// Applies one resolved deduction, retrying transient failures with
    /// bounded exponential backoff, and converts the outcome into the
    /// public per-item result. Emits the matching events.
    async fn apply_deduction(
        &self,
        sale_id: Uuid,
        store_id: Uuid,
        resolved: &ResolvedDeduction,
    ) -> ItemDeduction {
        let outcome = self
            .with_retry("deduction", move || {
                self.try_apply(sale_id, store_id, resolved)
            })
            .await;

        let mut item = ItemDeduction {
            inventory_item_id: resolved.inventory_item_id,
            item_name: resolved.item_name.clone(),
            ingredient_name: resolved.ingredient_name.clone(),
            requested_quantity: resolved.quantity,
            previous_stock: Decimal::ZERO,
            new_stock: Decimal::ZERO,
            status: AuditStatus::Failed,
            confidence: resolved.confidence,
        };

        match outcome {
            Ok(ApplyOutcome::Applied {
                previous_stock,
                new_stock,
                status,
                minimum_threshold,
            }) => {
                item.previous_stock = previous_stock;
                item.new_stock = new_stock;
                item.status = status;

                match status {
                    AuditStatus::InsufficientStock => {
                        self.emit(Event::InsufficientStock {
                            sale_id,
                            store_id,
                            inventory_item_id: resolved.inventory_item_id,
                            required: resolved.quantity,
                            available: previous_stock,
                        })
                        .await;
                    }
                    _ => {
                        self.emit(Event::StockDeducted {
                            sale_id,
                            store_id,
                            inventory_item_id: resolved.inventory_item_id,
                            quantity: resolved.quantity,
                            previous_stock,
                            new_stock,
                        })
                        .await;
                    }
                }

                if let Some(threshold) = minimum_threshold {
                    if new_stock <= threshold {
                        self.emit(Event::LowStock {
                            store_id,
                            inventory_item_id: resolved.inventory_item_id,
                            stock_quantity: new_stock,
                            minimum_threshold: threshold,
                        })
                        .await;
                    }
                }
            }
            Ok(ApplyOutcome::AlreadyApplied {
                previous_stock,
                new_stock,
            }) => {
                item.previous_stock = previous_stock;
                item.new_stock = new_stock;
                item.status = AuditStatus::AlreadyApplied;
            }
            Ok(ApplyOutcome::ItemNotFound) => {
                item.status = AuditStatus::ItemNotFound;
                self.emit(Event::DeductionFailed {
                    sale_id,
                    store_id,
                    inventory_item_id: resolved.inventory_item_id,
                    detail: "inventory item not found".to_string(),
                })
                .await;
            }
            Ok(ApplyOutcome::IntegrityFailed { detail }) => {
                item.status = AuditStatus::Failed;
                self.record_hard_failure(
                    sale_id,
                    store_id,
                    resolved.inventory_item_id,
                    Direction::Deduct,
                    &detail,
                )
                .await;
                self.emit(Event::DeductionFailed {
                    sale_id,
                    store_id,
                    inventory_item_id: resolved.inventory_item_id,
                    detail,
                })
                .await;
            }
            Err(err) => {
                let detail = err.to_string();
                item.status = AuditStatus::Failed;
                self.record_hard_failure(
                    sale_id,
                    store_id,
                    resolved.inventory_item_id,
                    Direction::Deduct,
                    &detail,
                )
                .await;
                self.emit(Event::DeductionFailed {
                    sale_id,
                    store_id,
                    inventory_item_id: resolved.inventory_item_id,
                    detail,
                })
                .await;
            }
        }

        item
    }

    /// One attempt at the atomic deduct-and-audit transaction.
    ///
    /// The stock write is conditional on the observed value, so a concurrent
    /// sale hitting the same row surfaces as `ConcurrentModification` and is
    /// retried instead of silently losing an update. The audit insert rides
    /// in the same transaction: if the idempotence key already exists the
    /// whole attempt rolls back and resolves to a no-op.
    async fn try_apply(
        &self,
        sale_id: Uuid,
        store_id: Uuid,
        resolved: &ResolvedDeduction,
    ) -> Result<ApplyOutcome, ServiceError> {
        let db = self.db.as_ref();
        let inventory_item_id = resolved.inventory_item_id;
        let quantity = resolved.quantity;
        let allow_negative = self.config.allow_negative_stock;

        db.transaction::<_, ApplyOutcome, ServiceError>(move |txn| {
            Box::pin(async move {
                let existing = deduction_audit::Entity::find()
                    .filter(deduction_audit::Column::SaleId.eq(sale_id))
                    .filter(deduction_audit::Column::InventoryItemId.eq(inventory_item_id))
                    .filter(deduction_audit::Column::Direction.eq(Direction::Deduct.as_str()))
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                if let Some(prior) = existing {
                    return Ok(ApplyOutcome::AlreadyApplied {
                        previous_stock: prior.previous_stock,
                        new_stock: prior.new_stock,
                    });
                }

                let Some(item) = inventory_item::Entity::find_by_id(inventory_item_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?
                else {
                    let audit = deduction_audit::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        sale_id: Set(sale_id),
                        store_id: Set(store_id),
                        inventory_item_id: Set(inventory_item_id),
                        direction: Set(Direction::Deduct.as_str().to_string()),
                        quantity_delta: Set(Decimal::ZERO),
                        previous_stock: Set(Decimal::ZERO),
                        new_stock: Set(Decimal::ZERO),
                        status: Set(AuditStatus::ItemNotFound.as_str().to_string()),
                        error_detail: Set(Some(format!(
                            "inventory item {} not found (required {})",
                            inventory_item_id, quantity
                        ))),
                        ..Default::default()
                    };
                    audit.insert(txn).await.map_err(ServiceError::db_error)?;
                    return Ok(ApplyOutcome::ItemNotFound);
                };

                // Resolution already asserted the store scope; re-check at
                // the write boundary so a stale resolution can never mutate
                // another store's stock.
                if item.store_id != store_id {
                    return Ok(ApplyOutcome::IntegrityFailed {
                        detail: format!(
                            "store scope violation: item {} belongs to store {}, not {}",
                            item.id, item.store_id, store_id
                        ),
                    });
                }

                let previous = item.stock_quantity;
                let insufficient = previous < quantity;
                let new_stock = if insufficient && !allow_negative {
                    Decimal::ZERO
                } else {
                    previous - quantity
                };
                let applied_delta = previous - new_stock;

                let update = inventory_item::Entity::update_many()
                    .col_expr(
                        inventory_item::Column::StockQuantity,
                        Expr::value(new_stock),
                    )
                    .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(inventory_item::Column::Id.eq(item.id))
                    .filter(inventory_item::Column::StockQuantity.eq(previous))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                if update.rows_affected == 0 {
                    return Err(ServiceError::ConcurrentModification(item.id));
                }

                let status = if insufficient {
                    AuditStatus::InsufficientStock
                } else {
                    AuditStatus::Succeeded
                };

                let audit = deduction_audit::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    sale_id: Set(sale_id),
                    store_id: Set(store_id),
                    inventory_item_id: Set(inventory_item_id),
                    direction: Set(Direction::Deduct.as_str().to_string()),
                    quantity_delta: Set(-applied_delta),
                    previous_stock: Set(previous),
                    new_stock: Set(new_stock),
                    status: Set(status.as_str().to_string()),
                    error_detail: Set(insufficient.then(|| {
                        format!("required {}, available {}", quantity, previous)
                    })),
                    ..Default::default()
                };

                audit.insert(txn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        // A duplicate writer won the race between our
                        // pre-check and the insert; rolling back turns this
                        // attempt into the mandated no-op.
                        ServiceError::Conflict(format!(
                            "audit row for sale {} item {} already exists",
                            sale_id, inventory_item_id
                        ))
                    } else {
                        ServiceError::db_error(e)
                    }
                })?;

                Ok(ApplyOutcome::Applied {
                    previous_stock: previous,
                    new_stock,
                    status,
                    minimum_threshold: item.minimum_threshold,
                })
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
        .or_else(|err| match err {
            ServiceError::Conflict(_) => Ok(ApplyOutcome::AlreadyApplied {
                previous_stock: Decimal::ZERO,
                new_stock: Decimal::ZERO,
            }),
            other => Err(other),
        })
    }

    /// One attempt at the atomic restore-and-audit transaction for a
    /// cancelled sale. Restores exactly the delta the deduction applied,
    /// which returns stock to its pre-sale value even when the deduction
    /// was clamped.
    async fn try_restore(
        &self,
        deduction_row: &deduction_audit::Model,
    ) -> Result<ApplyOutcome, ServiceError> {
        let db = self.db.as_ref();
        let sale_id = deduction_row.sale_id;
        let store_id = deduction_row.store_id;
        let inventory_item_id = deduction_row.inventory_item_id;
        let restore_amount = deduction_row.previous_stock - deduction_row.new_stock;

        db.transaction::<_, ApplyOutcome, ServiceError>(move |txn| {
            Box::pin(async move {
                let existing = deduction_audit::Entity::find()
                    .filter(deduction_audit::Column::SaleId.eq(sale_id))
                    .filter(deduction_audit::Column::InventoryItemId.eq(inventory_item_id))
                    .filter(deduction_audit::Column::Direction.eq(Direction::Restore.as_str()))
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                if let Some(prior) = existing {
                    return Ok(ApplyOutcome::AlreadyApplied {
                        previous_stock: prior.previous_stock,
                        new_stock: prior.new_stock,
                    });
                }

                let Some(item) = inventory_item::Entity::find_by_id(inventory_item_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?
                else {
                    return Ok(ApplyOutcome::ItemNotFound);
                };

                if item.store_id != store_id {
                    return Ok(ApplyOutcome::IntegrityFailed {
                        detail: format!(
                            "store scope violation: item {} belongs to store {}, not {}",
                            item.id, item.store_id, store_id
                        ),
                    });
                }

                let previous = item.stock_quantity;
                let new_stock = previous + restore_amount;

                let update = inventory_item::Entity::update_many()
                    .col_expr(
                        inventory_item::Column::StockQuantity,
                        Expr::value(new_stock),
                    )
                    .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(inventory_item::Column::Id.eq(item.id))
                    .filter(inventory_item::Column::StockQuantity.eq(previous))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                if update.rows_affected == 0 {
                    return Err(ServiceError::ConcurrentModification(item.id));
                }

                let audit = deduction_audit::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    sale_id: Set(sale_id),
                    store_id: Set(store_id),
                    inventory_item_id: Set(inventory_item_id),
                    direction: Set(Direction::Restore.as_str().to_string()),
                    quantity_delta: Set(restore_amount),
                    previous_stock: Set(previous),
                    new_stock: Set(new_stock),
                    status: Set(AuditStatus::Succeeded.as_str().to_string()),
                    error_detail: Set(None),
                    ..Default::default()
                };

                audit.insert(txn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::Conflict(format!(
                            "restore row for sale {} item {} already exists",
                            sale_id, inventory_item_id
                        ))
                    } else {
                        ServiceError::db_error(e)
                    }
                })?;

                Ok(ApplyOutcome::Applied {
                    previous_stock: previous,
                    new_stock,
                    status: AuditStatus::Succeeded,
                    minimum_threshold: item.minimum_threshold,
                })
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
        .or_else(|err| match err {
            ServiceError::Conflict(_) => Ok(ApplyOutcome::AlreadyApplied {
                previous_stock: Decimal::ZERO,
                new_stock: Decimal::ZERO,
            }),
            other => Err(other),
        })
    }

    /// Bounded exponential backoff around one attempt closure. Only
    /// transient failures (connection errors, lost optimistic races) are
    /// retried; everything else passes straight through.
    async fn with_retry<F, Fut>(&self, label: &str, mut attempt_fn: F) -> Result<ApplyOutcome, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<ApplyOutcome, ServiceError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match attempt_fn().await {
                Err(err) if err.is_transient() && attempt < self.config.max_retry_attempts => {
                    attempt += 1;
                    let delay = Duration::from_millis(
                        self.config
                            .retry_base_delay_ms
                            .saturating_mul(1u64 << (attempt - 1).min(16)),
                    );
                    warn!(
                        %err, attempt, delay_ms = delay.as_millis() as u64, label,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Best-effort FAILED audit entry after retries are exhausted. The
    /// deduction itself did not happen; losing this row too is logged, not
    /// escalated.
    async fn record_hard_failure(
        &self,
        sale_id: Uuid,
        store_id: Uuid,
        inventory_item_id: Uuid,
        direction: Direction,
        detail: &str,
    ) {
        let audit = deduction_audit::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_id: Set(sale_id),
            store_id: Set(store_id),
            inventory_item_id: Set(inventory_item_id),
            direction: Set(direction.as_str().to_string()),
            quantity_delta: Set(Decimal::ZERO),
            previous_stock: Set(Decimal::ZERO),
            new_stock: Set(Decimal::ZERO),
            status: Set(AuditStatus::Failed.as_str().to_string()),
            error_detail: Set(Some(detail.to_string())),
            ..Default::default()
        };

        if let Err(e) = audit.insert(self.db.as_ref()).await {
            warn!(error = %e, %sale_id, %inventory_item_id, "failed to record hard-failure audit entry");
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "failed to emit event");
        }
    }

    async fn emit_anomaly_event(&self, store_id: Uuid, anomaly: &MappingAnomaly) {
        match anomaly {
            MappingAnomaly::CrossStore {
                ingredient_name,
                inventory_item_id,
                found_store_id,
                ..
            } => {
                self.emit(Event::CrossStoreMappingDetected {
                    store_id,
                    ingredient_name: ingredient_name.clone(),
                    inventory_item_id: *inventory_item_id,
                    foreign_store_id: *found_store_id,
                })
                .await;
            }
            MappingAnomaly::Unmapped {
                ingredient_name, ..
            }
            | MappingAnomaly::InvalidConversion {
                ingredient_name, ..
            } => {
                self.emit(Event::UnmappedIngredient {
                    store_id,
                    ingredient_name: ingredient_name.clone(),
                })
                .await;
            }
        }
    }
}
