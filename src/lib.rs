//! Croffle Inventory Library
//!
//! Recipe-based inventory deduction and reconciliation for a multi-store
//! food retail chain. The transaction-completion flow hands a completed sale
//! to [`DeductionService::deduct_for_sale`]; the service resolves recipes,
//! translates ingredient units into inventory units, applies store-scoped
//! atomic deductions and records an append-only audit trail. All anomalies
//! come back in the structured result — a sale is never blocked by its
//! inventory bookkeeping.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use config::{AppConfig, DeductionConfig};
pub use errors::ServiceError;
pub use events::{Event, EventSender};
pub use services::deduction::{
    AvailabilityReport, DeductionService, InsufficientItem, ItemDeduction, ItemRestore,
    SaleDeductionResult, SaleInput, SaleLineItem, SaleRollbackResult,
};
pub use services::ingredient_mapping::{
    IngredientMapper, MappingAnomaly, MappingConfidence, ResolvedDeduction,
};
pub use services::inventory::{InventoryService, InventoryStatus};
pub use services::mapping_audit::{MappingAuditReport, MappingAuditService};
pub use services::recipe_resolution::{RecipeResolution, RecipeResolver};
pub use services::recovery::{RecoveryResult, RecoveryService};
