use crate::{
    entities::deduction_audit::AuditStatus,
    errors::ServiceError,
    services::deduction::{DeductionService, SaleInput},
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Aggregate result of a retroactive recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub processed_sales: usize,
    pub failed_sales: usize,
    pub deductions_applied: usize,
    pub deductions_skipped: usize,
    pub errors: Vec<String>,
    pub summary: String,
}

/// Retroactive reprocessing of sales whose deductions were missed.
///
/// Because deduction is idempotent per (sale, item), recovery is plain
/// re-invocation: already-deducted items no-op, missed ones apply.
#[derive(Clone)]
pub struct RecoveryService {
    deduction: Arc<DeductionService>,
}

impl RecoveryService {
    pub fn new(deduction: Arc<DeductionService>) -> Self {
        Self { deduction }
    }

    #[instrument(skip(self, sales), fields(sale_count = sales.len()))]
    pub async fn recover_sales(&self, sales: Vec<SaleInput>) -> Result<RecoveryResult, ServiceError> {
        let mut processed_sales = 0;
        let mut failed_sales = 0;
        let mut deductions_applied = 0;
        let mut deductions_skipped = 0;
        let mut errors = Vec::new();

        for sale in &sales {
            match self.deduction.deduct_for_sale(sale).await {
                Ok(result) => {
                    if result.success {
                        processed_sales += 1;
                    } else {
                        failed_sales += 1;
                        errors.extend(
                            result
                                .errors
                                .iter()
                                .map(|e| format!("sale {}: {}", sale.sale_id, e)),
                        );
                    }
                    for item in &result.items {
                        match item.status {
                            AuditStatus::AlreadyApplied => deductions_skipped += 1,
                            status if status.applied_stock() => deductions_applied += 1,
                            _ => {}
                        }
                    }
                }
                Err(err) => {
                    failed_sales += 1;
                    errors.push(format!("sale {}: {}", sale.sale_id, err));
                }
            }
        }

        let summary = format!(
            "Processed {}/{} sales: {} deductions applied, {} already recorded, {} failures",
            processed_sales,
            sales.len(),
            deductions_applied,
            deductions_skipped,
            failed_sales
        );
        info!(%summary, "recovery run completed");

        Ok(RecoveryResult {
            processed_sales,
            failed_sales,
            deductions_applied,
            deductions_skipped,
            errors,
            summary,
        })
    }
}
