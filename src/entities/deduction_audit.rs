use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one deduction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Succeeded,
    /// Stock was lower than required; the delta actually applied is
    /// `previous_stock - new_stock`, clamped per policy.
    InsufficientStock,
    ItemNotFound,
    Failed,
    /// An audit row for this (sale, item, direction) already existed; the
    /// attempt was a no-op.
    AlreadyApplied,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Succeeded => "succeeded",
            AuditStatus::InsufficientStock => "insufficient_stock",
            AuditStatus::ItemNotFound => "item_not_found",
            AuditStatus::Failed => "failed",
            AuditStatus::AlreadyApplied => "already_applied",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(AuditStatus::Succeeded),
            "insufficient_stock" => Some(AuditStatus::InsufficientStock),
            "item_not_found" => Some(AuditStatus::ItemNotFound),
            "failed" => Some(AuditStatus::Failed),
            "already_applied" => Some(AuditStatus::AlreadyApplied),
            _ => None,
        }
    }

    /// Statuses that actually changed stock and are therefore subject to
    /// reversal on sale cancellation.
    pub fn applied_stock(&self) -> bool {
        matches!(self, AuditStatus::Succeeded | AuditStatus::InsufficientStock)
    }
}

/// Direction of the stock movement recorded by an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Deduct,
    Restore,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deduct => "deduct",
            Direction::Restore => "restore",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deduct" => Some(Direction::Deduct),
            "restore" => Some(Direction::Restore),
            _ => None,
        }
    }
}

/// Append-only log entry for one deduction (or reversal) attempt. Rows are
/// never mutated or deleted; the unique (sale_id, inventory_item_id,
/// direction) index is the idempotence key for the whole subsystem.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deduction_audit")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub inventory_item_id: Uuid,
    pub direction: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_delta: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub previous_stock: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub new_stock: Decimal,
    pub status: String,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn status(&self) -> Option<AuditStatus> {
        AuditStatus::from_str(&self.status)
    }

    pub fn direction(&self) -> Option<Direction> {
        Direction::from_str(&self.direction)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            AuditStatus::Succeeded,
            AuditStatus::InsufficientStock,
            AuditStatus::ItemNotFound,
            AuditStatus::Failed,
            AuditStatus::AlreadyApplied,
        ] {
            assert_eq!(AuditStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AuditStatus::from_str("bogus"), None);
    }

    #[test]
    fn only_applied_statuses_are_reversible() {
        assert!(AuditStatus::Succeeded.applied_stock());
        assert!(AuditStatus::InsufficientStock.applied_stock());
        assert!(!AuditStatus::ItemNotFound.applied_stock());
        assert!(!AuditStatus::Failed.applied_stock());
        assert!(!AuditStatus::AlreadyApplied.applied_stock());
    }
}
