use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted by the deduction subsystem for the surrounding
/// application's dashboards (sync monitor, recovery panel). Consumers that
/// lag never block a sale; the channel send is the only coupling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockDeducted {
        sale_id: Uuid,
        store_id: Uuid,
        inventory_item_id: Uuid,
        quantity: Decimal,
        previous_stock: Decimal,
        new_stock: Decimal,
    },
    InsufficientStock {
        sale_id: Uuid,
        store_id: Uuid,
        inventory_item_id: Uuid,
        required: Decimal,
        available: Decimal,
    },
    CrossStoreMappingDetected {
        store_id: Uuid,
        ingredient_name: String,
        inventory_item_id: Uuid,
        foreign_store_id: Uuid,
    },
    UnmappedIngredient {
        store_id: Uuid,
        ingredient_name: String,
    },
    DeductionFailed {
        sale_id: Uuid,
        store_id: Uuid,
        inventory_item_id: Uuid,
        detail: String,
    },
    SaleRolledBack {
        sale_id: Uuid,
        store_id: Uuid,
        items_restored: usize,
    },
    LowStock {
        store_id: Uuid,
        inventory_item_id: Uuid,
        stock_quantity: Decimal,
        minimum_threshold: Decimal,
    },
    StockReplenished {
        store_id: Uuid,
        inventory_item_id: Uuid,
        quantity: Decimal,
        new_stock: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Processes incoming events. Anomalies that require admin attention are
/// logged at warn/error so they surface in the operational log stream even
/// without a dashboard attached.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockDeducted {
                sale_id,
                inventory_item_id,
                quantity,
                new_stock,
                ..
            } => {
                info!(
                    %sale_id, %inventory_item_id, %quantity, %new_stock,
                    "stock deducted"
                );
            }
            Event::InsufficientStock {
                sale_id,
                inventory_item_id,
                required,
                available,
                ..
            } => {
                warn!(
                    %sale_id, %inventory_item_id, %required, %available,
                    "insufficient stock, clamped per policy"
                );
            }
            Event::CrossStoreMappingDetected {
                store_id,
                ingredient_name,
                inventory_item_id,
                foreign_store_id,
            } => {
                error!(
                    %store_id, %ingredient_name, %inventory_item_id, %foreign_store_id,
                    "cross-store mapping refused"
                );
            }
            Event::UnmappedIngredient {
                store_id,
                ingredient_name,
            } => {
                warn!(%store_id, %ingredient_name, "unmapped ingredient");
            }
            Event::DeductionFailed {
                sale_id,
                inventory_item_id,
                detail,
                ..
            } => {
                error!(%sale_id, %inventory_item_id, %detail, "deduction failed");
            }
            Event::SaleRolledBack {
                sale_id,
                items_restored,
                ..
            } => {
                info!(%sale_id, items_restored, "sale rolled back");
            }
            Event::LowStock {
                store_id,
                inventory_item_id,
                stock_quantity,
                minimum_threshold,
            } => {
                warn!(
                    %store_id, %inventory_item_id, %stock_quantity, %minimum_threshold,
                    "stock at or below minimum threshold"
                );
            }
            Event::StockReplenished {
                inventory_item_id,
                quantity,
                new_stock,
                ..
            } => {
                info!(%inventory_item_id, %quantity, %new_stock, "stock replenished");
            }
        }
    }

    info!("Event processing loop stopped");
}
