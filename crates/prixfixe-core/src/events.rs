//! Domain events published by the engine.
//!
//! Delivery is best effort: publishing never fails the caller, and a bus
//! with no subscribers simply drops events after logging them.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use prixfixe_db::models::MealPlanStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    PlanFinalized {
        plan_id: String,
        outcome: MealPlanStatus,
    },
    PlanFinalizationFailed {
        plan_id: String,
        reason: String,
    },
    TasksCreated {
        plan_id: String,
        count: usize,
    },
    GroceryInitialized {
        plan_id: String,
        count: usize,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlanFinalized { .. } => "plan_finalized",
            Self::PlanFinalizationFailed { .. } => "plan_finalization_failed",
            Self::TasksCreated { .. } => "tasks_created",
            Self::GroceryInitialized { .. } => "grocery_initialized",
        }
    }

    pub fn plan_id(&self) -> &str {
        match self {
            Self::PlanFinalized { plan_id, .. }
            | Self::PlanFinalizationFailed { plan_id, .. }
            | Self::TasksCreated { plan_id, .. }
            | Self::GroceryInitialized { plan_id, .. } => plan_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DomainEvent) {
        info!(event = event.name(), plan_id = event.plan_id(), "domain event");
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }
}
