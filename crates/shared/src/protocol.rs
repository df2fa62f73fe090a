use serde::{Deserialize, Serialize};

use crate::domain::ControllerRef;

/// Lifecycle notifications a controller emits from its own node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created,
    Connected,
    Disconnected,
    Render,
}

impl LifecycleEvent {
    pub fn event_name(self) -> &'static str {
        match self {
            LifecycleEvent::Created => "binder:created",
            LifecycleEvent::Connected => "binder:connected",
            LifecycleEvent::Disconnected => "binder:disconnected",
            LifecycleEvent::Render => "binder:render",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleDetail {
    pub from: ControllerRef,
}

impl LifecycleDetail {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
