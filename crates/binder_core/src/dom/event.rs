use std::sync::Arc;

use serde_json::{json, Value};
use shared::domain::NodeId;

pub type Listener = Arc<dyn Fn(&mut Event) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Event {
    event_type: String,
    target: Option<NodeId>,
    current_target: Option<NodeId>,
    detail: Value,
    bubbles: bool,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            target: None,
            current_target: None,
            detail: Value::Null,
            bubbles: true,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn non_bubbling(mut self) -> Self {
        self.bubbles = false;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn current_target(&self) -> Option<NodeId> {
        self.current_target
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }

    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub(crate) fn set_target(&mut self, target: NodeId) {
        self.target = Some(target);
    }

    pub(crate) fn set_current_target(&mut self, current: Option<NodeId>) {
        self.current_target = current;
    }

    /// JSON view handed to expression evaluators as `e`.
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.event_type,
            "target": self.target.map(|node| node.0),
            "currentTarget": self.current_target.map(|node| node.0),
            "detail": self.detail,
            "defaultPrevented": self.default_prevented,
        })
    }
}

pub(crate) struct ListenerEntry {
    pub(crate) id: shared::domain::ListenerId,
    pub(crate) event_type: String,
    pub(crate) listener: Listener,
}
