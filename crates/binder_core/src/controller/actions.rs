use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;

use super::{Behavior, Controller};
use crate::dom::Event;

pub type ActionFuture = BoxFuture<'static, anyhow::Result<()>>;

type ActionFn<B> = Arc<dyn Fn(Controller<B>, Option<Event>) -> ActionFuture + Send + Sync>;
type SetterFn<B> =
    Arc<dyn Fn(&Controller<B>, Option<&str>, Option<&str>) -> anyhow::Result<()> + Send + Sync>;
type ComputedFn<B> = Arc<dyn Fn(&Controller<B>) -> Value + Send + Sync>;

pub struct ActionTable<B: Behavior> {
    actions: HashMap<String, ActionFn<B>>,
    setters: HashMap<String, SetterFn<B>>,
    computed: HashMap<String, ComputedFn<B>>,
    observed: Vec<String>,
}

impl<B: Behavior> Default for ActionTable<B> {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
            setters: HashMap::new(),
            computed: HashMap::new(),
            observed: Vec::new(),
        }
    }
}

impl<B: Behavior> ActionTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Controller<B>, Option<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.actions.insert(
            name.to_string(),
            Arc::new(move |ctl, event| Box::pin(handler(ctl, event))),
        );
        self
    }

    /// Registers `set<Name>`, called with `(old, new)` when the matching
    /// reactive attribute changes.
    pub fn setter<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&Controller<B>, Option<&str>, Option<&str>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.setters.insert(name.to_string(), Arc::new(handler));
        self
    }

    pub fn computed<F>(mut self, name: &str, getter: F) -> Self
    where
        F: Fn(&Controller<B>) -> Value + Send + Sync + 'static,
    {
        self.computed.insert(name.to_string(), Arc::new(getter));
        self
    }

    /// Marks an attribute outside `data-*`/`aria-*` as reactive.
    pub fn observe(mut self, attribute: &str) -> Self {
        self.observed.push(attribute.to_string());
        self
    }

    pub(crate) fn find_action(&self, name: &str) -> Option<ActionFn<B>> {
        self.actions.get(name).cloned()
    }

    pub(crate) fn find_setter(&self, name: &str) -> Option<SetterFn<B>> {
        self.setters.get(name).cloned()
    }

    pub(crate) fn find_computed(&self, name: &str) -> Option<ComputedFn<B>> {
        self.computed.get(name).cloned()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn observes(&self, attribute: &str) -> bool {
        self.observed.iter().any(|a| a == attribute)
    }
}
