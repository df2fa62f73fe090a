mod actions;
mod events;
mod timer;

use std::{
    collections::{btree_map::Entry, BTreeMap},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{ControllerRef, ListenerId, NodeId},
    error::BinderError,
    protocol::{LifecycleDetail, LifecycleEvent},
};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

pub use actions::{ActionFuture, ActionTable};
pub use events::{
    action_name, parse_event_attribute, EventNodeScan, EventRegistration, Modifiers, EVENT_PREFIX,
};
pub use timer::RepeatingTask;

use crate::{
    dom::{Document, Event, Listener},
    evaluator::EvalScope,
    ownership::{self, CONTROLLER_MARKER},
    path::Receiver,
    runtime::Runtime,
    template::{self, RenderMode},
    util::{capitalize, kebab_to_camel, parse_boolean, parse_duration},
};

pub const BIND_MARKER: &str = ":bind";
pub const USE_SHADOW_MARKER: &str = ":use-shadow";

pub type Args = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    One(NodeId),
    Many(Vec<NodeId>),
}

impl Bound {
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Bound::One(node) => vec![*node],
            Bound::Many(nodes) => nodes.clone(),
        }
    }

    fn push(&mut self, node: NodeId) {
        match self {
            Bound::One(first) => {
                let first = *first;
                *self = Bound::Many(vec![first, node]);
            }
            Bound::Many(nodes) => nodes.push(node),
        }
    }
}

pub type Binds = BTreeMap<String, Bound>;

#[async_trait]
pub trait Behavior: Send + Sync + Sized + 'static {
    fn actions() -> &'static ActionTable<Self>;

    /// Extra fields visible to templates under `this`.
    fn expose(&self, _ctl: &Controller<Self>) -> Map<String, Value> {
        Map::new()
    }

    async fn init(&self, _ctl: &Controller<Self>, _args: &Args) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs at the end of every `bind()`.
    fn bound(&self, _ctl: &Controller<Self>) {}

    async fn render(&self, ctl: &Controller<Self>) -> anyhow::Result<()> {
        ctl.render_templates(None);
        Ok(())
    }

    fn disconnected(&self, _ctl: &Controller<Self>) {}
}

struct ControllerState {
    args: Args,
    data: Value,
    binds: Binds,
    events: Vec<EventRegistration>,
    bound: bool,
    attached: bool,
    root: NodeId,
    has_shadow: bool,
    auto_render: Option<RepeatingTask>,
}

struct ControllerInner<B> {
    node: NodeId,
    tag: String,
    runtime: Runtime,
    behavior: B,
    state: Mutex<ControllerState>,
}

pub struct Controller<B: Behavior> {
    inner: Arc<ControllerInner<B>>,
}

impl<B: Behavior> Clone for Controller<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct WeakController<B: Behavior> {
    inner: Weak<ControllerInner<B>>,
}

impl<B: Behavior> Clone for WeakController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<B: Behavior> WeakController<B> {
    pub fn upgrade(&self) -> Option<Controller<B>> {
        self.inner.upgrade().map(|inner| Controller { inner })
    }
}

fn spawn_detached<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => error!("no async runtime available to run event handler"),
    }
}

/// `data-foo-bar` → `setFooBar`.
pub fn setter_name(attribute: &str) -> String {
    let name = attribute.trim_start_matches(':');
    let name = name
        .strip_prefix("data-")
        .or_else(|| name.strip_prefix("aria-"))
        .unwrap_or(name);
    format!("set{}", capitalize(&kebab_to_camel(name)))
}

impl<B: Behavior> Controller<B> {
    pub fn new(runtime: &Runtime, node: NodeId, tag: &str, behavior: B) -> Self {
        runtime.document().set_attribute(node, CONTROLLER_MARKER, tag);
        let ctl = Self {
            inner: Arc::new(ControllerInner {
                node,
                tag: tag.to_string(),
                runtime: runtime.clone(),
                behavior,
                state: Mutex::new(ControllerState {
                    args: Args::new(),
                    data: Value::Object(Map::new()),
                    binds: Binds::new(),
                    events: Vec::new(),
                    bound: false,
                    attached: false,
                    root: node,
                    has_shadow: false,
                    auto_render: None,
                }),
            }),
        };
        ctl.debug("constructing controller");
        ctl.emit_lifecycle(LifecycleEvent::Created);
        ctl
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn document(&self) -> &Document {
        self.inner.runtime.document()
    }

    pub fn behavior(&self) -> &B {
        &self.inner.behavior
    }

    pub fn downgrade(&self) -> WeakController<B> {
        WeakController {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The node binders query from: the controller node or its shadow root.
    pub fn root(&self) -> NodeId {
        self.state().root
    }

    pub fn has_shadow(&self) -> bool {
        self.state().has_shadow
    }

    pub fn is_bound(&self) -> bool {
        self.state().bound
    }

    pub fn args(&self) -> Args {
        self.state().args.clone()
    }

    pub fn arg(&self, name: &str) -> Option<String> {
        self.state().args.get(name).cloned()
    }

    pub fn set_arg(&self, name: &str, value: impl Into<String>) {
        self.state().args.insert(name.to_string(), value.into());
    }

    pub fn data(&self) -> Value {
        self.state().data.clone()
    }

    pub fn set_data(&self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.state().data {
            map.insert(key.to_string(), value);
        }
    }

    pub fn binds(&self) -> Binds {
        self.state().binds.clone()
    }

    pub fn bound_nodes(&self, name: &str) -> Vec<NodeId> {
        self.state()
            .binds
            .get(name)
            .map(Bound::nodes)
            .unwrap_or_default()
    }

    pub fn event_registrations(&self) -> Vec<EventRegistration> {
        self.state().events.clone()
    }

    pub fn belongs_to_controller(&self, node: NodeId) -> bool {
        ownership::belongs_to(self.document(), node, self.node())
    }

    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        map.insert("tag".into(), Value::String(self.tag().to_string()));
        {
            let state = self.state();
            map.insert(
                "args".into(),
                Value::Object(
                    state
                        .args
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
            map.insert("data".into(), state.data.clone());
        }
        map.extend(self.inner.behavior.expose(self));
        Value::Object(map)
    }

    pub fn debug(&self, message: &str) {
        if self.runtime().config().debug.enabled_for(self.tag()) {
            debug!(controller = self.tag(), node = self.node().0, "{message}");
        }
    }

    pub fn emit(&self, name: &str, detail: Value) -> Event {
        self.emit_event(Event::new(name).with_detail(detail))
    }

    pub fn emit_event(&self, event: Event) -> Event {
        self.document().dispatch_event(self.node(), event)
    }

    fn emit_lifecycle(&self, event: LifecycleEvent) {
        let detail = LifecycleDetail {
            from: ControllerRef {
                tag: self.tag().to_string(),
                node: self.node(),
            },
        };
        self.emit(event.event_name(), detail.to_value());
    }

    pub fn listen_for<F>(&self, target: NodeId, name: &str, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.document()
            .add_event_listener(target, name, Arc::new(move |event: &mut Event| callback(event)))
    }

    /// Clones the first owned `<template>` into the node, or into a shadow root
    /// when it carries `:use-shadow`. Runs once and only while connected.
    pub fn attach(&self) -> bool {
        if !self.document().is_connected(self.node()) {
            return false;
        }
        {
            let mut state = self.state();
            if state.attached {
                return true;
            }
            state.attached = true;
        }
        self.handle_template();
        true
    }

    fn handle_template(&self) {
        let document = self.document();
        let template = document
            .query_selector_all(self.node(), "template")
            .unwrap_or_default()
            .into_iter()
            .find(|node| self.belongs_to_controller(*node));
        let Some(template) = template else {
            return;
        };
        let Some(content) = document
            .template_content(template)
            .and_then(|content| document.clone_node(content))
        else {
            return;
        };

        if document.has_attribute(template, USE_SHADOW_MARKER) {
            self.debug("initialising shadow root");
            let shadow = document.attach_shadow(self.node());
            document.move_children(content, shadow);
            let mut state = self.state();
            state.root = shadow;
            state.has_shadow = true;
        } else {
            document.move_children(content, self.node());
        }
    }

    pub async fn connected(&self) {
        if !self.attach() {
            return;
        }

        self.bind();

        let args = self.args();
        let render_on_init = args
            .get("renderOnInit")
            .map_or(true, |raw| parse_boolean(raw));

        if let Err(err) = self.inner.behavior.init(self, &args).await {
            error!(controller = self.tag(), node = self.node().0, error = %err, "controller init failed");
        }

        if let Some(raw) = args.get("autoRender") {
            self.set_auto_render(parse_duration(raw));
        }

        if render_on_init {
            self.render().await;
        }

        self.emit_lifecycle(LifecycleEvent::Connected);
    }

    pub fn disconnected(&self) {
        self.detach_events();
        let timer = self.state().auto_render.take();
        drop(timer);
        self.inner.behavior.disconnected(self);
        self.emit_lifecycle(LifecycleEvent::Disconnected);
    }

    pub fn observes(&self, attribute: &str) -> bool {
        let reactive = (attribute.starts_with("data-") || attribute.starts_with("aria-"))
            && attribute != CONTROLLER_MARKER;
        reactive || B::actions().observes(attribute)
    }

    /// Calls the `set<Name>` setter for `attribute`, if the behavior has one.
    pub fn attribute_changed(&self, attribute: &str, old: Option<&str>, new: Option<&str>) {
        let handler = setter_name(attribute);
        let Some(setter) = B::actions().find_setter(&handler) else {
            return;
        };
        if let Err(err) = setter(self, old, new) {
            warn!(controller = self.tag(), attribute, handler = %handler, error = %err, "attribute setter failed");
        }
    }

    /// Re-scans the owned subtree. Arguments are only read on the first call.
    pub fn bind(&self) {
        let first = !self.state().bound;
        if first {
            self.bind_args();
        }
        self.bind_elements();
        self.bind_events();
        self.state().bound = true;
        self.inner.behavior.bound(self);
    }

    fn bind_args(&self) {
        let args: Args = self
            .document()
            .attributes(self.node())
            .into_iter()
            .map(|(name, value)| (kebab_to_camel(name.trim_start_matches(':')), value))
            .collect();
        self.state().args = args;
    }

    fn bind_elements(&self) {
        let document = self.document();
        let mut binds = Binds::new();
        for node in document.descendants(self.root()) {
            let Some(name) = document.get_attribute(node, BIND_MARKER) else {
                continue;
            };
            if !self.belongs_to_controller(node) {
                continue;
            }
            match binds.entry(name) {
                Entry::Vacant(entry) => {
                    entry.insert(Bound::One(node));
                }
                Entry::Occupied(mut entry) => entry.get_mut().push(node),
            }
        }
        self.state().binds = binds;
    }

    fn detach_events(&self) {
        let registrations = std::mem::take(&mut self.state().events);
        for registration in registrations {
            self.document()
                .remove_event_listener(registration.node, registration.listener);
        }
    }

    fn bind_events(&self) {
        self.detach_events();

        let document = self.document();
        let (root, has_shadow) = {
            let state = self.state();
            (state.root, state.has_shadow)
        };
        let scan = if has_shadow {
            EventNodeScan::Walk
        } else {
            EventNodeScan::Query
        };

        let mut registrations = Vec::new();
        for node in scan.nodes(document, root) {
            if !self.belongs_to_controller(node) {
                continue;
            }
            self.debug(&format!("attaching event listeners to node {}", node.0));
            for (name, value) in document.attributes(node) {
                let Some((event_type, modifiers)) = parse_event_attribute(&name) else {
                    continue;
                };
                let listener = self.event_listener(modifiers, value);
                let id = document.add_event_listener(node, &event_type, listener);
                registrations.push(EventRegistration {
                    node,
                    event_type,
                    modifiers,
                    listener: id,
                });
            }
        }
        self.state().events = registrations;
    }

    fn event_listener(&self, modifiers: Modifiers, value: String) -> Listener {
        let weak = self.downgrade();
        let action = action_name(&value);
        Arc::new(move |event: &mut Event| {
            if modifiers.prevent {
                event.prevent_default();
            }
            if modifiers.stop {
                event.stop_propagation();
            }
            let Some(ctl) = weak.upgrade() else {
                return;
            };

            if modifiers.eval {
                ctl.execute_inline(&value, event);
                if modifiers.render {
                    spawn_detached(async move { ctl.render().await });
                }
                return;
            }

            let action = action.clone();
            let event = event.clone();
            spawn_detached(async move {
                ctl.dispatch_action(&action, event).await;
                if modifiers.render {
                    ctl.render().await;
                }
            });
        })
    }

    fn execute_inline(&self, source: &str, event: &Event) {
        let scope = EvalScope {
            this: self.snapshot(),
            event: Some(event.to_value()),
        };
        if let Err(err) = self.runtime().evaluator().execute(source, &scope) {
            error!(
                controller = self.tag(),
                event = event.event_type(),
                error = %err,
                "inline event handler failed"
            );
        }
    }

    /// Runs a named action. `render` is special-cased and takes no event.
    pub async fn call_action(&self, action: &str, event: Option<Event>) -> anyhow::Result<()> {
        if action == "render" {
            self.render().await;
            return Ok(());
        }
        let handler = B::actions()
            .find_action(action)
            .ok_or_else(|| anyhow!("no action named '{action}'"))?;
        handler(self.clone(), event).await
    }

    async fn dispatch_action(&self, action: &str, event: Event) {
        let event_type = event.event_type().to_string();
        let node = event.current_target();
        if action != "render" && !B::actions().has_action(action) {
            debug!(controller = self.tag(), event = %event_type, action, "no such action");
            return;
        }
        if let Err(err) = self.call_action(action, Some(event)).await {
            let err = BinderError::Dispatch {
                action: action.to_string(),
                event: event_type.clone(),
                tag: self.tag().to_string(),
                message: format!("{err:#}"),
            };
            error!(
                controller = self.tag(),
                node = ?node,
                event = %event_type,
                action,
                "{err}"
            );
        }
    }

    pub async fn render(&self) {
        if let Err(err) = self.inner.behavior.render(self).await {
            error!(controller = self.tag(), node = self.node().0, error = %err, "render failed");
        }
    }

    /// Substitutes every owned `:render`/`:render.eval` node under `root`
    /// (default: the query root), then emits `binder:render`.
    pub fn render_templates(&self, root: Option<NodeId>) {
        let document = self.document();
        let root = root.unwrap_or_else(|| self.root());
        let evaluator = self.runtime().evaluator();
        let host = self.runtime().element_host();
        for node in document.descendants(root) {
            if RenderMode::of(document, node).is_none() || !self.belongs_to_controller(node) {
                continue;
            }
            if let Some(host) = &host {
                host.release_children(node);
            }
            template::render_node(document, node, self, evaluator);
        }
        self.emit_lifecycle(LifecycleEvent::Render);
    }

    /// Re-renders every `interval`, replacing any previous schedule. `None`
    /// is a configuration error and leaves the current schedule untouched.
    pub fn set_auto_render(&self, interval: Option<Duration>) {
        let Some(interval) = interval else {
            let err = BinderError::configuration(
                "set_auto_render",
                self.tag(),
                "undefined interval passed to set_auto_render",
            );
            error!("{err}");
            return;
        };
        let weak = self.downgrade();
        let task = RepeatingTask::spawn(interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(ctl) => {
                        ctl.render().await;
                        true
                    }
                    None => false,
                }
            }
        });
        match task {
            Some(task) => {
                let previous = self.state().auto_render.replace(task);
                drop(previous);
            }
            None => error!(controller = self.tag(), ?interval, "could not schedule auto render"),
        }
    }

    pub fn has_auto_render(&self) -> bool {
        self.state().auto_render.is_some()
    }
}

impl<B: Behavior> Receiver for Controller<B> {
    fn snapshot(&self) -> Value {
        Controller::snapshot(self)
    }

    fn call(&self, name: &str) -> Option<Value> {
        B::actions().find_computed(name).map(|getter| getter(self))
    }
}

#[cfg(test)]
#[path = "../tests/controller_tests.rs"]
mod tests;
