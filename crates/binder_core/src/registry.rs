use std::{
    any::Any,
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use futures::future::BoxFuture;
use shared::domain::NodeId;
use tracing::{debug, info};

use crate::{
    controller::{Behavior, Controller},
    dom::Document,
    runtime::Runtime,
};

pub trait ElementHandle: Send + Sync {
    fn node(&self) -> NodeId;
    fn tag(&self) -> &str;
    fn root(&self) -> NodeId;
    fn attach(&self) -> bool;
    fn connected(&self) -> BoxFuture<'_, ()>;
    fn disconnected(&self);
    fn observes(&self, attribute: &str) -> bool;
    fn attribute_changed(&self, attribute: &str, old: Option<&str>, new: Option<&str>);
    fn as_any(&self) -> &dyn Any;
}

impl<B: Behavior> ElementHandle for Controller<B> {
    fn node(&self) -> NodeId {
        Controller::node(self)
    }

    fn tag(&self) -> &str {
        Controller::tag(self)
    }

    fn root(&self) -> NodeId {
        Controller::root(self)
    }

    fn attach(&self) -> bool {
        Controller::attach(self)
    }

    fn connected(&self) -> BoxFuture<'_, ()> {
        Box::pin(Controller::connected(self))
    }

    fn disconnected(&self) {
        Controller::disconnected(self)
    }

    fn observes(&self, attribute: &str) -> bool {
        Controller::observes(self, attribute)
    }

    fn attribute_changed(&self, attribute: &str, old: Option<&str>, new: Option<&str>) {
        Controller::attribute_changed(self, attribute, old, new)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Upgrades driven from inside the document, e.g. by splicing markup. The
/// registry installs itself on its runtime as the host.
pub trait ElementHost: Send + Sync {
    /// Disconnects and forgets the controllers below `parent`, excluding it.
    fn release_children(&self, parent: NodeId);

    /// Constructs controllers for defined elements among `nodes` and their
    /// descendants without connecting them.
    fn construct(&self, nodes: &[NodeId]) -> Vec<Arc<dyn ElementHandle>>;

    fn connect(&self, pending: Vec<Arc<dyn ElementHandle>>) -> BoxFuture<'_, usize>;
}

type Factory = Arc<dyn Fn(&Runtime, NodeId) -> Arc<dyn ElementHandle> + Send + Sync>;

pub struct ElementRegistry {
    runtime: Runtime,
    definitions: Mutex<HashMap<String, Factory>>,
    instances: Mutex<HashMap<NodeId, Arc<dyn ElementHandle>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ElementRegistry {
    pub fn new(runtime: Runtime) -> Arc<Self> {
        Arc::new_cyclic(|registry: &Weak<Self>| {
            let host: Weak<dyn ElementHost> = registry.clone();
            runtime.install_host(host);
            Self {
                runtime,
                definitions: Mutex::new(HashMap::new()),
                instances: Mutex::new(HashMap::new()),
            }
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn document(&self) -> &Document {
        self.runtime.document()
    }

    /// Associates `tag` with a behavior. Redefining a tag replaces the factory
    /// for nodes upgraded afterwards.
    pub fn define<B, F>(&self, tag: &str, make: F)
    where
        B: Behavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        let tag = tag.to_ascii_lowercase();
        let name = tag.clone();
        let factory: Factory = Arc::new(move |runtime, node| {
            Arc::new(Controller::new(runtime, node, &name, make())) as Arc<dyn ElementHandle>
        });
        if lock(&self.definitions).insert(tag.clone(), factory).is_some() {
            info!(tag, "redefined element");
        }
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        lock(&self.definitions).contains_key(&tag.to_ascii_lowercase())
    }

    pub fn instance(&self, node: NodeId) -> Option<Arc<dyn ElementHandle>> {
        lock(&self.instances).get(&node).cloned()
    }

    pub fn controller<B: Behavior>(&self, node: NodeId) -> Option<Controller<B>> {
        self.instance(node)?
            .as_any()
            .downcast_ref::<Controller<B>>()
            .cloned()
    }

    pub fn instance_count(&self) -> usize {
        lock(&self.instances).len()
    }

    fn scan(&self, root: NodeId) -> Vec<NodeId> {
        let document = self.document();
        let mut out = Vec::new();
        for node in document.descendants(root) {
            out.push(node);
            if let Some(shadow) = document.shadow_root(node) {
                out.extend(self.scan(shadow));
            }
        }
        out
    }

    fn construct_within(&self, root: NodeId) -> Vec<Arc<dyn ElementHandle>> {
        self.construct_nodes(self.scan(root))
    }

    fn construct_nodes(&self, candidates: Vec<NodeId>) -> Vec<Arc<dyn ElementHandle>> {
        let document = self.document();
        let definitions = lock(&self.definitions).clone();
        let mut created = Vec::new();
        for node in candidates {
            let Some(factory) = document.tag_name(node).and_then(|tag| definitions.get(&tag).cloned())
            else {
                continue;
            };
            if lock(&self.instances).contains_key(&node) {
                continue;
            }
            let handle = factory(&self.runtime, node);
            lock(&self.instances).insert(node, Arc::clone(&handle));
            created.push(handle);
        }
        created
    }

    /// Constructs controllers for every defined, not yet upgraded element under
    /// `root`, then connects them in document order. Controllers appearing
    /// inside a freshly attached template are connected right after their
    /// parent. Returns how many controllers connected.
    pub async fn upgrade(&self, root: NodeId) -> usize {
        self.connect_queue(self.construct_within(root)).await
    }

    async fn connect_queue(&self, pending: Vec<Arc<dyn ElementHandle>>) -> usize {
        let mut queue: VecDeque<Arc<dyn ElementHandle>> = pending.into();
        let mut connected = 0;
        while let Some(handle) = queue.pop_front() {
            if !handle.attach() {
                debug!(tag = handle.tag(), node = handle.node().0, "skipping disconnected element");
                continue;
            }
            let mut nested = self.construct_within(handle.node());
            if handle.root() != handle.node() {
                nested.extend(self.construct_within(handle.root()));
            }
            handle.connected().await;
            connected += 1;
            for child in nested.into_iter().rev() {
                queue.push_front(child);
            }
        }
        connected
    }

    pub async fn append(&self, parent: NodeId, child: NodeId) -> usize {
        self.document().append_child(parent, child);
        if self.document().is_connected(child) {
            self.upgrade(parent).await
        } else {
            0
        }
    }

    fn take_within(&self, node: NodeId, inclusive: bool) -> Vec<Arc<dyn ElementHandle>> {
        let document = self.document();
        let mut instances = lock(&self.instances);
        let nodes: Vec<NodeId> = instances
            .keys()
            .copied()
            .filter(|candidate| {
                (inclusive || *candidate != node) && document.contains(node, *candidate)
            })
            .collect();
        let mut taken: Vec<_> = nodes
            .into_iter()
            .filter_map(|candidate| instances.remove(&candidate))
            .collect();
        taken.sort_by_key(|handle| handle.node());
        taken
    }

    /// Detaches `node` and disconnects every controller inside it.
    pub fn remove(&self, node: NodeId) {
        let affected = self.take_within(node, true);
        self.document().remove(node);
        for handle in affected {
            handle.disconnected();
        }
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let old = self.document().set_attribute(node, name, value);
        if let Some(handle) = self.instance(node) {
            if handle.observes(name) {
                handle.attribute_changed(name, old.as_deref(), Some(value));
            }
        }
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        let Some(old) = self.document().remove_attribute(node, name) else {
            return;
        };
        if let Some(handle) = self.instance(node) {
            if handle.observes(name) {
                handle.attribute_changed(name, Some(&old), None);
            }
        }
    }
}

impl ElementHost for ElementRegistry {
    fn release_children(&self, parent: NodeId) {
        for handle in self.take_within(parent, false) {
            handle.disconnected();
        }
    }

    fn construct(&self, nodes: &[NodeId]) -> Vec<Arc<dyn ElementHandle>> {
        let mut candidates = Vec::new();
        for node in nodes {
            candidates.push(*node);
            candidates.extend(self.scan(*node));
        }
        self.construct_nodes(candidates)
    }

    fn connect(&self, pending: Vec<Arc<dyn ElementHandle>>) -> BoxFuture<'_, usize> {
        Box::pin(self.connect_queue(pending))
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
