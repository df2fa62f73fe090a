mod event;
mod html;
mod selector;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{ListenerId, NodeId},
    error::BinderError,
};

pub use event::{Event, Listener};
pub use selector::Selector;

use event::ListenerEntry;

#[derive(Debug, Clone)]
enum NodeContent {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        template_content: Option<NodeId>,
        shadow_root: Option<NodeId>,
    },
    Text(String),
    Fragment {
        host: Option<NodeId>,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    content: NodeContent,
}

pub(crate) struct Tree {
    nodes: Vec<Option<NodeData>>,
    free: Vec<NodeId>,
    listeners: HashMap<NodeId, Vec<ListenerEntry>>,
    next_listener: usize,
    root: NodeId,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            listeners: HashMap::new(),
            next_listener: 0,
            root: NodeId(0),
        };
        tree.root = tree.push(NodeContent::Fragment { host: None });
        tree
    }

    fn push(&mut self, content: NodeContent) -> NodeId {
        let data = NodeData {
            parent: None,
            children: Vec::new(),
            content,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = Some(data);
                id
            }
            None => {
                self.nodes.push(Some(data));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Frees `id` with its subtree, template content and shadow root. The slots
    /// are reused by later nodes and their listeners are dropped.
    fn release(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if id == self.root {
                continue;
            }
            let Some(data) = self.nodes.get_mut(id.0).and_then(Option::take) else {
                continue;
            };
            if let NodeContent::Element {
                template_content,
                shadow_root,
                ..
            } = &data.content
            {
                stack.extend(template_content.iter().chain(shadow_root.iter()).copied());
            }
            stack.extend(data.children);
            self.listeners.remove(&id);
            self.free.push(id);
        }
    }

    pub(crate) fn create_element(&mut self, tag: &str) -> NodeId {
        let tag = tag.to_ascii_lowercase();
        let template_content =
            (tag == "template").then(|| self.push(NodeContent::Fragment { host: None }));
        self.push(NodeContent::Element {
            tag,
            attributes: Vec::new(),
            template_content,
            shadow_root: None,
        })
    }

    pub(crate) fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeContent::Text(text.to_string()))
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.node(child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent == child || self.node(parent).is_none() || self.node(child).is_none() {
            return;
        }
        self.detach(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn clear_children(&mut self, parent: NodeId) {
        let children = self
            .node_mut(parent)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in children {
            self.release(child);
        }
    }

    fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.content {
            NodeContent::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    fn attributes(&self, id: NodeId) -> Option<&[(String, String)]> {
        match &self.node(id)?.content {
            NodeContent::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub(crate) fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Option<String> {
        let Some(NodeContent::Element { attributes, .. }) =
            self.node_mut(id).map(|node| &mut node.content)
        else {
            return None;
        };
        match attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.to_string())),
            None => {
                attributes.push((name.to_string(), value.to_string()));
                None
            }
        }
    }

    fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        match (&node.content, node.parent) {
            (_, Some(parent)) => Some(parent),
            (NodeContent::Fragment { host }, None) => *host,
            _ => None,
        }
    }

    /// Element descendants in document order. Template content and shadow roots
    /// are separate trees and are not entered.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .node(root)
            .map(|node| node.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            if matches!(node.content, NodeContent::Element { .. }) {
                out.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match &node.content {
            NodeContent::Text(text) => out.push_str(text),
            _ => {
                for child in &node.children {
                    self.text_content(*child, out);
                }
            }
        }
    }

    fn clone_subtree(&mut self, id: NodeId) -> Option<NodeId> {
        let source = self.node(id)?.clone();
        let content = match source.content {
            NodeContent::Element {
                tag,
                attributes,
                template_content,
                ..
            } => {
                let template_content = match template_content {
                    Some(content) => self.clone_subtree(content),
                    None => None,
                };
                NodeContent::Element {
                    tag,
                    attributes,
                    template_content,
                    shadow_root: None,
                }
            }
            NodeContent::Text(text) => NodeContent::Text(text),
            NodeContent::Fragment { .. } => NodeContent::Fragment { host: None },
        };
        let copy = self.push(content);
        for child in source.children {
            if let Some(child_copy) = self.clone_subtree(child) {
                self.append_child(copy, child_copy);
            }
        }
        Some(copy)
    }
}

#[derive(Clone)]
pub struct Document {
    tree: Arc<Mutex<Tree>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root())
            .finish_non_exhaustive()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    pub fn parse(html: &str) -> Result<Self, BinderError> {
        let document = Self::new();
        document.set_inner_html(document.root(), html)?;
        Ok(document)
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> NodeId {
        self.tree().root
    }

    pub fn node_count(&self) -> usize {
        self.tree().live_count()
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree().create_element(tag)
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree().create_text(text)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        self.tree().append_child(parent, child);
    }

    /// Detaches `node` from its parent. The node and its subtree stay valid.
    pub fn remove(&self, node: NodeId) {
        self.tree().detach(node);
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree().node(node).and_then(|data| data.parent)
    }

    /// Parent, crossing from a shadow root to its host.
    pub fn composed_parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree().composed_parent(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree()
            .node(node)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.tree().tag(node).map(str::to_string)
    }

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree()
            .attributes(node)?
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.tree()
            .attributes(node)
            .is_some_and(|attrs| attrs.iter().any(|(key, _)| key == name))
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Option<String> {
        self.tree().set_attribute(node, name, value)
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let mut tree = self.tree();
        let Some(NodeContent::Element { attributes, .. }) =
            tree.node_mut(node).map(|data| &mut data.content)
        else {
            return None;
        };
        let index = attributes.iter().position(|(key, _)| key == name)?;
        Some(attributes.remove(index).1)
    }

    pub fn attribute_names(&self, node: NodeId) -> Vec<String> {
        self.attributes(node).into_iter().map(|(key, _)| key).collect()
    }

    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        self.tree()
            .attributes(node)
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree().text_content(node, &mut out);
        out
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        html::serialize_children(&self.tree(), node)
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        html::serialize_node(&self.tree(), node)
    }

    /// Replaces the children of `node` with parsed markup and returns the
    /// inserted top-level nodes. The replaced nodes are freed.
    pub fn set_inner_html(&self, node: NodeId, markup: &str) -> Result<Vec<NodeId>, BinderError> {
        let mut tree = self.tree();
        tree.clear_children(node);
        html::parse_into(&mut tree, node, markup)
    }

    pub fn insert_html_before_end(
        &self,
        node: NodeId,
        markup: &str,
    ) -> Result<Vec<NodeId>, BinderError> {
        html::parse_into(&mut self.tree(), node, markup)
    }

    pub fn template_content(&self, node: NodeId) -> Option<NodeId> {
        match &self.tree().node(node)?.content {
            NodeContent::Element {
                template_content, ..
            } => *template_content,
            _ => None,
        }
    }

    /// Attaches an open shadow root to `host`, reusing an existing one.
    pub fn attach_shadow(&self, host: NodeId) -> NodeId {
        let mut tree = self.tree();
        if let Some(NodeContent::Element {
            shadow_root: Some(existing),
            ..
        }) = tree.node(host).map(|data| &data.content)
        {
            return *existing;
        }
        let shadow = tree.push(NodeContent::Fragment { host: Some(host) });
        if let Some(NodeContent::Element { shadow_root, .. }) =
            tree.node_mut(host).map(|data| &mut data.content)
        {
            *shadow_root = Some(shadow);
        }
        shadow
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        match &self.tree().node(host)?.content {
            NodeContent::Element { shadow_root, .. } => *shadow_root,
            _ => None,
        }
    }

    pub fn clone_node(&self, node: NodeId) -> Option<NodeId> {
        self.tree().clone_subtree(node)
    }

    pub fn move_children(&self, from: NodeId, to: NodeId) {
        let mut tree = self.tree();
        let children = tree
            .node(from)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in children {
            tree.append_child(to, child);
        }
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        let tree = self.tree();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == tree.root {
                return true;
            }
            current = tree.composed_parent(id);
        }
        false
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let tree = self.tree();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = tree.composed_parent(id);
        }
        false
    }

    /// Nearest inclusive ancestor carrying `attribute`, walking composed parents.
    pub fn closest_with_attribute(&self, node: NodeId, attribute: &str) -> Option<NodeId> {
        let tree = self.tree();
        let mut current = Some(node);
        while let Some(id) = current {
            if tree
                .attributes(id)
                .is_some_and(|attrs| attrs.iter().any(|(key, _)| key == attribute))
            {
                return Some(id);
            }
            current = tree.composed_parent(id);
        }
        None
    }

    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        self.tree().descendants(root)
    }

    pub fn walk(&self, root: NodeId) -> Walker {
        Walker {
            document: self.clone(),
            stack: self.children(root).into_iter().rev().collect(),
        }
    }

    pub fn query_selector_all(
        &self,
        root: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>, BinderError> {
        let selector = Selector::parse(selector)?;
        let tree = self.tree();
        Ok(tree
            .descendants(root)
            .into_iter()
            .filter(|id| match (tree.tag(*id), tree.attributes(*id)) {
                (Some(tag), Some(attrs)) => selector.matches(tag, attrs),
                _ => false,
            })
            .collect())
    }

    pub fn query_selector(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>, BinderError> {
        Ok(self.query_selector_all(root, selector)?.into_iter().next())
    }

    pub fn elements_with_attribute_prefix(&self, root: NodeId, prefix: &str) -> Vec<NodeId> {
        let tree = self.tree();
        tree.descendants(root)
            .into_iter()
            .filter(|id| {
                tree.attributes(*id)
                    .is_some_and(|attrs| attrs.iter().any(|(key, _)| key.starts_with(prefix)))
            })
            .collect()
    }

    pub fn add_event_listener(
        &self,
        node: NodeId,
        event_type: &str,
        listener: Listener,
    ) -> ListenerId {
        let mut tree = self.tree();
        let id = ListenerId(tree.next_listener);
        tree.next_listener += 1;
        tree.listeners.entry(node).or_default().push(ListenerEntry {
            id,
            event_type: event_type.to_string(),
            listener,
        });
        id
    }

    pub fn remove_event_listener(&self, node: NodeId, id: ListenerId) -> bool {
        let mut tree = self.tree();
        let Some(entries) = tree.listeners.get_mut(&node) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = before != entries.len();
        if entries.is_empty() {
            tree.listeners.remove(&node);
        }
        removed
    }

    pub fn listener_count(&self, node: NodeId, event_type: &str) -> usize {
        self.tree()
            .listeners
            .get(&node)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.event_type == event_type)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Dispatches `event` at `target`, bubbling along composed parents. Returns
    /// the event as the last listener left it.
    pub fn dispatch_event(&self, target: NodeId, mut event: Event) -> Event {
        event.set_target(target);
        let path = {
            let tree = self.tree();
            let mut path = vec![target];
            let mut current = tree.composed_parent(target);
            while let Some(id) = current {
                path.push(id);
                current = tree.composed_parent(id);
            }
            path
        };

        for node in path {
            let listeners: Vec<Listener> = {
                let tree = self.tree();
                tree.listeners
                    .get(&node)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter(|entry| entry.event_type == event.event_type())
                            .map(|entry| Arc::clone(&entry.listener))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            event.set_current_target(Some(node));
            for listener in listeners {
                listener(&mut event);
            }
            if event.propagation_stopped() || !event.bubbles() {
                break;
            }
        }
        event.set_current_target(None);
        event
    }
}

pub struct Walker {
    document: Document,
    stack: Vec<NodeId>,
}

impl Iterator for Walker {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let id = self.stack.pop()?;
            let tree = self.document.tree();
            let Some(node) = tree.node(id) else { continue };
            if matches!(node.content, NodeContent::Element { .. }) {
                self.stack.extend(node.children.iter().rev().copied());
                return Some(id);
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/dom_tests.rs"]
mod tests;
