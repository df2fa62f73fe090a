use shared::domain::NodeId;

use crate::dom::Document;

/// Attribute every controller node carries, valued with its tag.
pub const CONTROLLER_MARKER: &str = "data-controller";

/// Nearest controller that owns `node`. A controller node is owned by the
/// controller above it, never by itself.
pub fn owner_of(document: &Document, node: NodeId) -> Option<NodeId> {
    let start = if document.has_attribute(node, CONTROLLER_MARKER) {
        document.composed_parent(node)?
    } else {
        node
    };
    document.closest_with_attribute(start, CONTROLLER_MARKER)
}

pub fn belongs_to(document: &Document, node: NodeId, controller: NodeId) -> bool {
    owner_of(document, node) == Some(controller)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> (Document, NodeId, NodeId) {
        let document = Document::parse(
            r#"<outer-el data-controller="outer-el"><p id="a"></p><inner-el data-controller="inner-el"><p id="b"></p></inner-el></outer-el>"#,
        )
        .expect("parse");
        let root = document.root();
        let outer = document.query_selector(root, "outer-el").unwrap().unwrap();
        let inner = document.query_selector(root, "inner-el").unwrap().unwrap();
        (document, outer, inner)
    }

    #[test]
    fn nested_controller_internals_belong_to_the_nested_controller() {
        let (document, outer, inner) = nested();
        let root = document.root();
        let a = document.query_selector(root, "#a").unwrap().unwrap();
        let b = document.query_selector(root, "#b").unwrap().unwrap();

        assert!(belongs_to(&document, a, outer));
        assert!(!belongs_to(&document, b, outer));
        assert!(belongs_to(&document, b, inner));
    }

    #[test]
    fn controllers_belong_to_their_parent_controller() {
        let (document, outer, inner) = nested();
        assert!(belongs_to(&document, inner, outer));
        assert!(!belongs_to(&document, inner, inner));
        assert_eq!(owner_of(&document, outer), None);
    }

    #[test]
    fn nodes_without_controller_ancestor_belong_to_nothing() {
        let document = Document::parse("<div><span></span></div>").expect("parse");
        let span = document.query_selector(document.root(), "span").unwrap().unwrap();
        assert_eq!(owner_of(&document, span), None);
    }

    #[test]
    fn shadow_content_belongs_to_its_host() {
        let document = Document::parse(r#"<host-el data-controller="host-el"></host-el>"#)
            .expect("parse");
        let host = document.query_selector(document.root(), "host-el").unwrap().unwrap();
        let shadow = document.attach_shadow(host);
        let button = document.create_element("button");
        document.append_child(shadow, button);
        assert!(belongs_to(&document, button, host));
    }
}
