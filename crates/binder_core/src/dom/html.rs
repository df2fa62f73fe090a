use html5gum::{HtmlString, Token, Tokenizer};
use shared::{domain::NodeId, error::BinderError};
use tracing::trace;

use super::{NodeContent, Tree};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn utf8(s: HtmlString) -> Result<String, BinderError> {
    String::from_utf8(s.0).map_err(|err| BinderError::HtmlParse(err.to_string()))
}

struct OpenElement {
    tag: String,
    insertion_point: NodeId,
}

/// Parses `markup` and appends the resulting nodes under `parent`. Unbalanced
/// end tags are ignored and unclosed elements are closed at the end of input.
pub(super) fn parse_into(
    tree: &mut Tree,
    parent: NodeId,
    markup: &str,
) -> Result<Vec<NodeId>, BinderError> {
    let mut inserted = Vec::new();
    let mut open: Vec<OpenElement> = Vec::new();

    for token in Tokenizer::new(markup).infallible() {
        let insertion_point = open.last().map_or(parent, |frame| frame.insertion_point);
        match token {
            Token::StartTag(start) => {
                let tag = utf8(start.name)?.to_ascii_lowercase();
                let element = tree.create_element(&tag);
                for (name, value) in start.attributes {
                    tree.set_attribute(element, &utf8(name)?, &utf8(value)?);
                }
                tree.append_child(insertion_point, element);
                if insertion_point == parent {
                    inserted.push(element);
                }
                if !start.self_closing && !is_void(&tag) {
                    let insertion_point = match &tree.node(element).map(|n| &n.content) {
                        Some(NodeContent::Element {
                            template_content: Some(content),
                            ..
                        }) => *content,
                        _ => element,
                    };
                    open.push(OpenElement {
                        tag,
                        insertion_point,
                    });
                }
            }
            Token::EndTag(end) => {
                let tag = utf8(end.name)?.to_ascii_lowercase();
                if let Some(index) = open.iter().rposition(|frame| frame.tag == tag) {
                    open.truncate(index);
                }
            }
            Token::String(text) => {
                let text = utf8(text)?;
                let last_child = tree
                    .node(insertion_point)
                    .and_then(|node| node.children.last().copied());
                let merged = match last_child {
                    Some(id) => match tree.node_mut(id).map(|node| &mut node.content) {
                        Some(NodeContent::Text(existing)) => {
                            existing.push_str(&text);
                            true
                        }
                        _ => false,
                    },
                    None => false,
                };
                if !merged {
                    let text_node = tree.create_text(&text);
                    tree.append_child(insertion_point, text_node);
                    if insertion_point == parent {
                        inserted.push(text_node);
                    }
                }
            }
            Token::Error(err) => trace!(error = %err, "lenient html parse"),
            _ => {}
        }
    }

    Ok(inserted)
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

pub(super) fn serialize_children(tree: &Tree, node: NodeId) -> String {
    let mut out = String::new();
    let raw = tree
        .tag(node)
        .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
    let children = match tree.node(node).map(|n| &n.content) {
        Some(NodeContent::Element {
            template_content: Some(content),
            ..
        }) => tree.node(*content).map(|n| n.children.clone()),
        _ => tree.node(node).map(|n| n.children.clone()),
    }
    .unwrap_or_default();
    for child in children {
        write_node(tree, child, raw, &mut out);
    }
    out
}

pub(super) fn serialize_node(tree: &Tree, node: NodeId) -> String {
    let mut out = String::new();
    write_node(tree, node, false, &mut out);
    out
}

fn write_node(tree: &Tree, node: NodeId, raw_text: bool, out: &mut String) {
    let Some(data) = tree.node(node) else { return };
    match &data.content {
        NodeContent::Text(text) if raw_text => out.push_str(text),
        NodeContent::Text(text) => escape_text(text, out),
        NodeContent::Fragment { .. } => out.push_str(&serialize_children(tree, node)),
        NodeContent::Element {
            tag, attributes, ..
        } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_attribute(value, out);
                out.push('"');
            }
            out.push('>');
            if is_void(tag) {
                return;
            }
            out.push_str(&serialize_children(tree, node));
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}
