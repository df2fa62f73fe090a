use shared::domain::{ListenerId, NodeId};

use crate::dom::Document;

pub const EVENT_PREFIX: char = '@';

/// Behaviour flags suffixed onto an event attribute. Order does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub prevent: bool,
    pub stop: bool,
    pub eval: bool,
    pub render: bool,
}

impl Modifiers {
    pub fn parse<'a>(raw: impl IntoIterator<Item = &'a str>) -> Self {
        let mut modifiers = Self::default();
        for modifier in raw {
            match modifier {
                "prevent" => modifiers.prevent = true,
                "stop" => modifiers.stop = true,
                "eval" => modifiers.eval = true,
                "render" => modifiers.render = true,
                _ => {}
            }
        }
        modifiers
    }
}

/// Splits `@click.stop.prevent` into `("click", modifiers)`.
pub fn parse_event_attribute(name: &str) -> Option<(String, Modifiers)> {
    let rest = name.strip_prefix(EVENT_PREFIX)?;
    let mut parts = rest.split('.');
    let event_type = parts.next().filter(|t| !t.is_empty())?;
    Some((event_type.to_string(), Modifiers::parse(parts)))
}

/// `this.save()` → `save`.
pub fn action_name(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix("this.").unwrap_or(value);
    value.strip_suffix("()").unwrap_or(value).trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRegistration {
    pub node: NodeId,
    pub event_type: String,
    pub modifiers: Modifiers,
    pub(crate) listener: ListenerId,
}

/// How nodes carrying event attributes are found under a query root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventNodeScan {
    Walk,
    Query,
}

impl EventNodeScan {
    pub fn nodes(self, document: &Document, root: NodeId) -> Box<dyn Iterator<Item = NodeId>> {
        match self {
            EventNodeScan::Walk => {
                let scan = document.clone();
                Box::new(document.walk(root).filter(move |node| {
                    scan
                        .attribute_names(*node)
                        .iter()
                        .any(|name| name.starts_with(EVENT_PREFIX))
                }))
            }
            EventNodeScan::Query => Box::new(
                document
                    .elements_with_attribute_prefix(root, "@")
                    .into_iter(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_order_is_irrelevant() {
        let (a_type, a) = parse_event_attribute("@click.stop.prevent").expect("a");
        let (b_type, b) = parse_event_attribute("@click.prevent.stop").expect("b");
        assert_eq!(a_type, b_type);
        assert_eq!(a, b);
        assert!(a.stop && a.prevent && !a.eval && !a.render);
    }

    #[test]
    fn rejects_non_event_attributes() {
        assert!(parse_event_attribute(":bind").is_none());
        assert!(parse_event_attribute("@").is_none());
    }

    #[test]
    fn strips_receiver_and_call_parens() {
        assert_eq!(action_name("this.save()"), "save");
        assert_eq!(action_name("save"), "save");
        assert_eq!(action_name(" render() "), "render");
    }

    #[test]
    fn scan_strategies_agree() {
        let document = Document::parse(
            r#"<div @click="a"><span></span><p @input.stop="b"><i @keyup="c"></i></p></div><b></b>"#,
        )
        .expect("parse");
        let root = document.root();
        let walked: Vec<_> = EventNodeScan::Walk.nodes(&document, root).collect();
        let queried: Vec<_> = EventNodeScan::Query.nodes(&document, root).collect();
        assert_eq!(walked.len(), 3);
        assert_eq!(walked, queried);
    }
}
