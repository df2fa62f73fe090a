use shared::domain::NodeId;
use tracing::warn;

use crate::{
    dom::Document,
    evaluator::{EvalScope, ExpressionEvaluator},
    path::{self, Receiver},
};

pub const RENDER_MARKER: &str = ":render";
pub const RENDER_EVAL_MARKER: &str = ":render.eval";
pub const TEMPLATE_CACHE: &str = "_template";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Path,
    Eval,
}

impl RenderMode {
    pub fn of(document: &Document, node: NodeId) -> Option<Self> {
        if document.has_attribute(node, RENDER_EVAL_MARKER) {
            Some(RenderMode::Eval)
        } else if document.has_attribute(node, RENDER_MARKER) {
            Some(RenderMode::Path)
        } else {
            None
        }
    }
}

/// A `{...}` occurrence: byte range of the whole placeholder plus its inner text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    pub start: usize,
    pub end: usize,
    pub expression: &'a str,
}

/// Non-greedy scan: each `{` pairs with the next `}` on the same line.
pub fn placeholders(template: &str) -> Vec<Placeholder<'_>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = template[cursor..].find('{') {
        let open = cursor + offset;
        let Some(close_offset) = template[open + 1..].find(['}', '\n']) else {
            break;
        };
        let close = open + 1 + close_offset;
        if template.as_bytes()[close] == b'\n' {
            cursor = open + 1;
            continue;
        }
        found.push(Placeholder {
            start: open,
            end: close + 1,
            expression: &template[open + 1..close],
        });
        cursor = close + 1;
    }
    found
}

pub fn render_template(
    template: &str,
    mode: RenderMode,
    receiver: &dyn Receiver,
    evaluator: &dyn ExpressionEvaluator,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    let mut scope = None;
    for placeholder in placeholders(template) {
        out.push_str(&template[cursor..placeholder.start]);
        let replacement = match mode {
            RenderMode::Path => path::resolve(placeholder.expression, receiver)
                .map(|value| path::stringify(&value))
                .unwrap_or_default(),
            RenderMode::Eval => {
                let scope = scope.get_or_insert_with(|| EvalScope {
                    this: receiver.snapshot(),
                    event: None,
                });
                match evaluator.evaluate(placeholder.expression, scope) {
                    Ok(value) => path::stringify(&value),
                    Err(err) => {
                        warn!(expression = placeholder.expression, error = %err, "render expression failed");
                        String::new()
                    }
                }
            }
        };
        out.push_str(&replacement);
        cursor = placeholder.end;
    }
    out.push_str(&template[cursor..]);
    out
}

pub fn cached_template(document: &Document, node: NodeId) -> String {
    match document.get_attribute(node, TEMPLATE_CACHE) {
        Some(template) if !template.is_empty() => template,
        _ => {
            let template = document.text_content(node);
            document.set_attribute(node, TEMPLATE_CACHE, &template);
            template
        }
    }
}

pub fn render_node(
    document: &Document,
    node: NodeId,
    receiver: &dyn Receiver,
    evaluator: &dyn ExpressionEvaluator,
) {
    let Some(mode) = RenderMode::of(document, node) else {
        return;
    };
    let template = cached_template(document, node);
    let rendered = render_template(&template, mode, receiver, evaluator);
    if let Err(err) = document.set_inner_html(node, &rendered) {
        warn!(node = node.0, error = %err, "failed to write rendered template");
    }
}

#[cfg(test)]
#[path = "tests/template_tests.rs"]
mod tests;
