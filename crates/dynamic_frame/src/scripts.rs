use binder_core::Document;
use shared::domain::NodeId;

pub trait ScriptHost: Send + Sync {
    /// `scripts` are the script nodes found in freshly spliced content.
    fn execute(&self, document: &Document, frame: NodeId, scripts: &[NodeId]);
}

/// Appends a fresh `<script type="text/javascript">` to the frame for every
/// spliced script, carrying over `src` or the inline source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReinsertScripts;

impl ScriptHost for ReinsertScripts {
    fn execute(&self, document: &Document, frame: NodeId, scripts: &[NodeId]) {
        for script in scripts {
            let fresh = document.create_element("script");
            document.set_attribute(fresh, "type", "text/javascript");
            match document.get_attribute(*script, "src") {
                Some(src) if !src.is_empty() => {
                    document.set_attribute(fresh, "src", &src);
                }
                _ => {
                    let source = document.create_text(&document.inner_html(*script));
                    document.append_child(fresh, source);
                }
            }
            document.append_child(frame, fresh);
        }
    }
}

/// Script elements among `nodes` and their descendants, in document order.
pub fn find_scripts(document: &Document, nodes: &[NodeId]) -> Vec<NodeId> {
    let mut found = Vec::new();
    for node in nodes {
        if document.tag_name(*node).as_deref() == Some("script") {
            found.push(*node);
        }
        found.extend(
            document
                .descendants(*node)
                .into_iter()
                .filter(|child| document.tag_name(*child).as_deref() == Some("script")),
        );
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreates_external_and_inline_scripts() {
        let document = Document::parse(
            r#"<div id="frame"><p><script src="/a.js"></script></p><script>run(1 < 2)</script></div>"#,
        )
        .expect("parse");
        let frame = document
            .query_selector(document.root(), "#frame")
            .expect("selector")
            .expect("frame");
        let spliced = document.children(frame);

        let scripts = find_scripts(&document, &spliced);
        assert_eq!(scripts.len(), 2);

        ReinsertScripts.execute(&document, frame, &scripts);
        let children = document.children(frame);
        let external = children[children.len() - 2];
        let inline = children[children.len() - 1];

        assert_eq!(
            document.get_attribute(external, "src").as_deref(),
            Some("/a.js")
        );
        assert_eq!(
            document.get_attribute(inline, "type").as_deref(),
            Some("text/javascript")
        );
        assert_eq!(document.text_content(inline), "run(1 < 2)");
    }
}
