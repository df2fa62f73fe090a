use shared::error::BinderError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self, BinderError> {
        let unsupported = || BinderError::UnsupportedSelector(raw.to_string());
        let source = raw.trim();
        if source.is_empty() {
            return Err(unsupported());
        }

        let mut selector = Selector::default();
        let mut chars = source.chars().peekable();

        if let Some(&first) = chars.peek() {
            if first == '*' {
                chars.next();
            } else if !matches!(first, '#' | '.' | '[') {
                let tag = read_ident(&mut chars);
                if tag.is_empty() {
                    return Err(unsupported());
                }
                selector.tag = Some(tag.to_ascii_lowercase());
            }
        }

        while let Some(c) = chars.next() {
            match c {
                '#' => {
                    let id = read_ident(&mut chars);
                    if id.is_empty() {
                        return Err(unsupported());
                    }
                    selector.id = Some(id);
                }
                '.' => {
                    let class = read_ident(&mut chars);
                    if class.is_empty() {
                        return Err(unsupported());
                    }
                    selector.classes.push(class);
                }
                '[' => {
                    let name = read_ident(&mut chars);
                    if name.is_empty() {
                        return Err(unsupported());
                    }
                    match chars.next() {
                        Some(']') => selector.attributes.push((name.to_ascii_lowercase(), None)),
                        Some('=') => {
                            let value = read_attribute_value(&mut chars).ok_or_else(unsupported)?;
                            if chars.next() != Some(']') {
                                return Err(unsupported());
                            }
                            selector
                                .attributes
                                .push((name.to_ascii_lowercase(), Some(value)));
                        }
                        _ => return Err(unsupported()),
                    }
                }
                _ => return Err(unsupported()),
            }
        }

        Ok(selector)
    }

    pub(crate) fn matches(&self, tag: &str, attributes: &[(String, String)]) -> bool {
        let attr = |name: &str| {
            attributes
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        if let Some(expected) = &self.tag {
            if expected != tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_list = attr("class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|class| class_list.split_whitespace().any(|c| c == class))
            {
                return false;
            }
        }
        self.attributes.iter().all(|(name, value)| match (attr(name), value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

fn read_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        match c {
            '\\' => {
                chars.next();
                if let Some(escaped) = chars.next() {
                    ident.push(escaped);
                }
            }
            '#' | '.' | '[' | ']' | '=' | '"' | '\'' | ',' | '>' | '+' | '~' => break,
            c if c.is_whitespace() => break,
            _ => {
                ident.push(c);
                chars.next();
            }
        }
    }
    ident
}

fn read_attribute_value(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    match chars.peek().copied() {
        Some(quote @ ('"' | '\'')) => {
            chars.next();
            let mut value = String::new();
            for c in chars.by_ref() {
                if c == quote {
                    return Some(value);
                }
                value.push(c);
            }
            None
        }
        Some(_) => {
            let value = read_ident(chars);
            (!value.is_empty()).then_some(value)
        }
        None => None,
    }
}
