use serde_json::Value;

/// The object a path starting with `this` walks from.
pub trait Receiver {
    fn snapshot(&self) -> Value;

    /// Invokes a callable property directly under `this`, if one exists.
    fn call(&self, name: &str) -> Option<Value>;
}

/// Splits on `.`, `[` and `]`, dropping empty segments, quotes and call parens.
pub fn segments(expression: &str) -> Vec<String> {
    expression
        .split(['.', '[', ']'])
        .map(|part| part.replace(['"', '\''], "").replace("()", ""))
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Walks `expression` against `receiver`. Anything unresolvable yields `None`.
pub fn resolve(expression: &str, receiver: &dyn Receiver) -> Option<Value> {
    let segments = segments(expression);
    let (first, rest) = segments.split_first()?;
    if first != "this" {
        return None;
    }

    let mut current = receiver.snapshot();
    for (index, segment) in rest.iter().enumerate() {
        let next = match &current {
            Value::Object(map) => map.get(segment).cloned(),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            _ => None,
        };
        current = match next {
            Some(value) => value,
            None if index == 0 && index + 1 == rest.len() => return receiver.call(segment),
            None => return None,
        };
    }
    Some(current)
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}
