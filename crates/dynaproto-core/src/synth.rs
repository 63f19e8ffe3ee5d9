//! Default value synthesis.
//!
//! Produces a complete canonical value for a message: every field present,
//! holding its type's zero value. Recursive schemas terminate by tracking
//! the message names already open on the current branch; a message that
//! reappears on its own branch synthesizes as an empty object.

use crate::introspect::{self, Element, FieldView};
use crate::registry::{MessageDecl, Registry, ScalarKind};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Message names open on the current branch, innermost first.
///
/// Each level borrows its parent, so sibling branches never see each
/// other's entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Visited<'a> {
    head: Option<(&'a str, &'a Visited<'a>)>,
}

impl<'a> Visited<'a> {
    /// The empty set
    pub fn root() -> Self {
        Self { head: None }
    }

    /// This set plus `name`
    pub fn with(&'a self, name: &'a str) -> Visited<'a> {
        Visited {
            head: Some((name, self)),
        }
    }

    /// Whether `name` is open on this branch
    pub fn contains(&self, name: &str) -> bool {
        let mut current = self;
        while let Some((entry, parent)) = current.head {
            if entry == name {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Number of open messages
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some((_, parent)) = current.head {
            depth += 1;
            current = parent;
        }
        depth
    }
}

/// Synthesizes the default value of `message`.
pub fn default_message(registry: &Registry, message: &MessageDecl) -> Value {
    synthesize_message(registry, message, &Visited::root())
}

/// Synthesizes `message` as seen from a branch that already has
/// `visited` open.
pub fn synthesize_message(registry: &Registry, message: &MessageDecl, visited: &Visited<'_>) -> Value {
    if visited.contains(&message.full_name) {
        return Value::Object(Map::new());
    }
    let visited = visited.with(&message.full_name);

    let mut filled_oneofs = HashSet::new();
    let mut object = Map::new();
    for view in introspect::fields(registry, message) {
        let value = match view.oneof_index {
            // Only the first member of a oneof carries a value.
            Some(index) if !filled_oneofs.insert(index) => Value::Null,
            _ => synthesize_field(registry, &view, &visited),
        };
        object.insert(view.name, value);
    }
    Value::Object(object)
}

/// Synthesizes the value of one field.
pub fn synthesize_field(registry: &Registry, field: &FieldView, visited: &Visited<'_>) -> Value {
    if let Some(map) = &field.map {
        let mut entries = Map::new();
        entries.insert(
            zero_key(map.key),
            synthesize_element(registry, &field.element, visited),
        );
        return Value::Object(entries);
    }

    let element = synthesize_element(registry, &field.element, visited);
    if field.repeated {
        Value::Array(vec![element])
    } else {
        element
    }
}

fn synthesize_element(registry: &Registry, element: &Element, visited: &Visited<'_>) -> Value {
    match element {
        Element::Scalar(kind) => zero_scalar(*kind),
        Element::Enum(name) => {
            Value::from(registry.enum_decl(name).map(|e| e.default_number()).unwrap_or(0))
        }
        Element::Message(name) => match registry.message(name) {
            Some(message) => synthesize_message(registry, message, visited),
            None => Value::Object(Map::new()),
        },
        Element::Unresolved(_) => Value::Null,
    }
}

fn zero_scalar(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::String | ScalarKind::Bytes => Value::String(String::new()),
        ScalarKind::Bool => Value::Bool(false),
        _ => Value::from(0),
    }
}

fn zero_key(kind: ScalarKind) -> String {
    match kind {
        ScalarKind::String => String::new(),
        ScalarKind::Bool => "false".to_string(),
        _ => "0".to_string(),
    }
}
