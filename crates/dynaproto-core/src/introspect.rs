//! Field introspection.
//!
//! Flattens a message's fields into [`FieldView`]s for form builders and
//! other presentation layers. Views carry fully-qualified names for nested
//! messages rather than expanded copies, so a caller can drill into a
//! recursive schema one level at a time.

use crate::registry::{
    Cardinality, EnumValue, FieldDecl, MessageDecl, Registry, ScalarKind, TypeRef,
};
use serde::Serialize;

/// Coarse value class of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldClass {
    /// A scalar value
    Scalar,
    /// An enum symbol
    Enum,
    /// A nested message
    Message,
    /// A `map<K, V>`
    Map,
}

/// What a single value of a field is, after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// A scalar
    Scalar(ScalarKind),
    /// An enum, by fully-qualified name
    Enum(String),
    /// A message, by fully-qualified name
    Message(String),
    /// A name that did not resolve, as written
    Unresolved(String),
}

impl Element {
    /// Reads the element type of a declared type
    pub fn of(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Scalar(kind) => Element::Scalar(*kind),
            _ => match (ty.message_name(), ty.enum_name()) {
                (Some(name), _) => Element::Message(name.to_string()),
                (_, Some(name)) => Element::Enum(name.to_string()),
                _ => Element::Unresolved(ty.token().to_string()),
            },
        }
    }

    fn class(&self) -> FieldClass {
        match self {
            Element::Enum(_) => FieldClass::Enum,
            Element::Message(_) => FieldClass::Message,
            Element::Scalar(_) | Element::Unresolved(_) => FieldClass::Scalar,
        }
    }

    fn display_name(&self) -> String {
        match self {
            Element::Scalar(kind) => kind.keyword().to_string(),
            Element::Enum(name) | Element::Message(name) => {
                crate::registry::short_name(name).to_string()
            }
            Element::Unresolved(token) => token.clone(),
        }
    }

    fn full_name(&self) -> Option<String> {
        match self {
            Element::Enum(name) | Element::Message(name) => Some(name.clone()),
            _ => None,
        }
    }
}

/// Key and value of a map field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    /// Key scalar
    pub key: ScalarKind,
    /// Value class, never `Map`
    pub value_class: FieldClass,
    /// Value display name
    pub value_type_name: String,
    /// Fully-qualified value type for enum and message values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_full_type_name: Option<String>,
    /// Symbols when the value is an enum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_enum_values: Option<Vec<EnumValue>>,
}

/// Presentation of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    /// Name as declared
    pub name: String,
    /// lowerCamelCase name
    pub json_name: String,
    /// Field number
    pub number: u32,
    /// Human-readable type: a scalar keyword, a short type name, or
    /// `map<K, V>`
    pub type_name: String,
    /// Fully-qualified enum or message name (the value type for maps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_type_name: Option<String>,
    /// Value class
    pub class: FieldClass,
    /// Declared cardinality
    pub cardinality: Cardinality,
    /// Repeated (never true for maps)
    pub repeated: bool,
    /// Carries explicit presence
    pub optional: bool,
    /// Name of the enclosing oneof
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oneof: Option<String>,
    /// `[deprecated = true]`
    pub deprecated: bool,
    /// The declared type never resolved
    pub unresolved: bool,
    /// Symbols when the field is an enum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<EnumValue>>,
    /// Key and value details for maps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<MapView>,
    /// Element type, the value type for maps
    #[serde(skip)]
    pub element: Element,
    /// Index of the enclosing oneof
    #[serde(skip)]
    pub oneof_index: Option<usize>,
}

impl FieldView {
    /// Fully-qualified name of the message to expand next, if any
    pub fn message_type(&self) -> Option<&str> {
        match &self.element {
            Element::Message(name) => Some(name),
            _ => None,
        }
    }
}

/// Views of every field of `message`, in declaration order.
pub fn fields(registry: &Registry, message: &MessageDecl) -> Vec<FieldView> {
    message
        .fields
        .iter()
        .map(|field| field_view(registry, message, field))
        .collect()
}

/// View of one field of `message`.
pub fn field_view(registry: &Registry, message: &MessageDecl, field: &FieldDecl) -> FieldView {
    let element = Element::of(&field.ty);
    let enum_values = enum_values(registry, &element);

    let (class, type_name, map) = match field.map_key {
        Some(key) => {
            let value_type_name = element.display_name();
            let map = MapView {
                key,
                value_class: element.class(),
                value_type_name: value_type_name.clone(),
                value_full_type_name: element.full_name(),
                value_enum_values: enum_values.clone(),
            };
            (
                FieldClass::Map,
                format!("map<{}, {}>", key, value_type_name),
                Some(map),
            )
        }
        None => (element.class(), element.display_name(), None),
    };

    FieldView {
        name: field.name.clone(),
        json_name: json_name(&field.name),
        number: field.number,
        type_name,
        full_type_name: element.full_name(),
        class,
        cardinality: field.cardinality,
        repeated: field.is_repeated(),
        optional: field.cardinality == Cardinality::Optional || field.oneof.is_some(),
        oneof: field.oneof.and_then(|i| message.oneofs.get(i)).cloned(),
        deprecated: field.deprecated,
        unresolved: matches!(element, Element::Unresolved(_)),
        enum_values: if field.is_map() { None } else { enum_values },
        map,
        element,
        oneof_index: field.oneof,
    }
}

fn enum_values(registry: &Registry, element: &Element) -> Option<Vec<EnumValue>> {
    match element {
        Element::Enum(name) => registry.enum_decl(name).map(|e| e.values.clone()),
        _ => None,
    }
}

/// lowerCamelCase form of a field name, as used for JSON keys.
pub fn json_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut capitalize_next = false;

    for c in name.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}
