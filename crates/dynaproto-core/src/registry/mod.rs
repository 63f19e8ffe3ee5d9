//! Descriptor registry.
//!
//! The registry is an owned tree of [`Namespace`] nodes. Packages are
//! namespaces; messages carry their nested messages and enums as children.
//! Ownership is strictly top-down: a field referring to another type holds
//! its fully-qualified name (see [`Target`]) and is looked up on demand, so
//! the tree itself never contains a cycle even when the type graph does.
//!
//! Source units are merged one at a time with [`Registry::merge`], which is
//! all-or-nothing per unit: a unit that collides with an existing name
//! leaves the registry untouched.

mod decl;
pub mod well_known;

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::HashSet;

pub use decl::{
    Cardinality, EnumDecl, EnumValue, FieldDecl, MessageDecl, MethodDecl, ScalarKind, ServiceDecl,
    Target, TypeRef,
};

/// IDL syntax level of a source unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Proto2 syntax
    Proto2,
    /// Proto3 syntax
    Proto3,
    /// `edition = "..."` files
    Editions,
}

impl Syntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
            Syntax::Editions => "editions",
        }
    }

    /// Whether repeated packable fields are packed unless told otherwise
    pub fn packs_by_default(&self) -> bool {
        !matches!(self, Syntax::Proto2)
    }
}

impl TryFrom<&str> for Syntax {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "" | "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            _ => Err(format!("unsupported syntax '{}'", value)),
        }
    }
}

/// Metadata about one merged source unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Identity of the unit (usually its path)
    pub name: String,
    /// Declared package, empty when absent
    pub package: String,
    /// Syntax level
    pub syntax: Syntax,
    /// Import statements as written
    pub imports: Vec<String>,
}

/// One parsed source unit, staged before merging
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    /// Unit metadata
    pub info: SourceInfo,
    /// Top-level declarations in order
    pub declarations: Vec<Node>,
}

/// A named scope holding declarations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Namespace {
    /// Last segment of the name
    pub name: String,
    /// Fully-qualified dotted name, empty for the root
    pub full_name: String,
    /// Children in insertion order
    pub children: IndexMap<String, Node>,
}

impl Namespace {
    fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_name: full_name.into(),
            children: IndexMap::new(),
        }
    }
}

/// A node of the registry tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A package segment
    Namespace(Namespace),
    /// A message, itself a scope for nested types
    Message(MessageDecl),
    /// An enum
    Enum(EnumDecl),
    /// A service
    Service(ServiceDecl),
}

impl Node {
    /// Short name of the node
    pub fn name(&self) -> &str {
        match self {
            Node::Namespace(ns) => &ns.name,
            Node::Message(m) => &m.name,
            Node::Enum(e) => &e.name,
            Node::Service(s) => &s.name,
        }
    }

    /// Fully-qualified name of the node
    pub fn full_name(&self) -> &str {
        match self {
            Node::Namespace(ns) => &ns.full_name,
            Node::Message(m) => &m.full_name,
            Node::Enum(e) => &e.full_name,
            Node::Service(s) => &s.full_name,
        }
    }

    /// Declaring unit; namespaces span units and have none
    pub fn origin(&self) -> Option<&str> {
        match self {
            Node::Namespace(_) => None,
            Node::Message(m) => Some(&m.origin),
            Node::Enum(e) => Some(&e.origin),
            Node::Service(s) => Some(&s.origin),
        }
    }

    /// Whether this node is a message or enum
    pub fn is_type(&self) -> bool {
        matches!(self, Node::Message(_) | Node::Enum(_))
    }

    fn children(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Node::Namespace(ns) => Some(&ns.children),
            Node::Message(m) => Some(&m.nested),
            _ => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match self {
            Node::Namespace(ns) => Some(&mut ns.children),
            Node::Message(m) => Some(&mut m.nested),
            _ => None,
        }
    }
}

/// Joins a scope and a name with a dot
pub fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Returns the last dotted segment of a name
pub fn short_name(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

/// The declaration tree built from one batch of source units
#[derive(Debug, Clone, Default)]
pub struct Registry {
    root: Namespace,
    units: Vec<SourceInfo>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-seeded with the well-known types
    pub fn with_well_known_types() -> Result<Self> {
        let mut registry = Self::new();
        well_known::seed(&mut registry)?;
        Ok(registry)
    }

    /// The root namespace
    pub fn root(&self) -> &Namespace {
        &self.root
    }

    /// Units merged so far, in merge order
    pub fn units(&self) -> &[SourceInfo] {
        &self.units
    }

    /// Looks up any node by fully-qualified name (a leading dot is allowed)
    pub fn lookup(&self, full_name: &str) -> Option<&Node> {
        let full_name = full_name.strip_prefix('.').unwrap_or(full_name);
        let mut segments = full_name.split('.');
        let mut node = self.root.children.get(segments.next()?)?;
        for segment in segments {
            node = node.children()?.get(segment)?;
        }
        Some(node)
    }

    fn lookup_mut(&mut self, full_name: &str) -> Option<&mut Node> {
        let full_name = full_name.strip_prefix('.').unwrap_or(full_name);
        let mut segments = full_name.split('.');
        let mut node = self.root.children.get_mut(segments.next()?)?;
        for segment in segments {
            node = node.children_mut()?.get_mut(segment)?;
        }
        Some(node)
    }

    /// Whether any node has this fully-qualified name
    pub fn contains(&self, full_name: &str) -> bool {
        self.lookup(full_name).is_some()
    }

    /// Looks up a message
    pub fn message(&self, full_name: &str) -> Option<&MessageDecl> {
        match self.lookup(full_name)? {
            Node::Message(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn message_mut(&mut self, full_name: &str) -> Option<&mut MessageDecl> {
        match self.lookup_mut(full_name)? {
            Node::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up an enum
    pub fn enum_decl(&self, full_name: &str) -> Option<&EnumDecl> {
        match self.lookup(full_name)? {
            Node::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Looks up a service
    pub fn service(&self, full_name: &str) -> Option<&ServiceDecl> {
        match self.lookup(full_name)? {
            Node::Service(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn service_mut(&mut self, full_name: &str) -> Option<&mut ServiceDecl> {
        match self.lookup_mut(full_name)? {
            Node::Service(s) => Some(s),
            _ => None,
        }
    }

    /// Merges one parsed unit.
    ///
    /// Fails without modifying the registry if any top-level name of the
    /// unit, or any segment of its package, collides with an existing
    /// declaration.
    pub fn merge(&mut self, unit: ParsedUnit) -> Result<()> {
        let ParsedUnit { info, declarations } = unit;
        self.check_package(&info)?;

        let mut seen = HashSet::new();
        for decl in &declarations {
            let full_name = qualify(&info.package, decl.name());
            if let Some(existing) = self.lookup(&full_name) {
                return Err(Error::DuplicateDeclaration {
                    unit: info.name.clone(),
                    name: full_name,
                    existing: existing.origin().unwrap_or("package").to_string(),
                });
            }
            if !seen.insert(decl.name()) {
                return Err(Error::DuplicateDeclaration {
                    unit: info.name.clone(),
                    existing: info.name.clone(),
                    name: full_name,
                });
            }
        }

        let namespace = self.ensure_namespace(&info.package)?;
        for decl in declarations {
            namespace.children.insert(decl.name().to_string(), decl);
        }
        self.units.push(info);
        Ok(())
    }

    fn check_package(&self, info: &SourceInfo) -> Result<()> {
        if info.package.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in info.package.split('.') {
            prefix = qualify(&prefix, segment);
            match self.lookup(&prefix) {
                None => break,
                Some(Node::Namespace(_)) => continue,
                Some(other) => {
                    return Err(Error::DuplicateDeclaration {
                        unit: info.name.clone(),
                        name: prefix,
                        existing: other.origin().unwrap_or("package").to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn ensure_namespace(&mut self, package: &str) -> Result<&mut Namespace> {
        let mut namespace = &mut self.root;
        if package.is_empty() {
            return Ok(namespace);
        }
        for segment in package.split('.') {
            let full_name = qualify(&namespace.full_name, segment);
            let node = namespace
                .children
                .entry(segment.to_string())
                .or_insert_with(|| Node::Namespace(Namespace::new(segment, full_name)));
            namespace = match node {
                Node::Namespace(inner) => inner,
                other => {
                    return Err(Error::internal(format!(
                        "'{}' is not a package",
                        other.full_name()
                    )))
                }
            };
        }
        Ok(namespace)
    }

    /// Visits every node in pre-order, children in insertion order
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a Node)) {
        let mut stack: Vec<&'a Node> = self.root.children.values().rev().collect();
        while let Some(node) = stack.pop() {
            visit(node);
            if let Some(children) = node.children() {
                stack.extend(children.values().rev());
            }
        }
    }

    /// All messages, nested ones included
    pub fn messages(&self) -> Vec<&MessageDecl> {
        let mut out = Vec::new();
        self.walk(|node| {
            if let Node::Message(m) = node {
                out.push(m);
            }
        });
        out
    }

    /// All enums, nested ones included
    pub fn enums(&self) -> Vec<&EnumDecl> {
        let mut out = Vec::new();
        self.walk(|node| {
            if let Node::Enum(e) = node {
                out.push(e);
            }
        });
        out
    }

    /// All services
    pub fn services(&self) -> Vec<&ServiceDecl> {
        let mut out = Vec::new();
        self.walk(|node| {
            if let Node::Service(s) = node {
                out.push(s);
            }
        });
        out
    }
}
