//! Declaration types held by the [`Registry`](super::Registry).

use indexmap::IndexMap;
use serde::Serialize;

use super::Node;

/// Protobuf scalar value types, keyed by their IDL keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    Uint64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
    /// `uint32`
    Uint32,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
}

impl ScalarKind {
    /// Every scalar kind, in descriptor.proto order
    pub const ALL: [ScalarKind; 15] = [
        ScalarKind::Double,
        ScalarKind::Float,
        ScalarKind::Int64,
        ScalarKind::Uint64,
        ScalarKind::Int32,
        ScalarKind::Fixed64,
        ScalarKind::Fixed32,
        ScalarKind::Bool,
        ScalarKind::String,
        ScalarKind::Bytes,
        ScalarKind::Uint32,
        ScalarKind::Sfixed32,
        ScalarKind::Sfixed64,
        ScalarKind::Sint32,
        ScalarKind::Sint64,
    ];

    /// Recognizes a scalar keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.keyword() == keyword)
    }

    /// The canonical IDL keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            ScalarKind::Double => "double",
            ScalarKind::Float => "float",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Int32 => "int32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Sfixed32 => "sfixed32",
            ScalarKind::Sfixed64 => "sfixed64",
            ScalarKind::Sint32 => "sint32",
            ScalarKind::Sint64 => "sint64",
        }
    }

    /// 64-bit integers are rendered as decimal strings at the value boundary
    pub fn is_64bit_integer(&self) -> bool {
        matches!(
            self,
            ScalarKind::Int64
                | ScalarKind::Uint64
                | ScalarKind::Fixed64
                | ScalarKind::Sfixed64
                | ScalarKind::Sint64
        )
    }

    /// Whether repeated values of this kind may use packed encoding
    pub fn is_packable(&self) -> bool {
        !matches!(self, ScalarKind::String | ScalarKind::Bytes)
    }

    /// Whether this kind is allowed as a map key
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(
            self,
            ScalarKind::Double | ScalarKind::Float | ScalarKind::Bytes
        )
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Field cardinality as declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// proto3 field without label: implicit presence
    Singular,
    /// `optional`, oneof members, proto2/editions unlabeled fields
    Optional,
    /// proto2 `required`
    Required,
    /// `repeated` and map fields
    Repeated,
}

/// What a named type token resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Not yet visited by the resolver
    Pending,
    /// A message, by fully-qualified name
    Message(String),
    /// An enum, by fully-qualified name
    Enum(String),
    /// No declaration matched after all units were merged
    Unresolved,
}

/// A declared type: either a scalar keyword or a (possibly dotted) name.
///
/// Resolution binds a name to a fully-qualified name, never to a copy of
/// the declaration, so cyclic schemas need no special handling here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// A scalar keyword
    Scalar(ScalarKind),
    /// A named type
    Named {
        /// The token as written in the IDL
        token: String,
        /// Resolution result
        target: Target,
    },
}

impl TypeRef {
    /// Builds a type reference from an IDL token
    pub fn from_token(token: &str) -> Self {
        match ScalarKind::from_keyword(token) {
            Some(kind) => TypeRef::Scalar(kind),
            None => TypeRef::Named {
                token: token.to_string(),
                target: Target::Pending,
            },
        }
    }

    /// The token as written
    pub fn token(&self) -> &str {
        match self {
            TypeRef::Scalar(kind) => kind.keyword(),
            TypeRef::Named { token, .. } => token,
        }
    }

    /// Fully-qualified message name, if resolved to a message
    pub fn message_name(&self) -> Option<&str> {
        match self {
            TypeRef::Named {
                target: Target::Message(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    /// Fully-qualified enum name, if resolved to an enum
    pub fn enum_name(&self) -> Option<&str> {
        match self {
            TypeRef::Named {
                target: Target::Enum(name),
                ..
            } => Some(name),
            _ => None,
        }
    }

    /// True for a named type that failed to resolve
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            TypeRef::Named {
                target: Target::Unresolved | Target::Pending,
                ..
            }
        )
    }
}

/// A field of a message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Field number, the wire identity
    pub number: u32,
    /// Declared cardinality
    pub cardinality: Cardinality,
    /// Element type; the value type for maps
    pub ty: TypeRef,
    /// Key type when this is a `map<K, V>` field
    pub map_key: Option<ScalarKind>,
    /// Index into the owning message's `oneofs`
    pub oneof: Option<usize>,
    /// Packed encoding for repeated packable values
    pub packed: bool,
    /// `[deprecated = true]`
    pub deprecated: bool,
}

impl FieldDecl {
    /// Whether this is a `map<K, V>` field
    pub fn is_map(&self) -> bool {
        self.map_key.is_some()
    }

    /// Whether this is a repeated (non-map) field
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated && !self.is_map()
    }

    /// Fields without explicit presence skip zero values on the wire
    pub fn has_implicit_presence(&self) -> bool {
        self.cardinality == Cardinality::Singular && self.oneof.is_none()
    }
}

/// A message declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDecl {
    /// Short name
    pub name: String,
    /// Fully-qualified dotted name
    pub full_name: String,
    /// Identity of the declaring source unit
    pub origin: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDecl>,
    /// Oneof group names in declaration order
    pub oneofs: Vec<String>,
    /// Nested messages and enums
    pub nested: IndexMap<String, Node>,
}

impl MessageDecl {
    /// Looks up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a field by number
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.number == number)
    }
}

/// A symbol of an enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumValue {
    /// Symbolic name
    pub name: String,
    /// Integer value
    pub number: i32,
}

/// An enum declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    /// Short name
    pub name: String,
    /// Fully-qualified dotted name
    pub full_name: String,
    /// Identity of the declaring source unit
    pub origin: String,
    /// Symbols in declaration order; the first is the default
    pub values: Vec<EnumValue>,
}

impl EnumDecl {
    /// Value of the first declared symbol, `0` for an empty enum
    pub fn default_number(&self) -> i32 {
        self.values.first().map(|v| v.number).unwrap_or(0)
    }

    /// First symbol carrying `number`
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.number == number)
            .map(|v| v.name.as_str())
    }

    /// Value of the symbol `name`
    pub fn number_of(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.number)
    }
}

/// An rpc of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    /// Method name
    pub name: String,
    /// Request message
    pub input: TypeRef,
    /// Response message
    pub output: TypeRef,
    /// `stream` on the request
    pub client_streaming: bool,
    /// `stream` on the response
    pub server_streaming: bool,
    /// `/<service full name>/<method>`
    pub path: String,
}

/// A service declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDecl {
    /// Short name
    pub name: String,
    /// Fully-qualified dotted name
    pub full_name: String,
    /// Identity of the declaring source unit
    pub origin: String,
    /// Methods in declaration order
    pub methods: Vec<MethodDecl>,
}

impl ServiceDecl {
    /// Looks up a method by name
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}
