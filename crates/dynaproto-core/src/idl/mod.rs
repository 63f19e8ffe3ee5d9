//! IDL parsing.
//!
//! [`parse_unit`] turns one `.proto` text into a [`ParsedUnit`] without
//! touching any registry. [`parse`] stages a unit and merges it, so a
//! malformed or colliding unit is rejected as a whole and leaves the
//! registry exactly as it was.
//!
//! Only what is needed to describe and transmit messages is kept: options
//! other than `packed` and `deprecated`, reserved ranges, extension ranges
//! and `extend` blocks are parsed and dropped.

mod literal;

use crate::error::{Error, Result};
use crate::registry::{
    qualify, Cardinality, EnumDecl, EnumValue, FieldDecl, MessageDecl, MethodDecl, Node,
    ParsedUnit, Registry, ScalarKind, ServiceDecl, SourceInfo, Syntax, TypeRef,
};
use crate::MAX_FIELD_NUMBER;
use indexmap::IndexMap;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use tracing::{debug, trace};

pub use literal::{parse_int, unescape_string};

#[derive(PestParser)]
#[grammar = "idl/proto.pest"]
struct IdlParser;

/// One IDL text together with its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Identity used in diagnostics, usually a path
    pub name: String,
    /// The IDL text
    pub text: String,
}

impl SourceUnit {
    /// Creates a new source unit
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Parses `unit` and merges its declarations into `registry`.
pub fn parse(unit: &SourceUnit, registry: &mut Registry) -> Result<()> {
    let parsed = parse_unit(&unit.name, &unit.text)?;
    debug!(
        "Parsed {} ({} top-level declarations)",
        unit.name,
        parsed.declarations.len()
    );
    registry.merge(parsed)
}

/// Parses one IDL text into staged declarations.
pub fn parse_unit(name: &str, text: &str) -> Result<ParsedUnit> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let file = IdlParser::parse(Rule::file, text)
        .map_err(|e| {
            let position = match e.line_col {
                LineColLocation::Pos(pos) => pos,
                LineColLocation::Span(start, _) => start,
            };
            Error::parse(name, position, e.variant.message())
        })?
        .next()
        .ok_or_else(|| Error::parse(name, (0, 0), "empty parse"))?;
    let items: Vec<Pair<'_, Rule>> = file.into_inner().collect();

    let mut builder = UnitBuilder {
        unit: name,
        syntax: Syntax::Proto2,
    };
    let mut package: Option<String> = None;
    let mut imports = Vec::new();

    // Package and syntax apply to the whole file wherever they appear.
    for item in &items {
        match item.as_rule() {
            Rule::syntax_stmt => builder.syntax = builder.syntax_stmt(item.clone())?,
            Rule::package_stmt => {
                if package.is_some() {
                    return Err(builder.error(item, "multiple package statements"));
                }
                let value = item
                    .clone()
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::full_ident)
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                package = Some(value);
            }
            Rule::import_stmt => {
                let path = item
                    .clone()
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::strings)
                    .ok_or_else(|| builder.error(item, "import without path"))?;
                imports.push(builder.strings(path)?);
            }
            _ => {}
        }
    }
    let package = package.unwrap_or_default();

    let mut declarations = Vec::new();
    for item in items {
        match item.as_rule() {
            Rule::message_decl => {
                declarations.push(Node::Message(builder.message(item, &package)?))
            }
            Rule::enum_decl => declarations.push(Node::Enum(builder.enumeration(item, &package)?)),
            Rule::service_decl => {
                declarations.push(Node::Service(builder.service(item, &package)?))
            }
            _ => {}
        }
    }

    Ok(ParsedUnit {
        info: SourceInfo {
            name: name.to_string(),
            package,
            syntax: builder.syntax,
            imports,
        },
        declarations,
    })
}

#[derive(Debug, Default)]
struct FieldOptions {
    packed: Option<bool>,
    deprecated: bool,
}

struct UnitBuilder<'u> {
    unit: &'u str,
    syntax: Syntax,
}

impl<'u> UnitBuilder<'u> {
    fn error(&self, pair: &Pair<'_, Rule>, message: impl Into<String>) -> Error {
        Error::parse(self.unit, pair.as_span().start_pos().line_col(), message)
    }

    fn strings(&self, pair: Pair<'_, Rule>) -> Result<String> {
        let mut out = String::new();
        for part in pair.into_inner() {
            let value = unescape_string(part.as_str()).map_err(|e| self.error(&part, e))?;
            out.push_str(&value);
        }
        Ok(out)
    }

    fn int<T: TryFrom<i64>>(&self, pair: &Pair<'_, Rule>, what: &str) -> Result<T> {
        parse_int(pair.as_str())
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.error(pair, format!("{} '{}' is out of range", what, pair.as_str())))
    }

    fn syntax_stmt(&self, pair: Pair<'_, Rule>) -> Result<Syntax> {
        let mut is_edition = false;
        let mut value = String::new();
        for part in pair.clone().into_inner() {
            match part.as_rule() {
                Rule::syntax_kind => is_edition = part.as_str() == "edition",
                Rule::strings => value = self.strings(part)?,
                _ => {}
            }
        }
        if is_edition {
            return Ok(Syntax::Editions);
        }
        Syntax::try_from(value.as_str()).map_err(|e| self.error(&pair, e))
    }

    fn field_options(&self, pair: Pair<'_, Rule>) -> FieldOptions {
        let mut options = FieldOptions::default();
        for option in pair.into_inner() {
            let mut parts = option.into_inner();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let flag = value
                .into_inner()
                .next()
                .filter(|v| v.as_rule() == Rule::bool_lit)
                .map(|v| v.as_str() == "true");
            match (name.as_str().trim(), flag) {
                ("packed", Some(flag)) => options.packed = Some(flag),
                ("deprecated", Some(flag)) => options.deprecated = flag,
                (other, _) => trace!("Ignoring field option {}", other),
            }
        }
        options
    }

    fn message(&self, pair: Pair<'_, Rule>, scope: &str) -> Result<MessageDecl> {
        let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::kw_message);
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        let full_name = qualify(scope, &name);

        let mut decl = MessageDecl {
            name,
            full_name,
            origin: self.unit.to_string(),
            fields: Vec::new(),
            oneofs: Vec::new(),
            nested: IndexMap::new(),
        };

        for item in inner {
            match item.as_rule() {
                Rule::field => {
                    let field = self.field(item.clone())?;
                    self.push_field(&mut decl, field, &item)?;
                }
                Rule::map_field => {
                    let field = self.map_field(item.clone())?;
                    self.push_field(&mut decl, field, &item)?;
                }
                Rule::oneof_decl => self.oneof(&mut decl, item)?,
                Rule::message_decl => {
                    let nested = self.message(item.clone(), &decl.full_name)?;
                    self.push_nested(&mut decl, Node::Message(nested), &item)?;
                }
                Rule::enum_decl => {
                    let nested = self.enumeration(item.clone(), &decl.full_name)?;
                    self.push_nested(&mut decl, Node::Enum(nested), &item)?;
                }
                _ => {}
            }
        }

        Ok(decl)
    }

    fn push_field(&self, decl: &mut MessageDecl, field: FieldDecl, at: &Pair<'_, Rule>) -> Result<()> {
        if field.number == 0 || field.number > MAX_FIELD_NUMBER {
            return Err(self.error(
                at,
                format!(
                    "field number {} of '{}' must be between 1 and {}",
                    field.number, field.name, MAX_FIELD_NUMBER
                ),
            ));
        }
        if let Some(other) = decl.field_by_number(field.number) {
            return Err(self.error(
                at,
                format!(
                    "field number {} of '{}' is already used by '{}' in '{}'",
                    field.number, field.name, other.name, decl.full_name
                ),
            ));
        }
        if decl.field(&field.name).is_some() {
            return Err(self.error(
                at,
                format!("field '{}' is declared twice in '{}'", field.name, decl.full_name),
            ));
        }
        decl.fields.push(field);
        Ok(())
    }

    fn push_nested(&self, decl: &mut MessageDecl, node: Node, at: &Pair<'_, Rule>) -> Result<()> {
        let name = node.name().to_string();
        if decl.nested.contains_key(&name) {
            return Err(self.error(
                at,
                format!("'{}' is declared twice in '{}'", name, decl.full_name),
            ));
        }
        decl.nested.insert(name, node);
        Ok(())
    }

    fn field(&self, pair: Pair<'_, Rule>) -> Result<FieldDecl> {
        let mut label = None;
        let mut token = "";
        let mut name = String::new();
        let mut number = 0;
        let mut options = FieldOptions::default();

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::label => label = Some(part.as_str()),
                Rule::type_name => token = part.as_str(),
                Rule::ident => name = part.as_str().to_string(),
                Rule::int_lit => number = self.int(&part, "field number")?,
                Rule::field_options => options = self.field_options(part),
                _ => {}
            }
        }

        let cardinality = match label {
            Some("repeated") => Cardinality::Repeated,
            Some("required") => Cardinality::Required,
            Some(_) => Cardinality::Optional,
            None if self.syntax == Syntax::Proto3 => Cardinality::Singular,
            None => Cardinality::Optional,
        };

        Ok(FieldDecl {
            name,
            number,
            cardinality,
            ty: TypeRef::from_token(token),
            map_key: None,
            oneof: None,
            packed: options.packed.unwrap_or(self.syntax.packs_by_default()),
            deprecated: options.deprecated,
        })
    }

    fn map_field(&self, pair: Pair<'_, Rule>) -> Result<FieldDecl> {
        let at = pair.clone();
        let parts: Vec<_> = pair
            .into_inner()
            .filter(|p| p.as_rule() != Rule::kw_map)
            .collect();
        let [key, value, name, number, rest @ ..] = parts.as_slice() else {
            return Err(self.error(&at, "incomplete map field"));
        };

        let key_kind = ScalarKind::from_keyword(key.as_str())
            .filter(ScalarKind::is_valid_map_key)
            .ok_or_else(|| {
                self.error(key, format!("'{}' is not a valid map key type", key.as_str()))
            })?;
        let options = rest
            .first()
            .map(|p| self.field_options(p.clone()))
            .unwrap_or_default();

        Ok(FieldDecl {
            name: name.as_str().to_string(),
            number: self.int(number, "field number")?,
            cardinality: Cardinality::Repeated,
            ty: TypeRef::from_token(value.as_str()),
            map_key: Some(key_kind),
            oneof: None,
            packed: false,
            deprecated: options.deprecated,
        })
    }

    fn oneof(&self, decl: &mut MessageDecl, pair: Pair<'_, Rule>) -> Result<()> {
        let index = decl.oneofs.len();
        let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::kw_oneof);
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        decl.oneofs.push(name);

        for item in inner.filter(|p| p.as_rule() == Rule::oneof_field) {
            let mut field = self.field(item.clone())?;
            field.cardinality = Cardinality::Optional;
            field.oneof = Some(index);
            self.push_field(decl, field, &item)?;
        }
        Ok(())
    }

    fn enumeration(&self, pair: Pair<'_, Rule>, scope: &str) -> Result<EnumDecl> {
        let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::kw_enum);
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();

        let mut values = Vec::new();
        for item in inner.filter(|p| p.as_rule() == Rule::enum_value) {
            let mut parts = item.clone().into_inner();
            let (Some(symbol), Some(number)) = (parts.next(), parts.next()) else {
                return Err(self.error(&item, "incomplete enum value"));
            };
            if values.iter().any(|v: &EnumValue| v.name == symbol.as_str()) {
                return Err(self.error(
                    &symbol,
                    format!("enum value '{}' is declared twice in '{}'", symbol.as_str(), name),
                ));
            }
            values.push(EnumValue {
                name: symbol.as_str().to_string(),
                number: self.int(&number, "enum value")?,
            });
        }

        Ok(EnumDecl {
            full_name: qualify(scope, &name),
            name,
            origin: self.unit.to_string(),
            values,
        })
    }

    fn service(&self, pair: Pair<'_, Rule>, scope: &str) -> Result<ServiceDecl> {
        let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::kw_service);
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        let full_name = qualify(scope, &name);

        let mut methods: Vec<MethodDecl> = Vec::new();
        for rpc in inner.filter(|p| p.as_rule() == Rule::rpc_decl) {
            let at = rpc.clone();
            let mut method_name = String::new();
            let mut types = Vec::with_capacity(2);
            let mut client_streaming = false;
            let mut server_streaming = false;
            for part in rpc.into_inner() {
                match part.as_rule() {
                    Rule::ident => method_name = part.as_str().to_string(),
                    Rule::client_stream => client_streaming = true,
                    Rule::server_stream => server_streaming = true,
                    Rule::type_name => types.push(TypeRef::from_token(part.as_str())),
                    _ => {}
                }
            }
            let (Some(output), Some(input)) = (types.pop(), types.pop()) else {
                return Err(self.error(&at, "rpc needs request and response types"));
            };
            if methods.iter().any(|m| m.name == method_name) {
                return Err(self.error(
                    &at,
                    format!("method '{}' is declared twice in '{}'", method_name, full_name),
                ));
            }
            methods.push(MethodDecl {
                path: format!("/{}/{}", full_name, method_name),
                name: method_name,
                input,
                output,
                client_streaming,
                server_streaming,
            });
        }

        Ok(ServiceDecl {
            name,
            full_name,
            origin: self.unit.to_string(),
            methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn single_message(unit: &ParsedUnit) -> &MessageDecl {
        match &unit.declarations[0] {
            Node::Message(m) => m,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_self_referential_message() {
        let unit = parse_unit(
            "node.proto",
            r#"
            syntax = "proto3";
            package demo;

            // A singly linked list.
            message Node {
              string id = 1;
              Node next = 2;
            }
            "#,
        )
        .unwrap();

        assert_eq!(unit.info.package, "demo");
        assert_eq!(unit.info.syntax, Syntax::Proto3);
        let node = single_message(&unit);
        assert_eq!(node.full_name, "demo.Node");
        assert_eq!(node.fields.len(), 2);
        assert_eq!(node.fields[0].ty, TypeRef::Scalar(ScalarKind::String));
        assert_eq!(node.fields[0].cardinality, Cardinality::Singular);
        assert_eq!(node.fields[1].ty.token(), "Node");
    }

    #[test]
    fn test_parse_maps_oneofs_and_nesting() {
        let unit = parse_unit(
            "shapes.proto",
            r#"
            syntax = "proto3";
            package geo.v1;
            import "google/protobuf/timestamp.proto";
            option go_package = "example.com/geo;geo";

            message Shape {
              option deprecated = false;
              enum Kind { KIND_UNSPECIFIED = 0; CIRCLE = 1; }
              message Point { double x = 1; double y = 2; }

              Kind kind = 1;
              map<string, Point> anchors = 2 [deprecated = true];
              oneof size {
                double radius = 3;
                Point corner = 4;
              }
              repeated int32 tags = 5 [packed = false];
              optional string label = 6;
              reserved 8, 10 to 12;
              reserved "legacy";
            }
            "#,
        )
        .unwrap();

        assert_eq!(unit.info.imports, vec!["google/protobuf/timestamp.proto".to_string()]);
        let shape = single_message(&unit);
        assert_eq!(shape.oneofs, vec!["size".to_string()]);
        assert!(shape.nested.contains_key("Kind"));
        assert!(shape.nested.contains_key("Point"));

        let anchors = shape.field("anchors").unwrap();
        assert_eq!(anchors.map_key, Some(ScalarKind::String));
        assert_eq!(anchors.ty.token(), "Point");
        assert!(anchors.deprecated);

        let corner = shape.field("corner").unwrap();
        assert_eq!(corner.oneof, Some(0));
        assert_eq!(corner.cardinality, Cardinality::Optional);

        let tags = shape.field("tags").unwrap();
        assert!(tags.is_repeated());
        assert!(!tags.packed);

        assert_eq!(shape.field("label").unwrap().cardinality, Cardinality::Optional);
        let numbers: Vec<u32> = shape.fields.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_parse_service() {
        let unit = parse_unit(
            "svc.proto",
            r#"
            syntax = "proto3";
            package demo.api;
            message Req {}
            message Res {}
            service Greeter {
              rpc Hello (Req) returns (Res);
              rpc Watch (Req) returns (stream .demo.api.Res) {
                option deprecated = true;
              }
            }
            "#,
        )
        .unwrap();

        let service = unit
            .declarations
            .iter()
            .find_map(|d| match d {
                Node::Service(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert_eq!(service.full_name, "demo.api.Greeter");
        assert_eq!(service.methods[0].path, "/demo.api.Greeter/Hello");
        assert!(!service.methods[0].server_streaming);
        assert!(service.methods[1].server_streaming);
        assert!(!service.methods[1].client_streaming);
        assert_eq!(service.methods[1].output.token(), ".demo.api.Res");
    }

    #[test]
    fn test_proto2_defaults() {
        let unit = parse_unit(
            "legacy.proto",
            r#"
            package legacy;
            message Old {
              required int32 id = 1;
              optional string name = 2 [default = "x"];
              repeated int64 values = 3;
              repeated sint32 packed_values = 4 [packed = true];
              extensions 100 to max;
            }
            extend Old { optional int32 extra = 100; }
            "#,
        )
        .unwrap();

        assert_eq!(unit.info.syntax, Syntax::Proto2);
        let old = single_message(&unit);
        assert_eq!(old.fields[0].cardinality, Cardinality::Required);
        assert_eq!(old.fields[1].cardinality, Cardinality::Optional);
        assert!(!old.fields[2].packed);
        assert!(old.fields[3].packed);
        assert_eq!(old.fields.len(), 4);
    }

    #[test]
    fn test_enum_values() {
        let unit = parse_unit(
            "enum.proto",
            r#"
            syntax = "proto3";
            enum Level {
              option allow_alias = true;
              LOW = 0;
              MINUS = -1;
              HEX = 0x10;
              reserved 5;
            }
            "#,
        )
        .unwrap();
        let Node::Enum(level) = &unit.declarations[0] else {
            panic!("expected enum");
        };
        let numbers: Vec<i32> = level.values.iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![0, -1, 16]);
        assert_eq!(level.full_name, "Level");
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = parse_unit("bad.proto", "syntax = \"proto3\";\nmessage Broken {\n  string id = ;\n}\n")
            .unwrap_err();
        match err {
            Error::Parse { unit, line, .. } => {
                assert_eq!(unit, "bad.proto");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_field_number_rejected() {
        let err = parse_unit(
            "dup.proto",
            "syntax = \"proto3\"; message A { int32 a = 1; int32 b = 1; }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("already used by 'a'"));
    }

    #[test]
    fn test_invalid_map_key_rejected() {
        let err = parse_unit(
            "map.proto",
            "syntax = \"proto3\"; message A { map<double, string> m = 1; }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a valid map key"));
    }

    #[test]
    fn test_unsupported_syntax() {
        let err = parse_unit("x.proto", "syntax = \"proto4\";").unwrap_err();
        assert!(err.to_string().contains("unsupported syntax"));
    }

    #[test]
    fn test_parse_merges_into_registry() {
        let mut registry = Registry::new();
        let unit = SourceUnit::new("a.proto", "syntax = \"proto3\"; package a; message M {}");
        parse(&unit, &mut registry).unwrap();
        assert!(registry.message("a.M").is_some());

        let err = parse(&unit, &mut registry).unwrap_err();
        assert!(matches!(err, Error::DuplicateDeclaration { .. }));
    }
}
