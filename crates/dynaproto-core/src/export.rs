//! Descriptor export.
//!
//! Converts the registry into a `FileDescriptorSet` with one file per
//! merged unit, so schemas loaded from IDL text can be handed to
//! `prost-reflect` and other descriptor-driven tooling.
//!
//! - File dependencies come from resolved references, not from import
//!   statements, and files are ordered so that dependencies come first
//! - Map fields get a synthetic nested `<Field>Entry` message
//! - proto3 `optional` fields get a synthetic oneof named `_<field>`
//! - Units in editions syntax are exported as proto2
//! - Unresolved fields and methods are left out

use crate::error::{Error, Result};
use crate::registry::{
    Cardinality, EnumDecl, FieldDecl, MessageDecl, Node, Registry, ScalarKind, ServiceDecl,
    Syntax, TypeRef,
};
use prost::Message;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions,
    MethodDescriptorProto, OneofDescriptorProto, ServiceDescriptorProto,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Builds a `FileDescriptorSet` covering every unit in the registry.
pub fn file_descriptor_set(registry: &Registry) -> Result<FileDescriptorSet> {
    let mut files: HashMap<String, FileDescriptorProto> = HashMap::new();
    let mut syntaxes: HashMap<String, Syntax> = HashMap::new();
    for info in registry.units() {
        let syntax = match info.syntax {
            Syntax::Proto3 => "proto3",
            Syntax::Proto2 | Syntax::Editions => "proto2",
        };
        files.insert(
            info.name.clone(),
            FileDescriptorProto {
                name: Some(info.name.clone()),
                package: (!info.package.is_empty()).then(|| info.package.clone()),
                syntax: Some(syntax.to_string()),
                ..Default::default()
            },
        );
        syntaxes.insert(info.name.clone(), info.syntax);
    }

    let mut exporter = Exporter {
        registry,
        deps: HashMap::new(),
    };
    for node in top_level(registry) {
        let Some(origin) = node.origin() else {
            continue;
        };
        let syntax = syntaxes.get(origin).copied().unwrap_or(Syntax::Proto2);
        let proto = match node {
            Node::Message(m) => Some(Exported::Message(exporter.message(m, origin, syntax))),
            Node::Enum(e) => Some(Exported::Enum(enum_proto(e))),
            Node::Service(s) => Some(Exported::Service(exporter.service(s, origin))),
            Node::Namespace(_) => None,
        };
        let Some(file) = files.get_mut(origin) else {
            return Err(Error::internal(format!(
                "declaration '{}' belongs to unknown unit '{}'",
                node.full_name(),
                origin
            )));
        };
        match proto {
            Some(Exported::Message(m)) => file.message_type.push(m),
            Some(Exported::Enum(e)) => file.enum_type.push(e),
            Some(Exported::Service(s)) => file.service.push(s),
            None => {}
        }
    }

    let names: Vec<String> = registry.units().iter().map(|u| u.name.clone()).collect();
    let order = dependency_order(&names, &exporter.deps)?;

    let mut set = FileDescriptorSet::default();
    for name in order {
        if let Some(mut file) = files.remove(&name) {
            file.dependency = exporter
                .deps
                .get(&name)
                .map(|d| d.iter().cloned().collect())
                .unwrap_or_default();
            set.file.push(file);
        }
    }
    debug!("Exported {} files", set.file.len());
    Ok(set)
}

/// Builds a `prost-reflect` pool from the registry.
pub fn descriptor_pool(registry: &Registry) -> Result<DescriptorPool> {
    let fds = file_descriptor_set(registry)?;

    let mut fds_bytes = Vec::new();
    fds.encode(&mut fds_bytes).map_err(|e| {
        Error::descriptor_build(format!("failed to encode descriptor set: {}", e))
    })?;

    DescriptorPool::decode(fds_bytes.as_slice()).map_err(|e| {
        Error::descriptor_build(format!("failed to decode descriptor pool: {}", e))
    })
}

enum Exported {
    Message(DescriptorProto),
    Enum(EnumDescriptorProto),
    Service(ServiceDescriptorProto),
}

/// Declarations whose parent is a namespace
fn top_level(registry: &Registry) -> Vec<&Node> {
    let mut out = Vec::new();
    let mut stack = vec![registry.root()];
    while let Some(namespace) = stack.pop() {
        for node in namespace.children.values() {
            match node {
                Node::Namespace(inner) => stack.push(inner),
                other => out.push(other),
            }
        }
    }
    out
}

struct Exporter<'r> {
    registry: &'r Registry,
    deps: HashMap<String, BTreeSet<String>>,
}

impl Exporter<'_> {
    fn depend(&mut self, origin: &str, target: &str) {
        let Some(target_origin) = self.registry.lookup(target).and_then(Node::origin) else {
            return;
        };
        if target_origin != origin {
            self.deps
                .entry(origin.to_string())
                .or_default()
                .insert(target_origin.to_string());
        }
    }

    fn message(&mut self, decl: &MessageDecl, origin: &str, syntax: Syntax) -> DescriptorProto {
        let mut proto = DescriptorProto {
            name: Some(decl.name.clone()),
            oneof_decl: decl
                .oneofs
                .iter()
                .map(|name| OneofDescriptorProto {
                    name: Some(name.clone()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        for node in decl.nested.values() {
            match node {
                Node::Message(m) => proto.nested_type.push(self.message(m, origin, syntax)),
                Node::Enum(e) => proto.enum_type.push(enum_proto(e)),
                _ => {}
            }
        }

        let mut synthetic_oneofs = Vec::new();
        for field in &decl.fields {
            if field.ty.is_unresolved() {
                warn!(
                    "Leaving unresolved field {}.{} out of the descriptor",
                    decl.full_name, field.name
                );
                continue;
            }
            let mut fp = FieldDescriptorProto {
                name: Some(field.name.clone()),
                number: Some(field.number as i32),
                ..Default::default()
            };
            fp.set_label(match field.cardinality {
                Cardinality::Repeated => Label::Repeated,
                Cardinality::Required => Label::Required,
                _ => Label::Optional,
            });

            if let Some(key) = field.map_key {
                let entry_name = format!("{}Entry", upper_camel(&field.name));
                let mut key_field = FieldDescriptorProto {
                    name: Some("key".to_string()),
                    number: Some(1),
                    ..Default::default()
                };
                key_field.set_label(Label::Optional);
                key_field.set_type(scalar_type(key));
                let mut value_field = FieldDescriptorProto {
                    name: Some("value".to_string()),
                    number: Some(2),
                    ..Default::default()
                };
                value_field.set_label(Label::Optional);
                self.set_type(&mut value_field, &field.ty, origin);

                proto.nested_type.push(DescriptorProto {
                    name: Some(entry_name.clone()),
                    field: vec![key_field, value_field],
                    options: Some(MessageOptions {
                        map_entry: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                fp.set_type(Type::Message);
                fp.type_name = Some(format!(".{}.{}", decl.full_name, entry_name));
            } else {
                self.set_type(&mut fp, &field.ty, origin);
            }

            if let Some(index) = field.oneof {
                fp.oneof_index = Some(index as i32);
            } else if syntax == Syntax::Proto3 && field.cardinality == Cardinality::Optional {
                fp.proto3_optional = Some(true);
                fp.oneof_index = Some((decl.oneofs.len() + synthetic_oneofs.len()) as i32);
                synthetic_oneofs.push(format!("_{}", field.name));
            }

            let packable = match &field.ty {
                TypeRef::Scalar(kind) => kind.is_packable(),
                ty => ty.enum_name().is_some(),
            };
            let packed = (field.is_repeated() && packable).then_some(field.packed);
            if packed.is_some() || field.deprecated {
                fp.options = Some(FieldOptions {
                    packed,
                    deprecated: field.deprecated.then_some(true),
                    ..Default::default()
                });
            }

            proto.field.push(fp);
        }

        proto
            .oneof_decl
            .extend(synthetic_oneofs.into_iter().map(|name| OneofDescriptorProto {
                name: Some(name),
                ..Default::default()
            }));
        proto
    }

    fn set_type(&mut self, fp: &mut FieldDescriptorProto, ty: &TypeRef, origin: &str) {
        match ty {
            TypeRef::Scalar(kind) => fp.set_type(scalar_type(*kind)),
            named => {
                if let Some(name) = named.message_name() {
                    fp.set_type(Type::Message);
                    fp.type_name = Some(format!(".{}", name));
                    self.depend(origin, name);
                } else if let Some(name) = named.enum_name() {
                    fp.set_type(Type::Enum);
                    fp.type_name = Some(format!(".{}", name));
                    self.depend(origin, name);
                }
            }
        }
    }

    fn service(&mut self, decl: &ServiceDecl, origin: &str) -> ServiceDescriptorProto {
        let mut methods = Vec::new();
        for method in &decl.methods {
            let (Some(input), Some(output)) =
                (method.input.message_name(), method.output.message_name())
            else {
                warn!(
                    "Leaving unresolved method {}.{} out of the descriptor",
                    decl.full_name, method.name
                );
                continue;
            };
            self.depend(origin, input);
            self.depend(origin, output);
            methods.push(MethodDescriptorProto {
                name: Some(method.name.clone()),
                input_type: Some(format!(".{}", input)),
                output_type: Some(format!(".{}", output)),
                client_streaming: Some(method.client_streaming),
                server_streaming: Some(method.server_streaming),
                ..Default::default()
            });
        }
        ServiceDescriptorProto {
            name: Some(decl.name.clone()),
            method: methods,
            ..Default::default()
        }
    }
}

fn enum_proto(decl: &EnumDecl) -> EnumDescriptorProto {
    let mut numbers = BTreeSet::new();
    let aliased = decl.values.iter().any(|v| !numbers.insert(v.number));
    EnumDescriptorProto {
        name: Some(decl.name.clone()),
        value: decl
            .values
            .iter()
            .map(|v| EnumValueDescriptorProto {
                name: Some(v.name.clone()),
                number: Some(v.number),
                ..Default::default()
            })
            .collect(),
        options: aliased.then(|| EnumOptions {
            allow_alias: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn scalar_type(kind: ScalarKind) -> Type {
    match kind {
        ScalarKind::Double => Type::Double,
        ScalarKind::Float => Type::Float,
        ScalarKind::Int64 => Type::Int64,
        ScalarKind::Uint64 => Type::Uint64,
        ScalarKind::Int32 => Type::Int32,
        ScalarKind::Fixed64 => Type::Fixed64,
        ScalarKind::Fixed32 => Type::Fixed32,
        ScalarKind::Bool => Type::Bool,
        ScalarKind::String => Type::String,
        ScalarKind::Bytes => Type::Bytes,
        ScalarKind::Uint32 => Type::Uint32,
        ScalarKind::Sfixed32 => Type::Sfixed32,
        ScalarKind::Sfixed64 => Type::Sfixed64,
        ScalarKind::Sint32 => Type::Sint32,
        ScalarKind::Sint64 => Type::Sint64,
    }
}

/// `foo_bar` to `FooBar`, as protoc names map entry types
fn upper_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut capitalize_next = true;
    for c in name.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Orders units so that each comes after its dependencies, keeping the
/// merge order otherwise.
fn dependency_order(
    names: &[String],
    deps: &HashMap<String, BTreeSet<String>>,
) -> Result<Vec<String>> {
    fn visit(
        name: &str,
        deps: &HashMap<String, BTreeSet<String>>,
        marks: &mut HashMap<String, Mark>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(Error::descriptor_build(format!(
                    "units depend on each other in a cycle through '{}'",
                    name
                )))
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        if let Some(children) = deps.get(name) {
            for child in children {
                visit(child, deps, marks, out)?;
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        out.push(name.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        visit(name, deps, &mut marks, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::{parse, SourceUnit};
    use crate::marshal::{from_binary, to_binary};
    use crate::resolve::resolve_all;
    use pretty_assertions::assert_eq;
    use prost_reflect::{DynamicMessage, MapKey, Value as ReflectValue};
    use serde_json::json;

    const COMMON: &str = r#"
        syntax = "proto3";
        package shop.common;
        enum Status { STATUS_UNKNOWN = 0; STATUS_OPEN = 1; }
        message Money { int64 units = 1; string currency = 2; }
    "#;

    const ORDERS: &str = r#"
        syntax = "proto3";
        package shop;
        import "common.proto";
        import "google/protobuf/timestamp.proto";

        message Order {
          string order_id = 1;
          common.Money total = 2;
          map<string, int32> tag_counts = 3;
          optional string note = 4;
          oneof payment {
            string card = 5;
            string voucher = 6;
          }
          common.Status status = 7;
          repeated int64 lines = 8;
          google.protobuf.Timestamp placed_at = 9;
          message Audit { string by = 1; }
          repeated Audit audits = 10;
        }

        service Orders {
          rpc Get (Order) returns (Order);
          rpc Watch (Order) returns (stream Order);
        }
    "#;

    fn registry(units: &[(&str, &str)]) -> Registry {
        let mut registry = Registry::with_well_known_types().unwrap();
        for (name, text) in units {
            parse(&SourceUnit::new(*name, *text), &mut registry).unwrap();
        }
        let _ = resolve_all(&mut registry);
        registry
    }

    #[test]
    fn test_files_ordered_by_dependency() {
        let registry = registry(&[("orders.proto", ORDERS), ("common.proto", COMMON)]);
        let set = file_descriptor_set(&registry).unwrap();
        let names: Vec<&str> = set.file.iter().map(|f| f.name()).collect();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("common.proto") < position("orders.proto"));
        assert!(position("google/protobuf/timestamp.proto") < position("orders.proto"));

        let orders = &set.file[position("orders.proto")];
        assert_eq!(
            orders.dependency,
            vec![
                "common.proto".to_string(),
                "google/protobuf/timestamp.proto".to_string()
            ]
        );
        assert_eq!(orders.package(), "shop");
        assert_eq!(orders.syntax(), "proto3");
    }

    #[test]
    fn test_message_shape() {
        let registry = registry(&[("common.proto", COMMON), ("orders.proto", ORDERS)]);
        let set = file_descriptor_set(&registry).unwrap();
        let orders = set.file.iter().find(|f| f.name() == "orders.proto").unwrap();
        let order = &orders.message_type[0];

        let entry = order
            .nested_type
            .iter()
            .find(|m| m.name() == "TagCountsEntry")
            .unwrap();
        assert_eq!(entry.options.as_ref().unwrap().map_entry, Some(true));

        let oneofs: Vec<&str> = order.oneof_decl.iter().map(|o| o.name()).collect();
        assert_eq!(oneofs, vec!["payment", "_note"]);

        let note = order.field.iter().find(|f| f.name() == "note").unwrap();
        assert_eq!(note.proto3_optional, Some(true));
        assert_eq!(note.oneof_index, Some(1));

        let lines = order.field.iter().find(|f| f.name() == "lines").unwrap();
        assert_eq!(lines.options.as_ref().unwrap().packed, Some(true));
    }

    #[test]
    fn test_pool_builds() {
        let registry = registry(&[("common.proto", COMMON), ("orders.proto", ORDERS)]);
        let pool = descriptor_pool(&registry).unwrap();

        let order = pool.get_message_by_name("shop.Order").unwrap();
        assert!(order.get_field_by_name("tag_counts").unwrap().is_map());
        assert!(order.get_field_by_name("note").unwrap().supports_presence());
        assert_eq!(
            order
                .get_field_by_name("card")
                .unwrap()
                .containing_oneof()
                .unwrap()
                .name(),
            "payment"
        );
        assert!(pool.get_message_by_name("shop.Order.Audit").is_some());

        let service = pool.get_service_by_name("shop.Orders").unwrap();
        let watch = service.methods().find(|m| m.name() == "Watch").unwrap();
        assert!(watch.is_server_streaming());
        assert_eq!(watch.input().full_name(), "shop.Order");
    }

    #[test]
    fn test_dynamic_message_interop() {
        let registry = registry(&[("common.proto", COMMON), ("orders.proto", ORDERS)]);
        let pool = descriptor_pool(&registry).unwrap();
        let descriptor = pool.get_message_by_name("shop.Order").unwrap();

        let bytes = to_binary(
            &registry,
            "shop.Order",
            &json!({
                "order_id": "o-1",
                "total": {"units": "12", "currency": "EUR"},
                "tag_counts": {"gift": 2},
                "status": "STATUS_OPEN",
                "lines": ["1", "-2"]
            }),
        )
        .unwrap();
        let message = DynamicMessage::decode(descriptor.clone(), bytes.as_slice()).unwrap();
        assert_eq!(
            message.get_field_by_name("order_id").unwrap().as_str(),
            Some("o-1")
        );
        assert_eq!(
            message.get_field_by_name("status").unwrap().as_enum_number(),
            Some(1)
        );
        let counts = message.get_field_by_name("tag_counts").unwrap();
        assert_eq!(
            counts.as_map().unwrap().get(&MapKey::String("gift".to_string())),
            Some(&ReflectValue::I32(2))
        );

        let mut message = DynamicMessage::new(descriptor);
        message.set_field_by_name("order_id", ReflectValue::String("o-2".to_string()));
        message.set_field_by_name("voucher", ReflectValue::String("V".to_string()));
        message.set_field_by_name(
            "lines",
            ReflectValue::List(vec![ReflectValue::I64(7), ReflectValue::I64(8)]),
        );
        let decoded = from_binary(&registry, "shop.Order", &message.encode_to_vec()).unwrap();
        assert_eq!(decoded["order_id"], json!("o-2"));
        assert_eq!(decoded["voucher"], json!("V"));
        assert_eq!(decoded["card"], serde_json::Value::Null);
        assert_eq!(decoded["lines"], json!(["7", "8"]));
        assert_eq!(decoded["status"], json!("STATUS_UNKNOWN"));
    }

    #[test]
    fn test_cycle_between_units() {
        let registry = registry(&[
            ("a.proto", "syntax = \"proto3\"; package a; message A { b.B b = 1; }"),
            ("b.proto", "syntax = \"proto3\"; package b; message B { a.A a = 1; }"),
        ]);
        let err = file_descriptor_set(&registry).unwrap_err();
        assert!(matches!(err, Error::DescriptorBuild(_)));
    }

    #[test]
    fn test_unresolved_fields_left_out() {
        let registry = registry(&[(
            "m.proto",
            "syntax = \"proto3\"; package m; message M { Missing a = 1; string b = 2; }",
        )]);
        let pool = descriptor_pool(&registry).unwrap();
        let m = pool.get_message_by_name("m.M").unwrap();
        let names: Vec<String> = m.fields().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[test]
    fn test_upper_camel() {
        assert_eq!(upper_camel("tag_counts"), "TagCounts");
        assert_eq!(upper_camel("items"), "Items");
    }
}
