//! Type resolution.
//!
//! Runs once after every unit of a batch has been merged. Each named type
//! token is looked up in the enclosing scope chain, innermost first, ending
//! at the registry root; a leading dot skips straight to the root. The
//! result is a [`Target`] naming the declaration, never a copy of it.
//!
//! Resolution is two-phase: targets are computed against an immutable view
//! of the registry, then written back. Unresolved references are reported
//! but leave every other field usable.

use crate::error::Error;
use crate::registry::{qualify, Node, Registry, Target, TypeRef};
use tracing::{debug, warn};

enum Slot {
    Field(usize),
    Input(usize),
    Output(usize),
}

struct Binding {
    owner: String,
    slot: Slot,
    target: Target,
}

/// Resolves every named reference in `registry`.
///
/// Returns one [`Error::UnresolvedReference`] per field or method type that
/// did not resolve. Those references are marked [`Target::Unresolved`].
pub fn resolve_all(registry: &mut Registry) -> Result<(), Vec<Error>> {
    let mut bindings = Vec::new();
    let mut unresolved = Vec::new();

    for message in registry.messages() {
        for (index, field) in message.fields.iter().enumerate() {
            if let TypeRef::Named { token, .. } = &field.ty {
                let target = resolve_name(registry, &message.full_name, token);
                if target == Target::Unresolved {
                    unresolved.push(Error::UnresolvedReference {
                        scope: message.full_name.clone(),
                        member: field.name.clone(),
                        type_name: token.clone(),
                    });
                }
                bindings.push(Binding {
                    owner: message.full_name.clone(),
                    slot: Slot::Field(index),
                    target,
                });
            }
        }
    }

    for service in registry.services() {
        for (index, method) in service.methods.iter().enumerate() {
            for (ty, slot) in [
                (&method.input, Slot::Input(index)),
                (&method.output, Slot::Output(index)),
            ] {
                let TypeRef::Named { token, .. } = ty else {
                    // A scalar keyword can never be a method type.
                    unresolved.push(Error::UnresolvedReference {
                        scope: service.full_name.clone(),
                        member: method.name.clone(),
                        type_name: ty.token().to_string(),
                    });
                    continue;
                };
                let target = match resolve_name(registry, &service.full_name, token) {
                    Target::Message(name) => Target::Message(name),
                    _ => {
                        unresolved.push(Error::UnresolvedReference {
                            scope: service.full_name.clone(),
                            member: method.name.clone(),
                            type_name: token.clone(),
                        });
                        Target::Unresolved
                    }
                };
                bindings.push(Binding {
                    owner: service.full_name.clone(),
                    slot,
                    target,
                });
            }
        }
    }

    let total = bindings.len();
    for binding in bindings {
        apply(registry, binding);
    }

    debug!(
        "Resolved {} references ({} unresolved)",
        total,
        unresolved.len()
    );
    for error in &unresolved {
        warn!("{}", error);
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(unresolved)
    }
}

/// Resolves `token` as seen from inside `scope`.
pub fn resolve_name(registry: &Registry, scope: &str, token: &str) -> Target {
    if let Some(absolute) = token.strip_prefix('.') {
        return classify(registry.lookup(absolute));
    }

    let mut scope = scope;
    loop {
        let candidate = qualify(scope, token);
        if let Some(node) = registry.lookup(&candidate).filter(|n| n.is_type()) {
            return classify(Some(node));
        }
        if scope.is_empty() {
            return Target::Unresolved;
        }
        scope = scope.rfind('.').map(|i| &scope[..i]).unwrap_or("");
    }
}

fn classify(node: Option<&Node>) -> Target {
    match node {
        Some(Node::Message(m)) => Target::Message(m.full_name.clone()),
        Some(Node::Enum(e)) => Target::Enum(e.full_name.clone()),
        _ => Target::Unresolved,
    }
}

fn apply(registry: &mut Registry, binding: Binding) {
    let Binding {
        owner,
        slot,
        target,
    } = binding;
    let ty = match slot {
        Slot::Field(index) => registry
            .message_mut(&owner)
            .and_then(|m| m.fields.get_mut(index))
            .map(|f| &mut f.ty),
        Slot::Input(index) => registry
            .service_mut(&owner)
            .and_then(|s| s.methods.get_mut(index))
            .map(|m| &mut m.input),
        Slot::Output(index) => registry
            .service_mut(&owner)
            .and_then(|s| s.methods.get_mut(index))
            .map(|m| &mut m.output),
    };
    if let Some(TypeRef::Named { target: slot, .. }) = ty {
        *slot = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::{parse, SourceUnit};

    fn load(sources: &[(&str, &str)]) -> (Registry, Vec<Error>) {
        let mut registry = Registry::with_well_known_types().unwrap();
        for (name, text) in sources {
            parse(&SourceUnit::new(*name, *text), &mut registry).unwrap();
        }
        let errors = resolve_all(&mut registry).err().unwrap_or_default();
        (registry, errors)
    }

    #[test]
    fn test_self_reference_binds_by_name() {
        let (registry, errors) = load(&[(
            "node.proto",
            "syntax = \"proto3\"; package demo; message Node { string id = 1; Node next = 2; }",
        )]);
        assert!(errors.is_empty());
        let node = registry.message("demo.Node").unwrap();
        assert_eq!(node.fields[1].ty.message_name(), Some("demo.Node"));
    }

    #[test]
    fn test_innermost_scope_wins() {
        let (registry, errors) = load(&[(
            "scope.proto",
            r#"
            syntax = "proto3";
            package a;
            message Inner { int32 top = 1; }
            message Outer {
              message Inner { int32 nested = 1; }
              Inner x = 1;
              .a.Inner y = 2;
            }
            "#,
        )]);
        assert!(errors.is_empty());
        let outer = registry.message("a.Outer").unwrap();
        assert_eq!(outer.fields[0].ty.message_name(), Some("a.Outer.Inner"));
        assert_eq!(outer.fields[1].ty.message_name(), Some("a.Inner"));
    }

    #[test]
    fn test_parent_package_and_cross_unit() {
        let (registry, errors) = load(&[
            (
                "b.proto",
                "syntax = \"proto3\"; package a.b; message M { c.T t = 1; c.Level level = 2; }",
            ),
            (
                "c.proto",
                "syntax = \"proto3\"; package a.c; message T {} enum Level { LOW = 0; }",
            ),
        ]);
        assert!(errors.is_empty());
        let m = registry.message("a.b.M").unwrap();
        assert_eq!(m.fields[0].ty.message_name(), Some("a.c.T"));
        assert_eq!(m.fields[1].ty.enum_name(), Some("a.c.Level"));
    }

    #[test]
    fn test_well_known_types_resolve_without_sources() {
        let (registry, errors) = load(&[(
            "event.proto",
            r#"
            syntax = "proto3";
            package demo;
            message Event {
              google.protobuf.Timestamp at = 1;
              google.protobuf.Struct payload = 2;
            }
            "#,
        )]);
        assert!(errors.is_empty());
        let event = registry.message("demo.Event").unwrap();
        assert_eq!(
            event.fields[0].ty.message_name(),
            Some("google.protobuf.Timestamp")
        );
        let value = registry.message("google.protobuf.Struct").unwrap();
        assert_eq!(value.fields[0].ty.message_name(), Some("google.protobuf.Value"));
    }

    #[test]
    fn test_unresolved_is_reported_per_field() {
        let (registry, errors) = load(&[(
            "broken.proto",
            "syntax = \"proto3\"; package demo; message M { Missing a = 1; string b = 2; }",
        )]);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Error::UnresolvedReference {
                scope,
                member,
                type_name,
            } => {
                assert_eq!(scope, "demo.M");
                assert_eq!(member, "a");
                assert_eq!(type_name, "Missing");
            }
            other => panic!("unexpected error: {other}"),
        }
        let m = registry.message("demo.M").unwrap();
        assert_eq!(m.fields.len(), 2);
        assert!(m.fields[0].ty.is_unresolved());
    }

    #[test]
    fn test_method_types() {
        let (registry, errors) = load(&[(
            "svc.proto",
            r#"
            syntax = "proto3";
            package demo;
            enum E { A = 0; }
            message Req {}
            service S {
              rpc Ok (Req) returns (google.protobuf.Empty);
              rpc Bad (E) returns (Req);
            }
            "#,
        )]);
        assert_eq!(errors.len(), 1);
        let service = registry.service("demo.S").unwrap();
        assert_eq!(service.methods[0].input.message_name(), Some("demo.Req"));
        assert_eq!(
            service.methods[0].output.message_name(),
            Some("google.protobuf.Empty")
        );
        assert!(service.methods[1].input.is_unresolved());
    }

    #[test]
    fn test_namespace_is_not_a_type() {
        let registry = Registry::with_well_known_types().unwrap();
        assert_eq!(
            resolve_name(&registry, "", "google.protobuf"),
            Target::Unresolved
        );
        assert_eq!(
            resolve_name(&registry, "x.y", "google.protobuf.Any"),
            Target::Message("google.protobuf.Any".to_string())
        );
    }
}
