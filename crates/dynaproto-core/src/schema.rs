//! Loading a batch of IDL units into an immutable, shareable [`Schema`].
//!
//! Loading is lenient: a unit that fails to parse or merge is reported and
//! skipped, and the rest of the batch still loads. Unresolved references
//! are reported the same way and leave every other field usable.

use crate::error::{Error, Result};
use crate::export;
use crate::idl::{self, SourceUnit};
use crate::introspect::{self, FieldView};
use crate::marshal;
use crate::registry::{well_known, MessageDecl, MethodDecl, Registry, ServiceDecl};
use crate::resolve;
use crate::synth;
use prost_reflect::DescriptorPool;
use prost_types::FileDescriptorSet;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Accumulates units, then resolves them into a [`Schema`].
#[derive(Debug)]
pub struct SchemaLoader {
    registry: Registry,
    errors: Vec<Error>,
    loaded: usize,
}

impl SchemaLoader {
    /// Creates a loader seeded with the well-known types
    pub fn new() -> Result<Self> {
        Ok(Self {
            registry: Registry::with_well_known_types()?,
            errors: Vec::new(),
            loaded: 0,
        })
    }

    /// Parses and merges one unit. Returns false if it was rejected; the
    /// error is kept for the report.
    ///
    /// Units named like an embedded well-known unit are skipped, since
    /// their declarations are already present.
    pub fn add(&mut self, unit: &SourceUnit) -> bool {
        if well_known::is_well_known_unit(&unit.name) {
            debug!("Skipping {}: provided by the well-known types", unit.name);
            return true;
        }
        match idl::parse(unit, &mut self.registry) {
            Ok(()) => {
                self.loaded += 1;
                true
            }
            Err(err) => {
                warn!("Rejected {}: {}", unit.name, err);
                self.errors.push(err);
                false
            }
        }
    }

    /// Adds every unit, returning how many were accepted
    pub fn add_all<'a>(&mut self, units: impl IntoIterator<Item = &'a SourceUnit>) -> usize {
        units.into_iter().filter(|unit| self.add(unit)).count()
    }

    /// Resolves references and freezes the registry.
    pub fn finish(mut self) -> LoadReport {
        if let Err(unresolved) = resolve::resolve_all(&mut self.registry) {
            self.errors.extend(unresolved);
        }
        info!(
            "Loaded {} units with {} errors",
            self.loaded,
            self.errors.len()
        );
        LoadReport {
            schema: Schema {
                registry: Arc::new(self.registry),
            },
            errors: self.errors,
        }
    }
}

/// Loads a batch of units in one go.
pub fn load<'a>(units: impl IntoIterator<Item = &'a SourceUnit>) -> Result<LoadReport> {
    let mut loader = SchemaLoader::new()?;
    loader.add_all(units);
    Ok(loader.finish())
}

/// Outcome of a load: the usable schema plus every problem found
#[derive(Debug)]
pub struct LoadReport {
    /// Everything that loaded
    pub schema: Schema,
    /// Parse, duplicate and unresolved-reference errors
    pub errors: Vec<Error>,
}

impl LoadReport {
    /// True when nothing went wrong
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// The schema, or the first error if there was any
    pub fn into_result(self) -> Result<Schema> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.schema),
        }
    }
}

/// Presentation of an rpc
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodView {
    /// Fully-qualified service name
    pub service: String,
    /// Method name
    pub name: String,
    /// HTTP path, `/<service>/<method>`
    pub path: String,
    /// Fully-qualified request message, or the token as written
    pub input: String,
    /// Fully-qualified response message, or the token as written
    pub output: String,
    /// `stream` on the request
    pub client_streaming: bool,
    /// `stream` on the response
    pub server_streaming: bool,
    /// Both message types resolved
    pub resolved: bool,
}

impl MethodView {
    fn new(service: &ServiceDecl, method: &MethodDecl) -> Self {
        let input = method.input.message_name();
        let output = method.output.message_name();
        Self {
            service: service.full_name.clone(),
            name: method.name.clone(),
            path: method.path.clone(),
            input: input.unwrap_or(method.input.token()).to_string(),
            output: output.unwrap_or(method.output.token()).to_string(),
            client_streaming: method.client_streaming,
            server_streaming: method.server_streaming,
            resolved: input.is_some() && output.is_some(),
        }
    }
}

/// Presentation of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceView {
    /// Fully-qualified name
    pub full_name: String,
    /// Declaring unit
    pub origin: String,
    /// Methods in declaration order
    pub methods: Vec<MethodView>,
}

/// A resolved, read-only schema.
///
/// Cloning is cheap and the schema can be shared across threads.
#[derive(Debug, Clone)]
pub struct Schema {
    registry: Arc<Registry>,
}

impl Schema {
    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Looks up a message by fully-qualified name
    pub fn message(&self, name: &str) -> Result<&MessageDecl> {
        self.registry
            .message(name)
            .ok_or_else(|| Error::UnknownMessage(name.to_string()))
    }

    /// One-level field views of a message
    pub fn fields(&self, message: &str) -> Result<Vec<FieldView>> {
        let decl = self.message(message)?;
        Ok(introspect::fields(&self.registry, decl))
    }

    /// A fully populated default value of a message
    pub fn default_value(&self, message: &str) -> Result<Value> {
        let decl = self.message(message)?;
        Ok(synth::default_message(&self.registry, decl))
    }

    /// Finds a method by `/pkg.Service/Method`, `pkg.Service/Method` or
    /// `pkg.Service.Method`.
    pub fn method(&self, path: &str) -> Result<MethodView> {
        let trimmed = path.trim().trim_start_matches('/');
        let (service, name) = trimmed
            .rsplit_once('/')
            .or_else(|| trimmed.rsplit_once('.'))
            .ok_or_else(|| Error::UnknownMethod(path.to_string()))?;
        let service = self
            .registry
            .service(service)
            .ok_or_else(|| Error::UnknownMethod(path.to_string()))?;
        let method = service
            .method(name)
            .ok_or_else(|| Error::UnknownMethod(path.to_string()))?;

        let view = MethodView::new(service, method);
        if !view.resolved {
            let type_name = if method.input.message_name().is_none() {
                &view.input
            } else {
                &view.output
            };
            return Err(Error::UnresolvedReference {
                scope: view.service.clone(),
                member: view.name.clone(),
                type_name: type_name.clone(),
            });
        }
        Ok(view)
    }

    /// Every service, well-known or not
    pub fn services(&self) -> Vec<ServiceView> {
        self.registry
            .services()
            .into_iter()
            .map(|service| ServiceView {
                full_name: service.full_name.clone(),
                origin: service.origin.clone(),
                methods: service
                    .methods
                    .iter()
                    .map(|m| MethodView::new(service, m))
                    .collect(),
            })
            .collect()
    }

    /// Encodes a canonical value
    pub fn to_binary(&self, message: &str, value: &Value) -> Result<Vec<u8>> {
        marshal::to_binary(&self.registry, message, value)
    }

    /// Decodes bytes into a canonical value
    pub fn from_binary(&self, message: &str, bytes: &[u8]) -> Result<Value> {
        marshal::from_binary(&self.registry, message, bytes)
    }

    /// Checks a canonical value without keeping the encoding
    pub fn validate(&self, message: &str, value: &Value) -> Result<()> {
        marshal::validate(&self.registry, message, value)
    }

    /// Exports the schema as descriptors
    pub fn file_descriptor_set(&self) -> Result<FileDescriptorSet> {
        export::file_descriptor_set(&self.registry)
    }

    /// Builds a `prost-reflect` pool from the schema
    pub fn descriptor_pool(&self) -> Result<DescriptorPool> {
        export::descriptor_pool(&self.registry)
    }
}
