//! # dynaproto-core
//!
//! A dynamic protobuf schema engine: load `.proto` text at runtime, inspect
//! it, synthesize example values, marshal canonical JSON values to and from
//! the binary wire format, and call grpc-web endpoints.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`registry`]: the declaration tree and the embedded well-known types
//! - [`idl`]: the IDL parser, one source unit at a time
//! - [`resolve`]: binds type names to declarations once a batch is merged
//! - [`schema`]: the loader and the immutable [`Schema`] it produces
//! - [`introspect`] and [`synth`]: field views and default values
//! - [`marshal`]: canonical value to binary and back
//! - [`transport`]: grpc-web framing and the HTTP client
//! - [`export`]: descriptor sets for `prost-reflect` and friends
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use dynaproto_core::{CallOptions, Client, ClientConfig, SchemaLoader, SourceUnit};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut loader = SchemaLoader::new()?;
//! loader.add(&SourceUnit::new("greeter.proto", std::fs::read_to_string("greeter.proto")?));
//! let report = loader.finish();
//! for err in &report.errors {
//!     eprintln!("{}", err);
//! }
//!
//! let schema = report.schema;
//! println!("{}", schema.default_value("demo.HelloRequest")?);
//!
//! let client = Client::new(ClientConfig::new("http://localhost:8080"))?;
//! let reply = client
//!     .unary(&schema, "/demo.Greeter/SayHello", &json!({"name": "Ada"}), &CallOptions::default())
//!     .await?;
//! println!("{}", reply);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod export;
pub mod idl;
pub mod introspect;
pub mod marshal;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod synth;
pub mod transport;

// Re-export primary types for convenience
pub use error::{Error, Result, TransportFailure};
pub use idl::SourceUnit;
pub use introspect::{FieldClass, FieldView, MapView};
pub use registry::Registry;
pub use schema::{load, LoadReport, MethodView, Schema, SchemaLoader, ServiceView};
pub use transport::{CallOptions, Client, ClientConfig, Code};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
