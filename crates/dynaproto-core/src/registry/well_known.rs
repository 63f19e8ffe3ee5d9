//! Well-known types.
//!
//! The standard `google.protobuf` messages are embedded as IDL text and
//! merged through the regular parser before any user unit, so references
//! such as `google.protobuf.Timestamp` resolve without the caller
//! supplying source text.

use super::Registry;
use crate::error::{Error, Result};
use crate::idl::{self, SourceUnit};
use tracing::debug;

/// Package holding every well-known type
pub const PACKAGE: &str = "google.protobuf";

/// Embedded well-known units as (unit identity, IDL text)
pub const UNITS: &[(&str, &str)] = &[
    ("google/protobuf/timestamp.proto", TIMESTAMP),
    ("google/protobuf/duration.proto", DURATION),
    ("google/protobuf/empty.proto", EMPTY),
    ("google/protobuf/any.proto", ANY),
    ("google/protobuf/wrappers.proto", WRAPPERS),
    ("google/protobuf/field_mask.proto", FIELD_MASK),
    ("google/protobuf/struct.proto", STRUCT),
];

const TIMESTAMP: &str = r#"
syntax = "proto3";
package google.protobuf;

message Timestamp {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const DURATION: &str = r#"
syntax = "proto3";
package google.protobuf;

message Duration {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const EMPTY: &str = r#"
syntax = "proto3";
package google.protobuf;

message Empty {}
"#;

const ANY: &str = r#"
syntax = "proto3";
package google.protobuf;

message Any {
  string type_url = 1;
  bytes value = 2;
}
"#;

const WRAPPERS: &str = r#"
syntax = "proto3";
package google.protobuf;

message DoubleValue { double value = 1; }
message FloatValue { float value = 1; }
message Int64Value { int64 value = 1; }
message UInt64Value { uint64 value = 1; }
message Int32Value { int32 value = 1; }
message UInt32Value { uint32 value = 1; }
message BoolValue { bool value = 1; }
message StringValue { string value = 1; }
message BytesValue { bytes value = 1; }
"#;

const FIELD_MASK: &str = r#"
syntax = "proto3";
package google.protobuf;

message FieldMask {
  repeated string paths = 1;
}
"#;

const STRUCT: &str = r#"
syntax = "proto3";
package google.protobuf;

message Struct {
  map<string, Value> fields = 1;
}

message Value {
  oneof kind {
    NullValue null_value = 1;
    double number_value = 2;
    string string_value = 3;
    bool bool_value = 4;
    Struct struct_value = 5;
    ListValue list_value = 6;
  }
}

enum NullValue {
  NULL_VALUE = 0;
}

message ListValue {
  repeated Value values = 1;
}
"#;

/// Merges every well-known unit into `registry`.
///
/// A failure here means the embedded text itself is broken, or the
/// registry already holds `google.protobuf` declarations.
pub fn seed(registry: &mut Registry) -> Result<()> {
    for (name, text) in UNITS {
        idl::parse(&SourceUnit::new(*name, *text), registry)
            .map_err(|e| Error::internal(format!("failed to seed {}: {}", name, e)))?;
    }
    debug!("Seeded {} well-known units", UNITS.len());
    Ok(())
}

/// Whether `unit` names one of the embedded well-known units
pub fn is_well_known_unit(unit: &str) -> bool {
    UNITS.iter().any(|(name, _)| *name == unit)
}
