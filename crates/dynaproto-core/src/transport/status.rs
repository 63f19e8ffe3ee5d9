//! grpc status codes.

use std::borrow::Cow;

const NAMES: [&str; 17] = [
    "OK",
    "CANCELLED",
    "UNKNOWN",
    "INVALID_ARGUMENT",
    "DEADLINE_EXCEEDED",
    "NOT_FOUND",
    "ALREADY_EXISTS",
    "PERMISSION_DENIED",
    "RESOURCE_EXHAUSTED",
    "FAILED_PRECONDITION",
    "ABORTED",
    "OUT_OF_RANGE",
    "UNIMPLEMENTED",
    "INTERNAL",
    "UNAVAILABLE",
    "DATA_LOSS",
    "UNAUTHENTICATED",
];

/// A grpc status code as received on the wire.
///
/// Codes outside the canonical table are kept as-is and render as
/// `CODE_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(i32);

impl Code {
    /// Success
    pub const OK: Code = Code(0);
    /// The operation was cancelled
    pub const CANCELLED: Code = Code(1);
    /// Unknown error
    pub const UNKNOWN: Code = Code(2);
    /// Entity not found
    pub const NOT_FOUND: Code = Code(5);
    /// Internal error
    pub const INTERNAL: Code = Code(13);
    /// Service unavailable
    pub const UNAVAILABLE: Code = Code(14);
    /// Missing or bad credentials
    pub const UNAUTHENTICATED: Code = Code(16);

    /// The numeric value
    pub fn value(&self) -> i32 {
        self.0
    }

    /// Whether this is `OK`
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// Canonical name, `CODE_<n>` for codes outside the table
    pub fn name(&self) -> Cow<'static, str> {
        usize::try_from(self.0)
            .ok()
            .and_then(|i| NAMES.get(i))
            .map(|name| Cow::Borrowed(*name))
            .unwrap_or_else(|| Cow::Owned(format!("CODE_{}", self.0)))
    }

    /// Parses the text form found in `grpc-status`
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<i32>().ok().map(Code)
    }
}

impl From<i32> for Code {
    fn from(value: i32) -> Self {
        Code(value)
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}
