//! grpc-web transport: framing, status codes and the HTTP client.

pub mod client;
pub mod frame;
pub mod status;

pub use client::{CallOptions, Client, ClientConfig};
pub use frame::{decode_unary, parse_frames, ResponseFrames, Trailers};
pub use status::Code;
