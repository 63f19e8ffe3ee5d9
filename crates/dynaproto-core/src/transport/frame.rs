//! grpc-web framing.
//!
//! Every frame is a 5-byte header followed by a payload:
//!
//! - 1 byte of flags: bit 0 marks a compressed payload, bit 7 a trailer
//!   frame
//! - 4 bytes of payload length, big-endian
//!
//! A trailer payload is text: newline-separated `key: value` pairs, with at
//! least `grpc-status` and optionally a percent-encoded `grpc-message`.

use super::status::Code;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use tracing::trace;

/// Size of the frame header
pub const HEADER_LEN: usize = 5;

/// Flag bit for a compressed payload
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Flag bit for a trailer frame
pub const FLAG_TRAILER: u8 = 0x80;

/// Frames an uncompressed message payload
pub fn encode_message(payload: &[u8]) -> Result<Bytes> {
    encode(0, payload)
}

/// Frames a trailer block
pub fn encode_trailers(trailers: &Trailers) -> Result<Bytes> {
    encode(FLAG_TRAILER, trailers.to_text().as_bytes())
}

fn encode(flags: u8, payload: &[u8]) -> Result<Bytes> {
    let length = frame_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(flags);
    buf.put_u32(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Payload length as carried in the 4-byte header
fn frame_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::internal(format!(
            "frame payload of {} bytes exceeds the 32-bit length prefix",
            len
        ))
    })
}

/// Trailer metadata, keys lower-cased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trailers {
    entries: IndexMap<String, String>,
}

impl Trailers {
    /// Builds trailers carrying a status and message
    pub fn from_status(code: Code, message: &str) -> Self {
        let mut trailers = Self::default();
        trailers.insert("grpc-status", code.value().to_string());
        if !message.is_empty() {
            trailers.insert("grpc-message", urlencoding::encode(message).into_owned());
        }
        trailers
    }

    /// Parses a trailer payload
    pub fn parse(text: &str) -> Self {
        let mut trailers = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            trailers.insert(key.trim(), value.trim());
        }
        trailers
    }

    /// Adds or replaces an entry
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Raw value of an entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// `grpc-status`, if present and numeric
    pub fn status(&self) -> Option<Code> {
        self.get("grpc-status").and_then(Code::parse)
    }

    /// Percent-decoded `grpc-message`, empty when absent
    pub fn message(&self) -> String {
        self.get("grpc-message").map(percent_decode).unwrap_or_default()
    }

    /// Fails with [`Error::Status`] when the status is present and non-zero
    pub fn check(&self) -> Result<()> {
        match self.status() {
            Some(code) if !code.is_ok() => Err(Error::status(code, self.message())),
            _ => Ok(()),
        }
    }

    /// Renders the trailer payload text
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}: {}\r\n", k, v))
            .collect()
    }
}

/// Percent-decodes a `grpc-message` value, keeping the raw text when it
/// does not decode to UTF-8
pub fn percent_decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// All frames of one response body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseFrames {
    /// Message payloads in arrival order
    pub messages: Vec<Bytes>,
    /// The terminating trailer frame, if any
    pub trailers: Option<Trailers>,
}

impl ResponseFrames {
    /// Fails if the trailers carry a non-zero status
    pub fn check(&self) -> Result<()> {
        match &self.trailers {
            Some(trailers) => trailers.check(),
            None => Ok(()),
        }
    }
}

/// Splits a response body into message frames and trailers.
///
/// Frames after the trailer frame are ignored.
pub fn parse_frames(body: &[u8]) -> Result<ResponseFrames> {
    if body.len() < HEADER_LEN {
        return Err(Error::malformed_response(format!(
            "empty or truncated response ({} bytes)",
            body.len()
        )));
    }

    let mut frames = ResponseFrames::default();
    let mut position = 0;

    while position < body.len() {
        let remaining = body.len() - position;
        if remaining < HEADER_LEN {
            return Err(Error::malformed_response(format!(
                "truncated frame header at offset {} ({} bytes)",
                position, remaining
            )));
        }

        let flags = body[position];
        let length = u32::from_be_bytes([
            body[position + 1],
            body[position + 2],
            body[position + 3],
            body[position + 4],
        ]) as usize;
        let start = position + HEADER_LEN;

        if flags & FLAG_TRAILER != 0 {
            let end = start.saturating_add(length);
            if end > body.len() {
                return Err(Error::malformed_response(format!(
                    "trailer frame at offset {} declares {} bytes but only {} remain",
                    position,
                    length,
                    body.len() - start
                )));
            }
            let text = String::from_utf8_lossy(&body[start..end]);
            trace!("Trailer frame at offset {}: {:?}", position, text);
            frames.trailers = Some(Trailers::parse(&text));
            if end < body.len() {
                trace!("Ignoring {} bytes after trailers", body.len() - end);
            }
            break;
        }

        if flags & FLAG_COMPRESSED != 0 {
            return Err(Error::malformed_response(format!(
                "compressed frame at offset {} is not supported",
                position
            )));
        }

        let end = start.saturating_add(length);
        if end > body.len() {
            return Err(Error::malformed_response(format!(
                "message frame at offset {} declares {} bytes but only {} remain",
                position,
                length,
                body.len() - start
            )));
        }

        trace!("Message frame at offset {} ({} bytes)", position, length);
        frames
            .messages
            .push(Bytes::copy_from_slice(&body[start..end]));
        position = end;
    }

    Ok(frames)
}

/// Decodes a unary response body to its single message payload.
///
/// A non-zero status in the trailers fails the call even when a message
/// frame was delivered before it.
pub fn decode_unary(body: &[u8]) -> Result<Bytes> {
    let frames = parse_frames(body)?;
    frames.check()?;
    frames
        .messages
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed_response("response carried no message frame"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_frame_round_trip_boundaries() {
        for len in [0usize, 1, 255, 256, 4096, 65536] {
            let data = payload(len);
            let frame = encode_message(&data).unwrap();
            assert_eq!(frame.len(), HEADER_LEN + len);
            assert_eq!(frame[0], 0);
            assert_eq!(&frame[1..5], &(len as u32).to_be_bytes());
            assert_eq!(decode_unary(&frame).unwrap().as_ref(), data.as_slice());
        }
    }

    #[test]
    fn test_trailers_only_status() {
        let body = encode(FLAG_TRAILER, b"grpc-status: 5\r\ngrpc-message: not%20found\r\n").unwrap();
        let err = decode_unary(&body).unwrap_err();
        match err {
            Error::Status { code, message } => {
                assert_eq!(code.name(), "NOT_FOUND");
                assert_eq!(message, "not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_four_bytes_is_truncated() {
        let err = decode_unary(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(err.to_string().contains("empty or truncated response"));

        let err = decode_unary(&[]).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_message_then_failing_trailers() {
        let mut body = encode_message(b"\x08\x01").unwrap().to_vec();
        body.extend_from_slice(&encode_trailers(&Trailers::from_status(
            Code::INTERNAL,
            "stream broke",
        )).unwrap());
        let err = decode_unary(&body).unwrap_err();
        assert_eq!(err.status_name().as_deref(), Some("INTERNAL"));
        assert!(err.to_string().contains("stream broke"));
    }

    #[test]
    fn test_message_then_ok_trailers() {
        let mut body = encode_message(b"hello").unwrap().to_vec();
        body.extend_from_slice(&encode_trailers(&Trailers::from_status(Code::OK, "")).unwrap());
        assert_eq!(decode_unary(&body).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn test_truncated_message_frame() {
        let mut body = encode_message(&payload(10)).unwrap().to_vec();
        body.truncate(9);
        let err = decode_unary(&body).unwrap_err();
        assert!(err.to_string().contains("declares 10 bytes"));
    }

    #[test]
    fn test_truncated_trailer_frame() {
        let mut body = vec![FLAG_TRAILER, 0, 0, 0, 100];
        body.extend_from_slice(b"grpc-status: 13");
        let err = parse_frames(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(err.to_string().contains("declares 100 bytes but only 15 remain"));

        let mut body = encode_message(b"ok").unwrap().to_vec();
        body.extend_from_slice(&[FLAG_TRAILER, 0, 0, 0, 9]);
        body.extend_from_slice(b"grpc-");
        assert!(decode_unary(&body).is_err());
    }

    #[test]
    fn test_frame_length_limit() {
        assert_eq!(frame_length(0).unwrap(), 0);
        assert_eq!(frame_length(u32::MAX as usize).unwrap(), u32::MAX);
        let err = frame_length(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_streamed_messages() {
        let mut body = Vec::new();
        body.extend_from_slice(&encode_message(b"one").unwrap());
        body.extend_from_slice(&encode_message(b"").unwrap());
        body.extend_from_slice(&encode_message(b"three").unwrap());
        body.extend_from_slice(&encode_trailers(&Trailers::from_status(Code::OK, "")).unwrap());

        let frames = parse_frames(&body).unwrap();
        let messages: Vec<&[u8]> = frames.messages.iter().map(|m| m.as_ref()).collect();
        assert_eq!(messages, vec![&b"one"[..], &b""[..], &b"three"[..]]);
        assert_eq!(frames.trailers.unwrap().status(), Some(Code::OK));
    }

    #[test]
    fn test_compressed_frame_rejected() {
        let body = encode(FLAG_COMPRESSED, b"zz").unwrap();
        assert!(decode_unary(&body).is_err());
    }

    #[test]
    fn test_trailers_parse_and_render() {
        let trailers = Trailers::parse("Grpc-Status: 3\ngrpc-message: bad%20input%3A%20x\nx-extra: y:z\n");
        assert_eq!(trailers.status(), Some(Code::from(3)));
        assert_eq!(trailers.message(), "bad input: x");
        assert_eq!(trailers.get("x-extra"), Some("y:z"));

        let rendered = Trailers::from_status(Code::NOT_FOUND, "not found").to_text();
        assert_eq!(rendered, "grpc-status: 5\r\ngrpc-message: not%20found\r\n");
    }

    #[test]
    fn test_trailers_only_ok_has_no_message() {
        let body = encode_trailers(&Trailers::from_status(Code::OK, "")).unwrap();
        let err = decode_unary(&body).unwrap_err();
        assert!(err.to_string().contains("no message frame"));
    }
}
