//! HTTP client for grpc-web unary and server-streaming calls.

use super::frame::{self, percent_decode, ResponseFrames};
use super::status::Code;
use crate::error::{Error, Result, TransportFailure};
use crate::schema::{MethodView, Schema};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Content type of every request and expected response
pub const GRPC_WEB_CONTENT_TYPE: &str = "application/grpc-web+proto";

/// Connection settings shared by every call of a [`Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL; the method path is appended to it
    pub base_url: String,
    /// Headers sent with every call
    pub headers: Vec<(String, String)>,
    /// Default per-call deadline
    pub timeout: Option<Duration>,
    /// TCP connect timeout
    pub connect_timeout: Option<Duration>,
    /// `user-agent` header
    pub user_agent: String,
}

impl ClientConfig {
    /// Creates a config for `base_url` with no deadline
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: format!("dynaproto/{}", crate::VERSION),
        }
    }

    /// Adds a header sent with every call
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the default deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Per-call settings
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra headers; these override config headers and protocol defaults
    pub headers: Vec<(String, String)>,
    /// Deadline for this call, overriding the config default
    pub timeout: Option<Duration>,
    /// Cancels the call when triggered
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Adds a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// grpc-web client over HTTP/1.1
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// Builds the client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| Error::transport(TransportFailure::Request, e.to_string()))?;
        Ok(Self { http, config })
    }

    /// The config this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs a unary call of `method`, taking and returning canonical
    /// values.
    ///
    /// The request is validated and encoded before anything is sent.
    pub async fn unary(
        &self,
        schema: &Schema,
        method: &str,
        request: &Value,
        options: &CallOptions,
    ) -> Result<Value> {
        let method = schema.method(method)?;
        let payload = schema.to_binary(&method.input, request)?;
        let response = self.invoke(&method, &payload, options).await?;
        schema.from_binary(&method.output, &response)
    }

    /// Performs a server-streaming call, collecting every response message.
    pub async fn server_streaming(
        &self,
        schema: &Schema,
        method: &str,
        request: &Value,
        options: &CallOptions,
    ) -> Result<Vec<Value>> {
        let method = schema.method(method)?;
        let payload = schema.to_binary(&method.input, request)?;
        let body = self.post(&method.path, &payload, options).await?;
        let frames: ResponseFrames = frame::parse_frames(&body)?;
        frames.check()?;
        frames
            .messages
            .iter()
            .map(|message| schema.from_binary(&method.output, message))
            .collect()
    }

    /// Sends an already-encoded request and returns the raw response
    /// message.
    pub async fn invoke(
        &self,
        method: &MethodView,
        payload: &[u8],
        options: &CallOptions,
    ) -> Result<Bytes> {
        let body = self.post(&method.path, payload, options).await?;
        frame::decode_unary(&body)
    }

    async fn post(&self, path: &str, payload: &[u8], options: &CallOptions) -> Result<Bytes> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let headers = self.headers(options)?;
        debug!("POST {} ({} byte request)", url, payload.len());

        let request = self
            .http
            .post(&url)
            .headers(headers)
            .body(frame::encode_message(payload)?);

        let exchange = async move {
            let response = request.send().await.map_err(send_failure)?;
            let status = response.status();
            trace!("HTTP {} from {}", status, url);

            // Trailers-only responses carry the status in the headers.
            check_header_status(response.headers())?;
            if !status.is_success() {
                return Err(Error::transport(
                    TransportFailure::HttpStatus(status.as_u16()),
                    format!("{} answered {}", url, status),
                ));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| Error::transport(TransportFailure::Body, e.to_string()))?;
            Ok::<Bytes, Error>(body)
        };

        let deadline = options.timeout.or(self.config.timeout);
        let bounded = async move {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, exchange).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::DeadlineExceeded { timeout: limit }),
                },
                None => exchange.await,
            }
        };

        match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }

    fn headers(&self, options: &CallOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_WEB_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(GRPC_WEB_CONTENT_TYPE));
        headers.insert("x-grpc-web", HeaderValue::from_static("1"));

        for (name, value) in self.config.headers.iter().chain(&options.headers) {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::transport(TransportFailure::Request, format!("header '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::transport(TransportFailure::Request, format!("header '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn send_failure(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_builder() {
        TransportFailure::Request
    } else {
        TransportFailure::Connect
    };
    Error::transport(kind, err.to_string())
}

fn check_header_status(headers: &HeaderMap) -> Result<()> {
    let Some(code) = headers
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(Code::parse)
    else {
        return Ok(());
    };
    if code.is_ok() {
        return Ok(());
    }
    let message = headers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .map(percent_decode)
        .unwrap_or_default();
    Err(Error::status(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::SourceUnit;
    use crate::schema::SchemaLoader;
    use crate::transport::frame::{encode_message, encode_trailers, Trailers};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const PROTO: &str = r#"
        syntax = "proto3";
        package demo;
        message GetUser { string id = 1; }
        message User { string id = 1; string name = 2; int64 karma = 3; }
        service Users {
          rpc Get (GetUser) returns (User);
          rpc List (GetUser) returns (stream User);
        }
    "#;

    fn schema() -> Schema {
        let mut loader = SchemaLoader::new().unwrap();
        loader.add(&SourceUnit::new("users.proto", PROTO));
        let report = loader.finish();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        report.schema
    }

    struct Reply {
        status_line: &'static str,
        headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    }

    impl Reply {
        fn ok(body: Vec<u8>) -> Self {
            Self {
                status_line: "200 OK",
                headers: vec![],
                body,
            }
        }
    }

    /// Serves one request and hands back its raw head and body.
    async fn serve_once(reply: Option<Reply>) -> (String, oneshot::Receiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return;
                }
                data.extend_from_slice(&chunk[..n]);
                if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&data[..head_end]).to_string();
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while data.len() < head_end + length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send((head, data[head_end..].to_vec()));

            let Some(reply) = reply else {
                // Hold the connection open without answering.
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            };
            let mut response = format!(
                "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n",
                reply.status_line,
                GRPC_WEB_CONTENT_TYPE,
                reply.body.len()
            );
            for (name, value) in &reply.headers {
                response.push_str(&format!("{}: {}\r\n", name, value));
            }
            response.push_str("\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(&reply.body).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{}", addr), rx)
    }

    fn ok_body(schema: &Schema, user: &Value) -> Vec<u8> {
        let payload = schema.to_binary("demo.User", user).unwrap();
        let mut body = encode_message(&payload).unwrap().to_vec();
        body.extend_from_slice(&encode_trailers(&Trailers::from_status(Code::OK, "")).unwrap());
        body
    }

    #[tokio::test]
    async fn test_unary_round_trip() {
        let schema = schema();
        let user = json!({"id": "u1", "name": "Ada", "karma": "42"});
        let (url, request) = serve_once(Some(Reply::ok(ok_body(&schema, &user)))).await;

        let client = Client::new(ClientConfig::new(url).header("x-team", "core")).unwrap();
        let options = CallOptions::default().header("accept", "application/grpc-web");
        let response = client
            .unary(&schema, "/demo.Users/Get", &json!({"id": "u1"}), &options)
            .await
            .unwrap();
        assert_eq!(response, user);

        let (head, body) = request.await.unwrap();
        let head = head.to_ascii_lowercase();
        assert!(head.starts_with("post /demo.users/get http/1.1"));
        assert!(head.contains("content-type: application/grpc-web+proto"));
        assert!(head.contains("x-grpc-web: 1"));
        assert!(head.contains("x-team: core"));
        assert!(head.contains("accept: application/grpc-web\r\n"));

        let expected = schema.to_binary("demo.GetUser", &json!({"id": "u1"})).unwrap();
        assert_eq!(body, encode_message(&expected).unwrap().to_vec());
    }

    #[tokio::test]
    async fn test_status_in_trailers() {
        let schema = schema();
        let body = encode_trailers(&Trailers::from_status(Code::NOT_FOUND, "no such user")).unwrap().to_vec();
        let (url, _request) = serve_once(Some(Reply::ok(body))).await;

        let client = Client::new(ClientConfig::new(url)).unwrap();
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({"id": "x"}), &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_name().as_deref(), Some("NOT_FOUND"));
        assert_eq!(err.to_string(), "NOT_FOUND: no such user");
    }

    #[tokio::test]
    async fn test_status_in_headers() {
        let schema = schema();
        let reply = Reply {
            status_line: "200 OK",
            headers: vec![
                ("grpc-status", "7".to_string()),
                ("grpc-message", "go%20away".to_string()),
            ],
            body: vec![],
        };
        let (url, _request) = serve_once(Some(reply)).await;

        let client = Client::new(ClientConfig::new(url)).unwrap();
        let err = client
            .unary(&schema, "demo.Users.Get", &json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "PERMISSION_DENIED: go away");
    }

    #[tokio::test]
    async fn test_http_failure() {
        let schema = schema();
        let reply = Reply {
            status_line: "503 Service Unavailable",
            headers: vec![],
            body: b"down".to_vec(),
        };
        let (url, _request) = serve_once(Some(reply)).await;

        let client = Client::new(ClientConfig::new(url)).unwrap();
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                kind: TransportFailure::HttpStatus(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_never_sent() {
        let schema = schema();
        let client = Client::new(ClientConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({"id": 5}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let err = client
            .unary(&schema, "demo.Users/Missing", &json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMethod(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let schema = schema();
        let (url, _request) = serve_once(None).await;
        let client = Client::new(ClientConfig::new(url)).unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let options = CallOptions::default().cancel(token);
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({}), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline() {
        let schema = schema();
        let (url, _request) = serve_once(None).await;
        let client = Client::new(ClientConfig::new(url)).unwrap();

        let options = CallOptions::default().timeout(Duration::from_millis(50));
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({}), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let schema = schema();
        let client = Client::new(ClientConfig::new(format!("http://{}", addr))).unwrap();
        let err = client
            .unary(&schema, "demo.Users/Get", &json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_server_streaming_collects_frames() {
        let schema = schema();
        let mut body = Vec::new();
        for id in ["a", "b"] {
            let payload = schema.to_binary("demo.User", &json!({"id": id})).unwrap();
            body.extend_from_slice(&encode_message(&payload).unwrap());
        }
        body.extend_from_slice(&encode_trailers(&Trailers::from_status(Code::OK, "")).unwrap());
        let (url, _request) = serve_once(Some(Reply::ok(body))).await;

        let client = Client::new(ClientConfig::new(url)).unwrap();
        let users = client
            .server_streaming(&schema, "demo.Users/List", &json!({}), &CallOptions::default())
            .await
            .unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(users[0]["karma"], json!("0"));
    }
}
