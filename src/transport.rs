//! Moving request bodies to a chat completion endpoint and bytes back.
//!
//! [`Transport`] is the seam between the [`Client`](crate::Client) and the network.  The client
//! encodes and decodes; the transport only posts bytes and hands back either a whole body or a
//! stream of text lines.  [`HttpTransport`] is the reqwest-backed implementation used in
//! production; tests substitute scripted transports.

use std::env;
use std::error;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::STREAM_BYTES;

/// Base URL used when none is configured.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/";

/// Environment variable consulted when no API key is given.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Lines of a streamed response body, without their terminators.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Carries encoded request bodies to a chat completion endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post `body` and return the whole response body.
    async fn send(&self, body: Vec<u8>) -> Result<Bytes>;

    /// Post `body` and return the response body as a stream of lines.
    ///
    /// Resolves once response headers arrive; the body is read as the stream is polled.
    async fn open_stream(&self, body: Vec<u8>) -> Result<LineStream>;
}

/// A [`Transport`] that speaks HTTPS to an OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    authorization: HeaderValue,
    client: ReqwestClient,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the default endpoint.
    ///
    /// The API key can be provided directly or read from the OPENAI_API_KEY environment
    /// variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a transport with custom settings.
    ///
    /// `timeout` bounds connecting and, for complete requests, the whole exchange.  For streamed
    /// requests it bounds the wait for response headers only.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        let mut authorization = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| Error::authentication("API key contains characters not allowed in a header"))?;
        authorization.set_sensitive(true);

        let endpoint = endpoint(base_url.as_deref().unwrap_or(DEFAULT_API_URL))?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            authorization,
            client,
            endpoint,
            timeout,
        })
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers.insert(header::AUTHORIZATION, self.authorization.clone());
        headers
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: Vec<u8>) -> Result<Bytes> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers("application/json"))
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(process_error_response(response).await);
        }

        response.bytes().await.map_err(|e| self.map_send_error(e))
    }

    async fn open_stream(&self, body: Vec<u8>) -> Result<LineStream> {
        let request = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers("text/event-stream"))
            .body(body)
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                Error::timeout(
                    "Timed out waiting for response headers",
                    Some(self.timeout.as_secs_f64()),
                )
            })?
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(process_error_response(response).await);
        }

        Ok(Box::pin(split_lines(response.bytes_stream())))
    }
}

/// Resolve `chat/completions` against `base_url`, treating the base as a directory.
fn endpoint(base_url: &str) -> Result<Url> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|url| url.join("chat/completions"))
        .map_err(|e| Error::url(format!("invalid base URL {base_url:?}: {e}"), Some(e)))
}

/// Process API response errors and convert to our Error type
async fn process_error_response(response: Response) -> Error {
    let status_code = response.status().as_u16();

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<u64>().ok());

    let error_body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(
                format!("Failed to read error response: {e}"),
                Some(Box::new(e)),
            );
        }
    };
    error_from_body(status_code, retry_after, &error_body)
}

/// Map a failed response to an [`Error`].
///
/// OpenAI-compatible servers report failures as `{"error": {"message", "type", "param"}}`; any
/// other body is used verbatim as the message.
fn error_from_body(status_code: u16, retry_after: Option<u64>, body: &str) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        error_type: Option<String>,
        message: Option<String>,
        param: Option<String>,
    }

    let detail = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error);
    let (error_type, message, param) = match detail {
        Some(detail) => (
            detail.error_type,
            detail.message.unwrap_or_else(|| body.to_string()),
            detail.param,
        ),
        None => (None, body.to_string(), None),
    };

    match status_code {
        400 => Error::bad_request(message, param),
        401 => Error::authentication(message),
        403 => Error::permission(message),
        404 => Error::not_found(message),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500 => Error::internal_server(message),
        502..=504 => Error::service_unavailable(message, retry_after),
        _ => Error::api(status_code, error_type, message),
    }
}

/// Split a byte stream into lines.
///
/// Lines end at `\n`; a trailing `\r` is dropped.  A final line without a terminator is yielded
/// when the body ends.  Bytes that are not valid UTF-8 are replaced with U+FFFD.  The first error
/// from the underlying stream is yielded and ends the stream.
pub(crate) fn split_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: error::Error + Send + Sync + 'static,
{
    let stream = Box::pin(byte_stream);
    stream::unfold(Some((stream, BytesMut::new(), 0)), |state| async move {
        let (mut stream, mut buffer, mut searched) = state?;
        loop {
            // Bytes before `searched` are known to hold no newline.
            if let Some(offset) = buffer[searched..].iter().position(|b| *b == b'\n') {
                let line = buffer.split_to(searched + offset + 1);
                return Some((Ok(line_to_string(&line)), Some((stream, buffer, 0))));
            }
            searched = buffer.len();

            match stream.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    buffer.extend_from_slice(&bytes);
                }
                Some(Err(e)) => {
                    return Some((
                        Err(Error::streaming(
                            format!("Error in HTTP stream: {e}"),
                            Some(Box::new(e)),
                        )),
                        None,
                    ));
                }
                None => {
                    if buffer.is_empty() {
                        return None;
                    }
                    return Some((Ok(line_to_string(&buffer)), None));
                }
            }
        }
    })
}

fn line_to_string(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Send + 'static {
        let parts: Vec<std::result::Result<Bytes, io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        stream::iter(parts)
    }

    async fn collect(parts: &[&'static [u8]]) -> Vec<String> {
        split_lines(chunks(parts))
            .map(|line| line.unwrap())
            .collect()
            .await
    }

    #[test]
    fn transport_creation() {
        let transport = HttpTransport::new(Some("test-key".to_string())).unwrap();
        assert_eq!(
            transport.endpoint().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(transport.timeout(), DEFAULT_TIMEOUT);

        let transport = HttpTransport::with_options(
            Some("test-key".to_string()),
            Some("http://localhost:11434/v1".to_string()),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(
            transport.endpoint().as_str(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(transport.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let err = HttpTransport::with_options(
            Some("test-key".to_string()),
            Some("not a url".to_string()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }

    #[test]
    fn api_key_with_newline_is_rejected() {
        let err = HttpTransport::new(Some("bad\nkey".to_string())).unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn error_bodies_map_by_status() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","param":null}}"#;
        let err = error_from_body(401, None, body);
        assert!(err.is_authentication());
        assert_eq!(err.to_string(), "Authentication error: Incorrect API key provided");

        let body = r#"{"error":{"message":"bad temperature","type":"invalid_request_error","param":"temperature"}}"#;
        let err = error_from_body(400, None, body);
        assert_eq!(
            err.to_string(),
            "Bad request: bad temperature (parameter: temperature)"
        );

        let err = error_from_body(429, Some(20), r#"{"error":{"message":"slow down"}}"#);
        assert!(err.is_rate_limit());

        let err = error_from_body(418, None, "I'm a teapot");
        assert_eq!(err.status_code(), Some(418));
        assert_eq!(err.to_string(), "API error: I'm a teapot (status 418)");

        assert!(error_from_body(503, None, "").is_server_error());
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let lines = collect(&[b"data: {\"a\"", b":1}\n\nda", b"ta: [DONE]\n"]).await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn many_lines_in_one_chunk_and_one_line_in_many_chunks() {
        let body: String = (0..1000).map(|i| format!("data: {i}\n")).collect();
        let parts = vec![Ok::<_, io::Error>(Bytes::from(body))];
        let lines: Vec<String> = split_lines(stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines.len(), 1000);
        assert_eq!(lines[0], "data: 0");
        assert_eq!(lines[999], "data: 999");

        let mut parts: Vec<std::result::Result<Bytes, io::Error>> =
            (0..500).map(|_| Ok(Bytes::from_static(b"ab"))).collect();
        parts.push(Ok(Bytes::from_static(b"\r\nnext")));
        let lines: Vec<String> = split_lines(stream::iter(parts))
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["ab".repeat(500), "next".to_string()]);
    }

    #[tokio::test]
    async fn crlf_is_stripped_and_final_line_kept() {
        let lines = collect(&[b"one\r\ntwo\r\nthree"]).await;
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks() {
        let lines = collect(&[b"caf\xc3", b"\xa9\n"]).await;
        assert_eq!(lines, vec!["caf\u{e9}"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let lines = collect(&[b"ok\n\xff\xfe\n"]).await;
        assert_eq!(lines, vec!["ok".to_string(), "\u{fffd}\u{fffd}".to_string()]);
    }

    #[tokio::test]
    async fn stream_error_ends_the_lines() {
        let parts: Vec<std::result::Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"first\nsecond")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never\n")),
        ];
        let results: Vec<_> = split_lines(stream::iter(parts)).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "first");
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(err, Error::Streaming { .. }));
    }
}
