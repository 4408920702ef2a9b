use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use futures::future;
use futures::stream::{self, StreamExt};

use crate::client_logger::ClientLogger;
use crate::codec::{self, StreamEvent};
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_DURATION,
    STREAM_ERRORS, STREAM_FRAGMENTS, STREAM_LINES, STREAM_REQUESTS, STREAM_SKIPPED_LINES,
    STREAM_TTFB,
};
use crate::transport::{HttpTransport, LineStream, Transport};
use crate::types::{Message, Model};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// What a streamed request produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Every fragment, concatenated.
    pub text: String,
    /// How many fragments were delivered.
    pub fragments: usize,
    /// True if the server sent the `[DONE]` marker.  False if the body simply ended.
    pub completed: bool,
}

/// Client for OpenAI-compatible chat completion APIs.
///
/// Cloning is cheap; clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    model: Model,
    idle_timeout: Duration,
    logger: Option<Arc<dyn ClientLogger>>,
}

impl Client {
    /// Create a new client that talks to the default endpoint.
    ///
    /// The API key can be provided directly or read from the OPENAI_API_KEY environment
    /// variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new(api_key)?)))
    }

    /// Create a new client over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            model: Model::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            logger: None,
        }
    }

    /// Use `model` for subsequent requests.
    pub fn with_model(mut self, model: impl Into<Model>) -> Self {
        self.model = model.into();
        self
    }

    /// Fail a stream that goes `idle_timeout` without producing a line.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Report every request and response to `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<Model>) {
        self.model = model.into();
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Send `transcript` and wait for the whole assistant reply.
    pub async fn complete(&self, transcript: &[Message]) -> Result<String> {
        let start = Instant::now();
        CLIENT_REQUESTS.click();
        let result = self.complete_inner(transcript).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if result.is_err() {
            CLIENT_REQUEST_ERRORS.click();
        }
        result
    }

    async fn complete_inner(&self, transcript: &[Message]) -> Result<String> {
        let request = codec::build_request(&self.model, transcript, false);
        if let Some(logger) = &self.logger {
            logger.log_request(&request);
        }
        let body = codec::encode(&request)?;
        let bytes = self.transport.send(body).await?;
        let completion = codec::decode_completion(&bytes)?;
        if let Some(logger) = &self.logger {
            logger.log_response(&completion);
        }
        codec::completion_content(&completion)
    }

    /// Send `transcript` as a streamed request and call `on_fragment` with each piece of text
    /// in arrival order.
    ///
    /// Returns when the server sends `[DONE]` or the body ends.  On error, fragments delivered
    /// before the failure have already been passed to `on_fragment`.
    pub async fn stream<F>(&self, transcript: &[Message], mut on_fragment: F) -> Result<StreamSummary>
    where
        F: FnMut(&str),
    {
        let start = Instant::now();
        STREAM_REQUESTS.click();
        let mut events = self.open_events(transcript).await?;
        let mut summary = StreamSummary::default();
        let mut failure = None;
        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::Fragment(text)) => {
                    if summary.fragments == 0 {
                        STREAM_TTFB.add(start.elapsed().as_secs_f64());
                    }
                    summary.fragments += 1;
                    on_fragment(&text);
                    summary.text.push_str(&text);
                }
                Ok(StreamEvent::Done) => {
                    summary.completed = true;
                    break;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        // Failed streams are timed and logged too.
        STREAM_DURATION.add(start.elapsed().as_secs_f64());
        if let Some(logger) = &self.logger {
            logger.log_stream_complete(&summary.text);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Send `transcript` as a streamed request and return its fragments as a stream.
    ///
    /// The stream is lazy: nothing past the response headers is read until it is polled.  It ends
    /// after `[DONE]`, at the end of the body, or after yielding one error.
    pub async fn fragments(
        &self,
        transcript: &[Message],
    ) -> Result<impl Stream<Item = Result<String>> + Send + 'static> {
        STREAM_REQUESTS.click();
        let events = self.open_events(transcript).await?;
        Ok(events.filter_map(|event| {
            future::ready(match event {
                Ok(StreamEvent::Fragment(text)) => Some(Ok(text)),
                Ok(StreamEvent::Done) => None,
                Err(e) => Some(Err(e)),
            })
        }))
    }

    async fn open_events(&self, transcript: &[Message]) -> Result<EventStream> {
        let request = codec::build_request(&self.model, transcript, true);
        if let Some(logger) = &self.logger {
            logger.log_request(&request);
        }
        let body = codec::encode(&request)?;
        let lines = self.transport.open_stream(body).await.inspect_err(|_| {
            STREAM_ERRORS.click();
        })?;
        Ok(Box::pin(decode_events(
            lines,
            self.idle_timeout,
            self.logger.clone(),
        )))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("model", &self.model)
            .field("idle_timeout", &self.idle_timeout)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

/// Turn lines into events, dropping lines that carry nothing.
///
/// The stream ends after [`StreamEvent::Done`], at the end of the lines, or after one error.
fn decode_events(
    lines: LineStream,
    idle_timeout: Duration,
    logger: Option<Arc<dyn ClientLogger>>,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static {
    stream::unfold(Some(lines), move |state| {
        let logger = logger.clone();
        async move {
            let mut lines = state?;
            loop {
                let next = match tokio::time::timeout(idle_timeout, lines.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        STREAM_ERRORS.click();
                        let err = Error::timeout(
                            "No data received from stream",
                            Some(idle_timeout.as_secs_f64()),
                        );
                        return Some((Err(err), None));
                    }
                };
                match next? {
                    Ok(line) => {
                        STREAM_LINES.click();
                        if let Some(logger) = &logger {
                            logger.log_stream_line(&line);
                        }
                        match codec::decode_stream_line(&line) {
                            Some(StreamEvent::Done) => return Some((Ok(StreamEvent::Done), None)),
                            Some(event) => {
                                STREAM_FRAGMENTS.click();
                                return Some((Ok(event), Some(lines)));
                            }
                            None => STREAM_SKIPPED_LINES.click(),
                        }
                    }
                    Err(e) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), None));
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::transcript::Transcript;
    use crate::types::{ChatCompletion, ChatRequest, KnownModel, Role};

    /// Replays canned bodies and remembers what was posted.
    #[derive(Default)]
    struct Canned {
        body: Option<Result<Bytes>>,
        lines: Vec<Result<String>>,
        stall: bool,
        posted: Mutex<Vec<serde_json::Value>>,
    }

    impl Canned {
        fn record(&self, body: &[u8]) {
            self.posted
                .lock()
                .unwrap()
                .push(serde_json::from_slice(body).unwrap());
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, body: Vec<u8>) -> Result<Bytes> {
            self.record(&body);
            self.body
                .clone()
                .unwrap_or_else(|| Err(Error::connection("no body scripted", None)))
        }

        async fn open_stream(&self, body: Vec<u8>) -> Result<LineStream> {
            self.record(&body);
            let lines = stream::iter(self.lines.clone());
            if self.stall {
                Ok(Box::pin(lines.chain(stream::pending())))
            } else {
                Ok(Box::pin(lines))
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        entries: Mutex<Vec<String>>,
    }

    impl ClientLogger for Recorder {
        fn log_request(&self, request: &ChatRequest) {
            self.entries
                .lock()
                .unwrap()
                .push(format!("request stream={}", request.stream));
        }

        fn log_response(&self, completion: &ChatCompletion) {
            self.entries
                .lock()
                .unwrap()
                .push(format!("response choices={}", completion.choices.len()));
        }

        fn log_stream_line(&self, line: &str) {
            self.entries.lock().unwrap().push(format!("line {line}"));
        }

        fn log_stream_complete(&self, text: &str) {
            self.entries.lock().unwrap().push(format!("complete {text}"));
        }
    }

    fn hello() -> Transcript {
        let mut transcript = Transcript::new();
        transcript.push(Role::User, "Hi");
        transcript
    }

    fn delta(content: &str) -> Result<String> {
        Ok(format!(
            r#"data: {{"choices":[{{"delta":{{"content":{}}}}}]}}"#,
            serde_json::to_string(content).unwrap()
        ))
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let transport = Arc::new(Canned {
            body: Some(Ok(Bytes::from_static(
                br#"{"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}"#,
            ))),
            ..Canned::default()
        });
        let client = Client::with_transport(transport.clone()).with_model(KnownModel::Gpt4o);
        assert_eq!(client.complete(hello().messages()).await.unwrap(), "Hello!");

        let posted = transport.posted.lock().unwrap();
        assert_eq!(
            posted[0],
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "Hi"}],
                "stream": false,
            })
        );
    }

    #[tokio::test]
    async fn complete_propagates_transport_errors() {
        let client = Client::with_transport(Arc::new(Canned::default()));
        let err = client.complete(hello().messages()).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn complete_rejects_empty_choices() {
        let transport = Arc::new(Canned {
            body: Some(Ok(Bytes::from_static(br#"{"choices":[]}"#))),
            ..Canned::default()
        });
        let err = Client::with_transport(transport)
            .complete(hello().messages())
            .await
            .unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn stream_delivers_fragments_in_order() {
        let transport = Arc::new(Canned {
            lines: vec![
                Ok(": ping".to_string()),
                delta("Hel"),
                Ok(String::new()),
                delta("lo"),
                Ok("data: [DONE]".to_string()),
                delta("ignored"),
            ],
            ..Canned::default()
        });
        let client = Client::with_transport(transport.clone());
        let mut seen = Vec::new();
        let summary = client
            .stream(hello().messages(), |fragment| seen.push(fragment.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(
            summary,
            StreamSummary {
                text: "Hello".to_string(),
                fragments: 2,
                completed: true,
            }
        );
        assert_eq!(transport.posted.lock().unwrap()[0]["stream"], true);
    }

    #[tokio::test]
    async fn stream_without_done_still_succeeds() {
        let transport = Arc::new(Canned {
            lines: vec![delta("partial")],
            ..Canned::default()
        });
        let summary = Client::with_transport(transport)
            .stream(hello().messages(), |_| {})
            .await
            .unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.text, "partial");
    }

    #[tokio::test]
    async fn stream_error_follows_earlier_fragments() {
        let transport = Arc::new(Canned {
            lines: vec![delta("Hel"), Err(Error::streaming("connection reset", None))],
            ..Canned::default()
        });
        let mut seen = Vec::new();
        let err = Client::with_transport(transport)
            .stream(hello().messages(), |fragment| seen.push(fragment.to_string()))
            .await
            .unwrap_err();
        assert_eq!(seen, vec!["Hel"]);
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn failed_stream_is_still_logged_as_complete() {
        let logger = Arc::new(Recorder::default());
        let transport = Arc::new(Canned {
            lines: vec![delta("Hel"), Err(Error::streaming("connection reset", None))],
            ..Canned::default()
        });
        let client = Client::with_transport(transport).with_logger(logger.clone());
        let err = client.stream(hello().messages(), |_| {}).await.unwrap_err();
        assert!(err.is_transport());
        let entries = logger.entries.lock().unwrap();
        assert_eq!(entries.last().map(String::as_str), Some("complete Hel"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_times_out() {
        let transport = Arc::new(Canned {
            lines: vec![delta("Hel")],
            stall: true,
            ..Canned::default()
        });
        let client =
            Client::with_transport(transport).with_idle_timeout(Duration::from_secs(5));
        let mut seen = Vec::new();
        let err = client
            .stream(hello().messages(), |fragment| seen.push(fragment.to_string()))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(seen, vec!["Hel"]);
    }

    #[tokio::test]
    async fn fragments_is_a_lazy_stream() {
        let transport = Arc::new(Canned {
            lines: vec![delta("a"), delta("b"), Ok("data: [DONE]".to_string())],
            ..Canned::default()
        });
        let client = Client::with_transport(transport);
        let fragments = client.fragments(hello().messages()).await.unwrap();
        let collected: Vec<String> = fragments.map(|f| f.unwrap()).collect().await;
        assert_eq!(collected, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn logger_sees_requests_lines_and_responses() {
        let logger = Arc::new(Recorder::default());
        let transport = Arc::new(Canned {
            body: Some(Ok(Bytes::from_static(
                br#"{"choices":[{"message":{"role":"assistant","content":"x"}}]}"#,
            ))),
            lines: vec![delta("y"), Ok("data: [DONE]".to_string())],
            ..Canned::default()
        });
        let client = Client::with_transport(transport).with_logger(logger.clone());
        client.complete(hello().messages()).await.unwrap();
        client.stream(hello().messages(), |_| {}).await.unwrap();

        let entries = logger.entries.lock().unwrap();
        assert_eq!(entries[0], "request stream=false");
        assert_eq!(entries[1], "response choices=1");
        assert_eq!(entries[2], "request stream=true");
        assert!(entries[3].starts_with("line data: "));
        assert_eq!(entries[4], "line data: [DONE]");
        assert_eq!(entries[5], "complete y");
    }
}
