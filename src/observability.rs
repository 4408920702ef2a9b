use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");

pub(crate) static STREAM_REQUESTS: Counter = Counter::new("parley.stream.requests");
pub(crate) static STREAM_LINES: Counter = Counter::new("parley.stream.lines");
pub(crate) static STREAM_SKIPPED_LINES: Counter = Counter::new("parley.stream.skipped_lines");
pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("parley.stream.fragments");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("parley.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("parley.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("parley.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("parley.stream.duration_seconds");

pub(crate) static CONVERSATION_SUBMITS: Counter = Counter::new("parley.conversation.submits");
pub(crate) static CONVERSATION_REJECTED: Counter = Counter::new("parley.conversation.rejected");
pub(crate) static CONVERSATION_FAILURES: Counter = Counter::new("parley.conversation.failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_REQUESTS);
    collector.register_counter(&STREAM_LINES);
    collector.register_counter(&STREAM_SKIPPED_LINES);
    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&CONVERSATION_SUBMITS);
    collector.register_counter(&CONVERSATION_REJECTED);
    collector.register_counter(&CONVERSATION_FAILURES);
}
