//! Sequencing user turns through the client.
//!
//! A conversation runs as an actor: one task owns the [`Transcript`] and is the only writer to it.
//! Callers talk to the actor through a cloneable [`ConversationHandle`].  Each submission spawns
//! a request task that posts fragments back to the actor, so every mutation of the pending
//! assistant message happens on the actor in arrival order.  Observers follow along through a
//! channel of [`ConversationEvent`]s.
//!
//! Failures become visible text in the pending message.  Non-streaming failures read
//! [`NO_RESPONSE`]; streaming failures append `Error: <description>` after whatever arrived.  The
//! structured [`Error`] travels alongside in [`ConversationEvent::Settled`].

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::chat::config::ChatConfig;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::observability::{CONVERSATION_FAILURES, CONVERSATION_REJECTED, CONVERSATION_SUBMITS};
use crate::transcript::Transcript;
use crate::types::{Message, Model, Role};

/// Text shown in place of a reply when a non-streaming request fails.
pub const NO_RESPONSE: &str = "Error: No response received";

/// Notifications from a conversation to its observer.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Text was applied to the message at `position`.
    Updated {
        /// Increases by exactly one per applied fragment, across the whole conversation.
        revision: u64,
        /// Position of the message in the transcript.
        position: usize,
        /// The text that was appended.
        delta: String,
    },
    /// The request filling the message at `position` is over.
    ///
    /// `error` is set if it failed; its display text has already been applied.
    Settled {
        position: usize,
        error: Option<Error>,
    },
}

/// A point-in-time summary of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    /// The model used for the next request.
    pub model: Model,
    /// Whether the next request streams.
    pub streaming: bool,
    /// The number of messages in the transcript, system prompt included.
    pub message_count: usize,
    /// The current notification revision.
    pub revision: u64,
    /// Position of the message awaiting a reply, if any.
    pub pending: Option<usize>,
    /// Total number of requests dispatched.
    pub total_requests: u64,
    /// Requests that ended in an error.
    pub failed_requests: u64,
}

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Option<usize>>>,
    },
    SetStreaming(bool),
    SetModel(Model),
    Snapshot(oneshot::Sender<Vec<Message>>),
    Stats(oneshot::Sender<ConversationStats>),
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Complete,
    Streaming,
}

enum Delivery {
    Fragment {
        position: usize,
        text: String,
    },
    Finished {
        position: usize,
        mode: Mode,
        result: Result<()>,
    },
}

/// A handle to a running conversation.
///
/// Cloning is cheap.  The conversation stops once every handle is dropped and no request is
/// pending.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConversationHandle {
    /// Submit a user turn.
    ///
    /// Returns the position of the assistant message that will hold the reply, or `None` if
    /// `text` is empty after trimming.  Fails with [`Error::Busy`] while an earlier reply is
    /// still pending.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Option<usize>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| closed())?
    }

    /// Choose between streamed and complete replies for subsequent submissions.
    pub fn set_streaming(&self, streaming: bool) -> Result<()> {
        self.send(Command::SetStreaming(streaming))
    }

    /// Use `model` for subsequent submissions.
    pub fn set_model(&self, model: impl Into<Model>) -> Result<()> {
        self.send(Command::SetModel(model.into()))
    }

    /// A copy of the transcript as it stands once earlier commands are processed.
    pub async fn snapshot(&self) -> Result<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| closed())
    }

    pub async fn stats(&self) -> Result<ConversationStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        rx.await.map_err(|_| closed())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

fn closed() -> Error {
    Error::closed("the conversation is no longer running")
}

/// Start a conversation on the current tokio runtime.
///
/// The system prompt from `config`, if any, becomes the first message.  Returns the handle and
/// the observer's end of the event channel.
pub fn spawn(
    client: Client,
    config: &ChatConfig,
) -> (ConversationHandle, mpsc::UnboundedReceiver<ConversationEvent>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut transcript = Transcript::new();
    if let Some(system) = &config.system_prompt {
        transcript.push(Role::System, system.clone());
    }
    let conversation = Conversation {
        client: client.with_model(config.model.clone()),
        transcript,
        streaming: config.streaming,
        revision: 0,
        pending: None,
        total_requests: 0,
        failed_requests: 0,
        events: events_tx,
        deliveries: deliveries_tx,
    };
    tokio::spawn(conversation.run(commands_rx, deliveries_rx));

    (
        ConversationHandle {
            commands: commands_tx,
        },
        events_rx,
    )
}

struct Conversation {
    client: Client,
    transcript: Transcript,
    streaming: bool,
    revision: u64,
    pending: Option<usize>,
    total_requests: u64,
    failed_requests: u64,
    events: mpsc::UnboundedSender<ConversationEvent>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl Conversation {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    ) {
        let mut accepting = true;
        loop {
            tokio::select! {
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.handle(command),
                    None => accepting = false,
                },
                // The actor holds a sender, so this never yields None.
                Some(delivery) = deliveries.recv() => self.deliver(delivery),
            }
            if !accepting && self.pending.is_none() {
                break;
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let _ = reply.send(self.submit(text));
            }
            Command::SetStreaming(streaming) => self.streaming = streaming,
            Command::SetModel(model) => self.client.set_model(model),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.transcript.messages().to_vec());
            }
            Command::Stats(reply) => {
                let _ = reply.send(ConversationStats {
                    model: self.client.model().clone(),
                    streaming: self.streaming,
                    message_count: self.transcript.len(),
                    revision: self.revision,
                    pending: self.pending,
                    total_requests: self.total_requests,
                    failed_requests: self.failed_requests,
                });
            }
        }
    }

    fn submit(&mut self, text: String) -> Result<Option<usize>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        if let Some(position) = self.pending {
            CONVERSATION_REJECTED.click();
            return Err(Error::busy(format!(
                "still waiting for the reply at position {position}"
            )));
        }
        CONVERSATION_SUBMITS.click();
        self.transcript.push(Role::User, text);
        let position = self.transcript.push_placeholder();
        self.pending = Some(position);
        self.total_requests += 1;
        self.dispatch(position);
        Ok(Some(position))
    }

    /// Spawn the request task for the placeholder at `position`.
    fn dispatch(&self, position: usize) {
        let client = self.client.clone();
        let history = self.transcript.messages()[..position].to_vec();
        let deliveries = self.deliveries.clone();
        let mode = if self.streaming {
            Mode::Streaming
        } else {
            Mode::Complete
        };
        tokio::spawn(async move {
            let result = match mode {
                Mode::Streaming => client
                    .stream(&history, |fragment| {
                        let _ = deliveries.send(Delivery::Fragment {
                            position,
                            text: fragment.to_string(),
                        });
                    })
                    .await
                    .map(|_| ()),
                Mode::Complete => client.complete(&history).await.map(|content| {
                    let _ = deliveries.send(Delivery::Fragment {
                        position,
                        text: content,
                    });
                }),
            };
            let _ = deliveries.send(Delivery::Finished {
                position,
                mode,
                result,
            });
        });
    }

    fn deliver(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Fragment { position, text } => self.apply_fragment(position, text),
            Delivery::Finished {
                position,
                mode,
                result,
            } => {
                let error = result.err();
                if let Some(err) = &error {
                    CONVERSATION_FAILURES.click();
                    self.failed_requests += 1;
                    let text = match mode {
                        Mode::Complete => NO_RESPONSE.to_string(),
                        Mode::Streaming => format!("Error: {err}"),
                    };
                    self.apply_fragment(position, text);
                }
                self.transcript.settle(position);
                if self.pending == Some(position) {
                    self.pending = None;
                }
                let _ = self
                    .events
                    .send(ConversationEvent::Settled { position, error });
            }
        }
    }

    fn apply_fragment(&mut self, position: usize, text: String) {
        if self.transcript.apply_fragment(position, &text).is_err() {
            return;
        }
        self.revision += 1;
        let _ = self.events.send(ConversationEvent::Updated {
            revision: self.revision,
            position,
            delta: text,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use tokio::sync::Mutex;

    use super::*;
    use crate::transcript::SENTINEL;
    use crate::transport::{LineStream, Transport};

    /// Holds every request until the test releases it.
    struct Gate {
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl Transport for Gate {
        async fn send(&self, _: Vec<u8>) -> Result<Bytes> {
            let release = self.release.lock().await.take();
            if let Some(release) = release {
                let _ = release.await;
            }
            Ok(Bytes::from_static(
                br#"{"choices":[{"message":{"role":"assistant","content":"done"}}]}"#,
            ))
        }

        async fn open_stream(&self, _: Vec<u8>) -> Result<LineStream> {
            Ok(Box::pin(stream::empty()))
        }
    }

    fn gated() -> (Client, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let transport = Gate {
            release: Mutex::new(Some(rx)),
        };
        (Client::with_transport(Arc::new(transport)), tx)
    }

    async fn settle(events: &mut mpsc::UnboundedReceiver<ConversationEvent>) -> Option<Error> {
        loop {
            match events.recv().await {
                Some(ConversationEvent::Settled { error, .. }) => return error,
                Some(_) => continue,
                None => panic!("conversation ended before settling"),
            }
        }
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let (client, _release) = gated();
        let (handle, _events) = spawn(client, &ChatConfig::new());
        assert_eq!(handle.submit("").await.unwrap(), None);
        assert_eq!(handle.submit("  \n\t").await.unwrap(), None);
        assert!(handle.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_submit_while_pending_is_busy() {
        let (client, release) = gated();
        let config = ChatConfig::new().with_streaming(false);
        let (handle, mut events) = spawn(client, &config);

        assert_eq!(handle.submit("first").await.unwrap(), Some(1));
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[1].content, SENTINEL);

        let err = handle.submit("second").await.unwrap_err();
        assert!(err.is_busy());
        assert_eq!(handle.stats().await.unwrap().pending, Some(1));

        release.send(()).unwrap();
        assert!(settle(&mut events).await.is_none());
        assert_eq!(handle.submit("third").await.unwrap(), Some(3));
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[1].content, "done");
        assert_eq!(snapshot[2].content, "third");
    }

    #[tokio::test]
    async fn system_prompt_leads_the_transcript() {
        let (client, release) = gated();
        let config = ChatConfig::new()
            .with_streaming(false)
            .with_system_prompt("Be brief.".to_string());
        let (handle, mut events) = spawn(client, &config);
        release.send(()).unwrap();

        assert_eq!(handle.submit("Hi").await.unwrap(), Some(2));
        settle(&mut events).await;
        let snapshot = handle.snapshot().await.unwrap();
        let roles: Vec<Role> = snapshot.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(snapshot[0].content, "Be brief.");
    }

    #[tokio::test]
    async fn toggles_apply_to_later_submissions() {
        let (client, _release) = gated();
        let (handle, _events) = spawn(client, &ChatConfig::new());
        handle.set_streaming(false).unwrap();
        handle.set_model("gpt-4o").unwrap();
        let stats = handle.stats().await.unwrap();
        assert!(!stats.streaming);
        assert_eq!(stats.model, Model::from("gpt-4o"));
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn stream_that_ends_silently_leaves_empty_content() {
        let (client, _release) = gated();
        let (handle, mut events) = spawn(client, &ChatConfig::new());
        let position = handle.submit("Hi").await.unwrap().unwrap();
        assert!(settle(&mut events).await.is_none());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[position].content, "");
        assert_eq!(handle.stats().await.unwrap().revision, 0);
    }
}
