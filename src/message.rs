//! Message envelope for traffic between the main thread and the worker.
//!
//! A [`Message`] wraps one `content` record. Inputs arrive in three shapes
//! (an event carrying `data`, a plain string, or a plain object) and are
//! normalized into that record by [`MessageInput`]. Typed access goes through
//! [`Payload`], a serde-tagged view of the five message kinds.
//!
//! Messages are delivered through a [`MessageSink`]: an mpsc channel
//! (worker traffic), newline-delimited JSON on stdout (the CLI), styled
//! terminal output, or an in-memory vector (testing).

use std::cell::RefCell;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::correlation::CorrelationId;
use crate::error::{MessageError, MessageResult};
use crate::feedback::{self, FeedbackItem};

pub const DOCUMENT: &str = "document";
pub const FEEDBACK: &str = "feedback";
pub const PROGRESS: &str = "progress";
pub const ERROR: &str = "error";
pub const DONE: &str = "done";

// ── Envelope ────────────────────────────────────────────────────────────

/// A single cross-thread message: one JSON record with a `type` field.
///
/// Immutable once built; sinks receive it by reference and clone if they
/// need to keep it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    content: Map<String, Value>,
}

/// An event-like input: the message content lives under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub data: Value,
}

/// Input adapter: everything a [`Message`] can be built from.
pub trait MessageInput {
    fn into_content(self) -> MessageResult<Map<String, Value>>;
}

impl MessageInput for &str {
    fn into_content(self) -> MessageResult<Map<String, Value>> {
        self.to_string().into_content()
    }
}

impl MessageInput for String {
    fn into_content(self) -> MessageResult<Map<String, Value>> {
        let mut content = Map::new();
        content.insert("text".into(), Value::String(self));
        Ok(content)
    }
}

impl MessageInput for Map<String, Value> {
    fn into_content(self) -> MessageResult<Map<String, Value>> {
        Ok(self)
    }
}

impl MessageInput for Value {
    fn into_content(self) -> MessageResult<Map<String, Value>> {
        match self {
            Value::Object(map) => Ok(map),
            Value::String(text) => text.into_content(),
            other => Err(MessageError::UnsupportedInput {
                found: value_kind(&other).into(),
            }),
        }
    }
}

impl MessageInput for MessageEvent {
    fn into_content(self) -> MessageResult<Map<String, Value>> {
        self.data.into_content()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Message {
    /// Build a message from any supported input shape.
    pub fn new(input: impl MessageInput) -> MessageResult<Self> {
        Ok(Self {
            content: input.into_content()?,
        })
    }

    /// True when the `type` field equals `kind`.
    pub fn is(&self, kind: &str) -> bool {
        self.message_type() == Some(kind)
    }

    /// The `type` discriminator, if the content has one.
    pub fn message_type(&self) -> Option<&str> {
        self.content.get("type").and_then(Value::as_str)
    }

    /// Read one field of the content.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    /// Read a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    pub fn into_content(self) -> Map<String, Value> {
        self.content
    }

    /// Decode the content into its typed payload.
    pub fn payload(&self) -> MessageResult<Payload> {
        serde_json::from_value(Value::Object(self.content.clone())).map_err(|e| {
            MessageError::Payload {
                message: e.to_string(),
            }
        })
    }

    /// Post this message to `target`, or to the thread's ambient port when
    /// no target is given.
    pub fn send(&self, target: Option<&dyn MessageSink>) -> MessageResult<()> {
        if let Some(sink) = target {
            sink.emit(self);
            return Ok(());
        }
        PORT.with(|port| match port.borrow().as_deref() {
            Some(sink) => {
                sink.emit(self);
                Ok(())
            }
            None => Err(MessageError::NoChannel),
        })
    }

    // ── Typed constructors ──────────────────────────────────────────────

    pub fn document(encoding: impl Into<String>, code: impl Into<String>) -> Self {
        Payload::Document {
            encoding: encoding.into(),
            code: code.into(),
        }
        .into()
    }

    pub fn feedback(
        id: Option<CorrelationId>,
        ancestor_id: Option<CorrelationId>,
        results: Vec<FeedbackItem>,
    ) -> Self {
        Payload::Feedback {
            id,
            ancestor_id,
            results,
        }
        .into()
    }

    /// Progress report; values above 100 are clamped.
    pub fn progress(percent: u32) -> Self {
        Payload::Progress {
            complete: percent.min(100) as u8,
        }
        .into()
    }

    pub fn error(text: impl Into<String>, extra: Map<String, Value>) -> Self {
        Payload::Error {
            text: text.into(),
            extra,
        }
        .into()
    }

    pub fn done() -> Self {
        Payload::Done.into()
    }
}

// ── Typed payloads ──────────────────────────────────────────────────────

/// Typed view of the five message kinds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// A serialized document sent to the worker.
    Document { encoding: String, code: String },
    /// Feedback for one node, with results merged from unidentified descendants.
    Feedback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CorrelationId>,
        #[serde(
            rename = "ancestorID",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        ancestor_id: Option<CorrelationId>,
        results: Vec<FeedbackItem>,
    },
    /// Percentage of the current run completed.
    Progress { complete: u8 },
    /// Run-wide or node-scoped failure.
    Error {
        text: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Terminates a run.
    Done,
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match serde_json::json!(payload) {
            Value::Object(content) => Self { content },
            // Every Payload variant serializes to an object.
            _ => Self {
                content: Map::new(),
            },
        }
    }
}

// ── MessageSink trait ───────────────────────────────────────────────────

/// A destination for messages.
pub trait MessageSink: Send + Sync {
    /// Emit a single message.
    fn emit(&self, msg: &Message);

    /// Emit a batch of messages.
    fn emit_batch(&self, msgs: &[Message]) {
        for m in msgs {
            self.emit(m);
        }
    }
}

thread_local! {
    static PORT: RefCell<Option<Box<dyn MessageSink>>> = const { RefCell::new(None) };
}

/// Install the ambient port used by [`Message::send`] on this thread.
pub fn install_port(sink: impl MessageSink + 'static) {
    PORT.with(|port| *port.borrow_mut() = Some(Box::new(sink)));
}

/// Remove this thread's ambient port.
pub fn clear_port() {
    PORT.with(|port| *port.borrow_mut() = None);
}

// ── ChannelSink ─────────────────────────────────────────────────────────

/// Forwards messages over an mpsc channel. Sending never blocks.
pub struct ChannelSink {
    tx: Sender<Message>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Message>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn emit(&self, msg: &Message) {
        if self.tx.send(msg.clone()).is_err() {
            tracing::warn!(
                kind = msg.message_type().unwrap_or("?"),
                "receiver dropped; message discarded"
            );
        }
    }
}

// ── JsonSink ────────────────────────────────────────────────────────────

/// Emits messages as newline-delimited JSON.
pub struct JsonSink;

impl MessageSink for JsonSink {
    fn emit(&self, msg: &Message) {
        if let Ok(json) = serde_json::to_string(msg) {
            println!("{json}");
        }
    }
}

// ── StdoutSink ──────────────────────────────────────────────────────────

/// Renders messages as readable terminal lines.
pub struct StdoutSink;

impl MessageSink for StdoutSink {
    fn emit(&self, msg: &Message) {
        match msg.payload() {
            Ok(Payload::Document { encoding, code }) => {
                println!("[document:{encoding}] {} bytes", code.len());
            }
            Ok(Payload::Feedback { id, results, .. }) => {
                let target = id.map_or_else(|| "-".to_string(), |id| id.to_string());
                for item in &results {
                    match feedback::present(item) {
                        Some(p) => println!("[feedback #{target}] {} {}: {}", p.code, p.result, p.reason),
                        None => println!("[feedback #{target}] (unrecognized {})", item.kind),
                    }
                }
            }
            Ok(Payload::Progress { complete }) => println!("[progress] {complete}%"),
            Ok(Payload::Error { text, extra }) => {
                match extra.get("id") {
                    Some(id) => eprintln!("[error #{id}] {text}"),
                    None => eprintln!("[error] {text}"),
                }
            }
            Ok(Payload::Done) => println!("[done]"),
            Err(_) => match msg.get_str("text") {
                Some(text) => println!("{text}"),
                None => println!("{}", Value::Object(msg.content().clone())),
            },
        }
    }
}

// ── VecSink ─────────────────────────────────────────────────────────────

/// Collects messages into a `Vec<Message>` for testing.
pub struct VecSink {
    messages: Mutex<Vec<Message>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected messages.
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Number of collected messages.
    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for VecSink {
    fn emit(&self, msg: &Message) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(msg.clone());
        }
    }
}

// ── Outbox ──────────────────────────────────────────────────────────────

/// Build-and-send helpers over a sink, so call sites stay one line each.
pub struct Outbox<'a> {
    sink: &'a dyn MessageSink,
}

impl<'a> Outbox<'a> {
    pub fn new(sink: &'a dyn MessageSink) -> Self {
        Self { sink }
    }

    pub fn send(&self, msg: Message) {
        tracing::debug!(kind = msg.message_type().unwrap_or("?"), "sending");
        self.sink.emit(&msg);
    }

    pub fn feedback(
        &self,
        id: Option<CorrelationId>,
        ancestor_id: Option<CorrelationId>,
        results: Vec<FeedbackItem>,
    ) {
        self.send(Message::feedback(id, ancestor_id, results));
    }

    pub fn progress(&self, percent: u32) {
        self.send(Message::progress(percent));
    }

    pub fn error(&self, text: impl Into<String>, extra: Map<String, Value>) {
        self.send(Message::error(text, extra));
    }

    pub fn done(&self) {
        self.send(Message::done());
    }
}
