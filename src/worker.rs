//! Worker side: decode documents, run the engine, report feedback.
//!
//! Each `document` message is one run, and every run ends with exactly one
//! `done` message. A run that cannot be decoded gets an `error` then `done`.
//! An engine failure gets an `error`, then `done` unless the config turns that
//! off. A run that validates gets its feedback in post-order, then `done`.
//!
//! Feedback for a node without a correlation ID is queued under its nearest
//! identified ancestor. Post-order guarantees that ancestor is visited after
//! the node, so the queued items ride along in the ancestor's message.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::correlation::CorrelationId;
use crate::engine::ValidationEngine;
use crate::error::{DecodeError, DecodeResult, EngineError, EngineResult};
use crate::feedback::FeedbackItem;
use crate::lc::{self, Node};
use crate::message::{self, ChannelSink, Message, Outbox};
use crate::putdown;

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// JSON bracket nesting allowed in a `json` document. Each tree level costs
/// two (the node object and its `children` array), plus room for attributes.
const JSON_NESTING_LIMIT: usize = 2 * lc::MAX_DEPTH + 32;

/// Decode a serialized tree.
pub fn decode(encoding: &str, code: &str) -> DecodeResult<Node> {
    let root = match encoding {
        "json" => decode_json(code)?,
        "putdown" => {
            let mut nodes = putdown::parse(code).map_err(|source| DecodeError::Putdown { source })?;
            if nodes.len() != 1 {
                return Err(DecodeError::RootCount { count: nodes.len() });
            }
            nodes.remove(0)
        }
        other => {
            return Err(DecodeError::UnsupportedEncoding {
                encoding: other.to_string(),
            });
        }
    };
    if root.depth() > lc::MAX_DEPTH {
        return Err(DecodeError::TooDeep {
            limit: lc::MAX_DEPTH,
        });
    }
    Ok(root)
}

/// serde_json stops at 128 nested brackets, which is only 64 tree levels.
/// Lift that limit, but only after a flat scan shows the nesting is bounded.
fn decode_json(code: &str) -> DecodeResult<Node> {
    if json_nesting(code) > JSON_NESTING_LIMIT {
        return Err(DecodeError::TooDeep {
            limit: lc::MAX_DEPTH,
        });
    }
    let json_err = |e: serde_json::Error| DecodeError::Json {
        message: e.to_string(),
    };
    let mut de = serde_json::Deserializer::from_str(code);
    de.disable_recursion_limit();
    let root = Node::deserialize(&mut de).map_err(json_err)?;
    de.end().map_err(json_err)?;
    Ok(root)
}

/// Deepest bracket nesting in `code`, ignoring brackets inside strings.
/// Stops counting once past the limit.
fn json_nesting(code: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    let mut in_string = false;
    let mut escaped = false;
    for b in code.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
                if deepest > JSON_NESTING_LIMIT {
                    break;
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

fn decode_message(msg: &Message) -> DecodeResult<Node> {
    let encoding = msg
        .get_str("encoding")
        .ok_or(DecodeError::MissingField { field: "encoding" })?;
    let code = msg
        .get_str("code")
        .ok_or(DecodeError::MissingField { field: "code" })?;
    decode(encoding, code)
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Handles document messages with one engine.
pub struct Worker<E> {
    engine: E,
    config: ValidationConfig,
}

impl<E: ValidationEngine> Worker<E> {
    pub fn new(engine: E, config: ValidationConfig) -> Self {
        Self { engine, config }
    }

    /// Process one incoming message, replying through `outbox`.
    pub fn handle(&mut self, msg: &Message, outbox: &Outbox<'_>) {
        if !msg.is(message::DOCUMENT) {
            tracing::warn!(
                kind = msg.message_type().unwrap_or("?"),
                "worker ignoring non-document message"
            );
            return;
        }

        let mut root = match decode_message(msg) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(error = %e, "document did not decode");
                outbox.error(format!("decoding failed: {e}"), Map::new());
                outbox.done();
                return;
            }
        };

        let report = self.config.report_progress;
        let step = self.config.progress_step;
        let mut last: Option<u8> = None;
        let mut progress = |percent: u8| {
            let percent = percent.min(100);
            let due = match last {
                None => true,
                Some(prev) => {
                    percent >= prev.saturating_add(step) || (percent == 100 && prev < 100)
                }
            };
            if report && due {
                last = Some(percent);
                outbox.progress(u32::from(percent));
            }
        };

        tracing::info!(engine = self.engine.name(), nodes = root.size(), "validating");
        if let Err(e) = self.engine.validate(&mut root, &mut progress) {
            tracing::warn!(error = %e, "engine failed");
            outbox.error(e.to_string(), Map::new());
            if self.config.always_done_after_engine_error {
                outbox.done();
            }
            return;
        }

        let sent = collect_feedback(&root, outbox);
        tracing::info!(feedback = sent, "validation complete");
        outbox.done();
    }
}

// ---------------------------------------------------------------------------
// Feedback traversal
// ---------------------------------------------------------------------------

/// Walk `root` in post-order and send one `feedback` message per identified
/// node that has results. Returns the number of messages sent.
pub fn collect_feedback(root: &Node, outbox: &Outbox<'_>) -> usize {
    let mut collector = Collector {
        outbox,
        queued: HashMap::new(),
        ancestors: Vec::new(),
        sent: 0,
    };
    collector.walk(root);
    debug_assert!(collector.queued.is_empty(), "queued feedback never claimed");
    collector.sent
}

struct Collector<'a, 'o> {
    outbox: &'a Outbox<'o>,
    queued: HashMap<CorrelationId, Vec<FeedbackItem>>,
    /// Identified proper ancestors of the node being visited, innermost last.
    ancestors: Vec<CorrelationId>,
    sent: usize,
}

enum Step<'n> {
    Enter(&'n Node),
    Leave(&'n Node),
}

impl Collector<'_, '_> {
    /// Post-order walk with an explicit stack, so tree depth never reaches
    /// the thread's call stack.
    fn walk(&mut self, root: &Node) {
        let mut steps = vec![Step::Enter(root)];
        while let Some(step) = steps.pop() {
            match step {
                Step::Enter(node) => {
                    if let Some(id) = node.id {
                        self.ancestors.push(id);
                    }
                    steps.push(Step::Leave(node));
                    steps.extend(node.children.iter().rev().map(Step::Enter));
                }
                Step::Leave(node) => {
                    if node.id.is_some() {
                        self.ancestors.pop();
                    }
                    self.report(node);
                }
            }
        }
    }

    fn report(&mut self, node: &Node) {
        let mut results = node_feedback(node);
        match node.id {
            Some(id) => {
                if let Some(queued) = self.queued.remove(&id) {
                    results.extend(queued);
                }
                if !results.is_empty() {
                    self.emit(Some(id), Some(id), results);
                }
            }
            None if results.is_empty() => {}
            None => match self.ancestors.last().copied() {
                Some(ancestor) => self.queued.entry(ancestor).or_default().extend(results),
                None => self.emit(None, None, results),
            },
        }
    }

    fn emit(
        &mut self,
        id: Option<CorrelationId>,
        ancestor_id: Option<CorrelationId>,
        results: Vec<FeedbackItem>,
    ) {
        self.outbox.feedback(id, ancestor_id, results);
        self.sent += 1;
    }
}

/// One node's own feedback: scope errors, named results, then the primary result.
fn node_feedback(node: &Node) -> Vec<FeedbackItem> {
    let mut items = Vec::new();

    if let Some(scope) = node.attribute(lc::SCOPE_ERRORS) {
        for reason in ["redeclared", "undeclared"] {
            if let Some(names) = scope.get(reason).filter(|v| !is_blank(v)) {
                items.push(
                    FeedbackItem::new("scoping")
                        .with_result("invalid")
                        .with_reason(reason)
                        .with_extra(reason, names.clone()),
                );
            }
        }
    }

    if let Some(Value::Object(named)) = node.attribute(lc::VALIDATION_RESULTS) {
        items.extend(named.iter().filter_map(|(name, value)| as_item(name, value)));
    }

    if let Some(primary) = node.attribute(lc::VALIDATION_RESULT) {
        items.extend(as_item("propositional", primary));
    }

    items
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Read an engine result attribute as a feedback item, typed `kind` unless
/// it names its own type.
fn as_item(kind: &str, value: &Value) -> Option<FeedbackItem> {
    match value {
        Value::String(result) => Some(FeedbackItem::new(kind).with_result(result.clone())),
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields
                .entry("type")
                .or_insert_with(|| Value::String(kind.to_string()));
            match serde_json::from_value(Value::Object(fields)) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(kind, error = %e, "skipping malformed result attribute");
                    None
                }
            }
        }
        _ => {
            tracing::warn!(kind, "skipping result attribute that is not a string or object");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

/// Main-thread handle to a running worker thread.
pub struct WorkerHandle {
    requests: Option<Sender<Message>>,
    replies: Receiver<Message>,
    thread: Option<JoinHandle<()>>,
}

/// Start a worker thread that owns `engine`.
///
/// The thread's ambient port is its reply channel, so engine code may call
/// `Message::send(None)` to reach the main thread directly.
pub fn spawn_worker<E>(engine: E, config: ValidationConfig) -> EngineResult<WorkerHandle>
where
    E: ValidationEngine + 'static,
{
    let (request_tx, request_rx) = mpsc::channel::<Message>();
    let (reply_tx, reply_rx) = mpsc::channel::<Message>();
    let name = config.worker_name.clone();

    let thread = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            message::install_port(ChannelSink::new(reply_tx.clone()));
            let sink = ChannelSink::new(reply_tx);
            let outbox = Outbox::new(&sink);
            let mut worker = Worker::new(engine, config);
            for msg in request_rx {
                worker.handle(&msg, &outbox);
            }
            message::clear_port();
            tracing::debug!("request channel closed; worker exiting");
        })
        .map_err(|e| EngineError::WorkerGone {
            message: format!("failed to spawn {name}: {e}"),
        })?;

    Ok(WorkerHandle {
        requests: Some(request_tx),
        replies: reply_rx,
        thread: Some(thread),
    })
}

fn gone(what: &str) -> EngineError {
    EngineError::WorkerGone {
        message: what.to_string(),
    }
}

impl WorkerHandle {
    /// Queue a message for the worker. Never blocks.
    pub fn send(&self, msg: &Message) -> EngineResult<()> {
        let tx = self.requests.as_ref().ok_or_else(|| gone("worker shut down"))?;
        tx.send(msg.clone())
            .map_err(|_| gone("worker request channel closed"))
    }

    /// A sink that delivers to the worker, for use with `Message::send`.
    pub fn port(&self) -> Option<ChannelSink> {
        self.requests.clone().map(ChannelSink::new)
    }

    /// Block until the next reply.
    pub fn recv(&self) -> EngineResult<Message> {
        self.replies
            .recv()
            .map_err(|_| gone("worker reply channel closed"))
    }

    /// Wait up to `timeout` for the next reply.
    pub fn recv_timeout(&self, timeout: Duration) -> EngineResult<Option<Message>> {
        match self.replies.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(gone("worker reply channel closed")),
        }
    }

    /// Next reply if one is waiting.
    pub fn try_recv(&self) -> EngineResult<Option<Message>> {
        match self.replies.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(gone("worker reply channel closed")),
        }
    }

    /// Close the request channel and wait for the thread to finish.
    pub fn shutdown(mut self) -> EngineResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.requests.take();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| gone("worker thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "worker did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, VecSink};
    use serde_json::json;

    fn id(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    fn payloads(sink: &VecSink) -> Vec<Payload> {
        sink.messages().iter().map(|m| m.payload().unwrap()).collect()
    }

    #[test]
    fn decode_rejects_unknown_encodings() {
        assert!(matches!(
            decode("xml", "<doc/>"),
            Err(DecodeError::UnsupportedEncoding { .. })
        ));
        assert!(matches!(decode("putdown", "a b"), Err(DecodeError::RootCount { count: 2 })));
        assert!(matches!(decode("json", "{"), Err(DecodeError::Json { .. })));
        assert!(matches!(
            decode("json", r#"{"kind":"symbol"} {"kind":"symbol"}"#),
            Err(DecodeError::Json { .. })
        ));
    }

    fn chain(levels: usize) -> Node {
        let mut node = Node::symbol("x");
        for _ in 1..levels {
            node = Node::application(Node::symbol("-"), [node]);
        }
        node
    }

    #[test]
    fn json_trees_deeper_than_serde_default_decode() {
        let tree = chain(100);
        let code = serde_json::to_string(&tree).unwrap();
        assert!(json_nesting(&code) > 128);
        assert_eq!(decode("json", &code).unwrap(), tree);
    }

    #[test]
    fn overly_deep_documents_are_refused() {
        let brackets = "[".repeat(200_000);
        assert!(matches!(decode("json", &brackets), Err(DecodeError::TooDeep { .. })));

        let code = serde_json::to_string(&chain(lc::MAX_DEPTH + 1)).unwrap();
        assert!(matches!(decode("json", &code), Err(DecodeError::TooDeep { .. })));

        let parens = "(f ".repeat(200_000);
        assert!(matches!(decode("putdown", &parens), Err(DecodeError::Putdown { .. })));
    }

    #[test]
    fn brackets_inside_strings_do_not_count() {
        assert_eq!(json_nesting(r#"{"text":"[[[{{\"]]"}"#), 1);
        assert_eq!(json_nesting(r#"[[1],{"a":[]}]"#), 3);
    }

    #[test]
    fn scope_errors_split_into_two_items() {
        let node = Node::symbol("x").with_attribute(
            lc::SCOPE_ERRORS,
            json!({"redeclared": ["x"], "undeclared": ["y", "z"]}),
        );
        let items = node_feedback(&node);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].reason.as_deref(), Some("redeclared"));
        assert_eq!(items[1].extra.get("undeclared"), Some(&json!(["y", "z"])));
    }

    #[test]
    fn named_results_precede_the_primary_result() {
        let node = Node::symbol("x")
            .with_attribute(
                lc::VALIDATION_RESULTS,
                json!({"BIH": {"result": "valid"}, "CAS": "invalid"}),
            )
            .with_attribute(lc::VALIDATION_RESULT, json!({"result": "indeterminate"}));
        let kinds: Vec<_> = node_feedback(&node).into_iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec!["BIH", "CAS", "propositional"]);
    }

    #[test]
    fn unidentified_child_feedback_merges_into_ancestor() {
        let tree = Node::environment([
            Node::symbol("a"),
            Node::application(
                Node::symbol("f"),
                [Node::symbol("x").with_attribute(lc::VALIDATION_RESULT, json!("invalid"))],
            ),
        ])
        .with_id(id(4));
        let sink = VecSink::new();
        let sent = collect_feedback(&tree, &Outbox::new(&sink));
        assert_eq!(sent, 1);
        match &payloads(&sink)[0] {
            Payload::Feedback {
                id: got,
                ancestor_id,
                results,
            } => {
                assert_eq!(*got, Some(id(4)));
                assert_eq!(*ancestor_id, Some(id(4)));
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].result.as_deref(), Some("invalid"));
            }
            other => panic!("expected feedback, got {other:?}"),
        }
    }

    #[test]
    fn children_report_before_parents() {
        let tree = Node::environment([
            Node::symbol("leaf")
                .with_id(id(2))
                .with_attribute(lc::VALIDATION_RESULT, json!("valid")),
        ])
        .with_id(id(1))
        .with_attribute(lc::VALIDATION_RESULT, json!("valid"));
        let sink = VecSink::new();
        collect_feedback(&tree, &Outbox::new(&sink));
        let ids: Vec<_> = payloads(&sink)
            .into_iter()
            .map(|p| match p {
                Payload::Feedback { id, .. } => id,
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![Some(id(2)), Some(id(1))]);
    }

    #[test]
    fn feedback_walk_handles_long_chains() {
        let mut node = Node::symbol("x").with_attribute(lc::VALIDATION_RESULT, json!("valid"));
        for _ in 0..100_000 {
            node = Node::application(Node::symbol("-"), [node]);
        }
        let tree = node.with_id(id(9));
        let sink = VecSink::new();
        assert_eq!(collect_feedback(&tree, &Outbox::new(&sink)), 1);
        // Dropping a tree this deep recurses; leak it instead.
        std::mem::forget(tree);
    }

    #[test]
    fn orphan_feedback_is_sent_without_ids() {
        let tree = Node::symbol("x").with_attribute(lc::VALIDATION_RESULT, json!("valid"));
        let sink = VecSink::new();
        collect_feedback(&tree, &Outbox::new(&sink));
        assert!(matches!(
            &payloads(&sink)[0],
            Payload::Feedback { id: None, ancestor_id: None, .. }
        ));
    }

    #[test]
    fn non_document_messages_are_ignored() {
        let sink = VecSink::new();
        let mut worker = Worker::new(crate::engine::NoopEngine, ValidationConfig::default());
        worker.handle(&Message::done(), &Outbox::new(&sink));
        assert!(sink.is_empty());
    }

    #[test]
    fn progress_is_rate_limited() {
        let config = ValidationConfig {
            progress_step: 25,
            ..Default::default()
        };
        struct Chatty;
        impl ValidationEngine for Chatty {
            fn validate(&mut self, _: &mut Node, progress: &mut dyn FnMut(u8)) -> EngineResult<()> {
                for p in (0..=100).step_by(5) {
                    progress(p);
                }
                Ok(())
            }
        }
        let sink = VecSink::new();
        let mut worker = Worker::new(Chatty, config);
        worker.handle(&Message::document("json", r#"{"kind":"environment"}"#), &Outbox::new(&sink));
        let percents: Vec<_> = payloads(&sink)
            .into_iter()
            .filter_map(|p| match p {
                Payload::Progress { complete } => Some(complete),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 25, 50, 75, 100]);
        assert_eq!(sink.messages().last().unwrap().message_type(), Some("done"));
    }
}
