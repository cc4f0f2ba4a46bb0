//! Main-thread client for a validation worker.
//!
//! `ValidationClient` owns a worker thread and runs one validation at a time:
//! serialize, send, then drain replies until `done`. Because the next run
//! cannot start before the previous one finished, every reply is resolved
//! against the correlation table of the run that produced it. A run that
//! timed out still owes its `done`; the next run first discards its replies
//! up to that point.

use std::time::Duration;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::config::ValidationConfig;
use crate::correlation::{CorrelationId, CorrelationTable, Origin, RunContext, RunId};
use crate::element::DocumentElement;
use crate::engine::ValidationEngine;
use crate::error::{EngineError, SerializeError};
use crate::feedback::{self, FeedbackItem, Presentation};
use crate::message::{Message, Payload};
use crate::serializer::{self, Encoding};
use crate::worker::{self, WorkerHandle};

/// Errors from the main-thread client.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error("{run} did not finish within {waited:?}")]
    #[diagnostic(
        code(lurch::client::timeout),
        help("The engine may be stuck. Raise the timeout or check the worker log.")
    )]
    Timeout { run: RunId, waited: Duration },

    #[error("{pending} earlier run(s) still in progress after waiting {waited:?}")]
    #[diagnostic(
        code(lurch::client::busy),
        help("A timed-out run must finish before the next one can start. Try again later.")
    )]
    Busy { pending: usize, waited: Duration },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

pub type ClientResult<T> = Result<T, ClientError>;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One feedback message resolved to the element it concerns.
#[derive(Debug, Clone)]
pub struct RoutedFeedback {
    pub id: Option<CorrelationId>,
    /// `None` when the worker sent feedback for an unidentified tree.
    pub origin: Option<Origin>,
    pub presentations: Vec<Presentation>,
    /// Items outside the known feedback categories.
    pub unrecognized: Vec<FeedbackItem>,
}

/// An `error` message, scoped to a node when it carried an `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedError {
    pub text: String,
    pub origin: Option<Origin>,
}

/// Everything one validation run produced.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub run: RunId,
    pub feedback: Vec<RoutedFeedback>,
    pub errors: Vec<RoutedError>,
    pub progress: Vec<u8>,
    /// Serializer diagnostics, in the order they were raised.
    pub deferred: Vec<Message>,
    /// Feedback dropped because its ID was not issued by this run.
    pub dropped: usize,
}

impl ValidationReport {
    fn new(run: RunId) -> Self {
        Self {
            run,
            feedback: Vec::new(),
            errors: Vec::new(),
            progress: Vec::new(),
            deferred: Vec::new(),
            dropped: 0,
        }
    }

    /// Feedback routed to the element at `index`.
    pub fn for_element(&self, index: usize) -> impl Iterator<Item = &RoutedFeedback> {
        self.feedback
            .iter()
            .filter(move |f| f.origin == Some(Origin::Element(index)))
    }

    /// True when nothing failed and every presented result is valid.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.feedback.iter().all(|f| {
                f.unrecognized.is_empty()
                    && f.presentations
                        .iter()
                        .all(|p| p.result == feedback::ResultKind::Valid)
            })
    }

    /// Fold one reply into the report. `done` is handled by the caller.
    fn absorb(&mut self, msg: &Message, table: &CorrelationTable) {
        match msg.payload() {
            Ok(Payload::Feedback { id, results, .. }) => {
                let origin = match id {
                    Some(id) => match table.get(id) {
                        Some(origin) => Some(origin),
                        None => {
                            tracing::warn!(%id, run = %self.run, "feedback for unknown id dropped");
                            self.dropped += 1;
                            return;
                        }
                    },
                    None => None,
                };
                let mut routed = RoutedFeedback {
                    id,
                    origin,
                    presentations: Vec::new(),
                    unrecognized: Vec::new(),
                };
                for item in results {
                    match feedback::present(&item) {
                        Some(p) => routed.presentations.push(p),
                        None => routed.unrecognized.push(item),
                    }
                }
                self.feedback.push(routed);
            }
            Ok(Payload::Error { text, extra }) => {
                let origin = extra
                    .get("id")
                    .and_then(Value::as_u64)
                    .and_then(CorrelationId::new)
                    .and_then(|id| table.get(id));
                self.errors.push(RoutedError { text, origin });
            }
            Ok(Payload::Progress { complete }) => self.progress.push(complete),
            Ok(Payload::Done | Payload::Document { .. }) => {}
            Err(e) => tracing::warn!(error = %e, "unreadable reply ignored"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Drives validation runs against one worker thread.
pub struct ValidationClient {
    worker: WorkerHandle,
    encoding: Encoding,
    timeout: Option<Duration>,
    /// Context for the next run; its table is empty.
    upcoming: RunContext,
    /// Timed-out runs whose `done` has not arrived yet.
    stale: usize,
}

impl ValidationClient {
    /// Spawn a worker owning `engine`.
    pub fn new<E>(engine: E, config: ValidationConfig) -> ClientResult<Self>
    where
        E: ValidationEngine + 'static,
    {
        let encoding = config.encoding;
        let worker = worker::spawn_worker(engine, config)?;
        Ok(Self {
            worker,
            encoding,
            timeout: None,
            upcoming: RunContext::first(),
            stale: 0,
        })
    }

    /// Give up on a run when no reply arrives within `timeout`.
    ///
    /// A timed-out run keeps going on the worker. The next call to
    /// [`validate`](Self::validate) discards its replies before starting,
    /// and fails with [`ClientError::Busy`] if it is still not finished
    /// within the same timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Serialize `elements`, validate them on the worker, and wait for `done`.
    pub fn validate<T: DocumentElement>(&mut self, elements: &[T]) -> ClientResult<ValidationReport> {
        self.drain_stale()?;

        let following = self.upcoming.next();
        let context = std::mem::replace(&mut self.upcoming, following);
        let run = context.run;

        let doc = serializer::serialize(elements, self.encoding, context)?;
        self.worker.send(&doc.message)?;

        let table = &doc.context.table;
        let mut report = ValidationReport::new(run);
        for msg in &doc.deferred {
            report.absorb(msg, table);
        }
        report.deferred = doc.deferred.clone();

        loop {
            let msg = match self.timeout {
                Some(waited) => match self.worker.recv_timeout(waited)? {
                    Some(msg) => msg,
                    None => {
                        self.stale += 1;
                        tracing::warn!(%run, ?waited, "run timed out; its late replies will be discarded");
                        return Err(ClientError::Timeout { run, waited });
                    }
                },
                None => self.worker.recv()?,
            };
            if msg.is(crate::message::DONE) {
                break;
            }
            report.absorb(&msg, table);
        }

        tracing::info!(
            %run,
            feedback = report.feedback.len(),
            errors = report.errors.len(),
            "validation run finished"
        );
        Ok(report)
    }

    /// Throw away replies of timed-out runs up to and including their `done`.
    fn drain_stale(&mut self) -> ClientResult<()> {
        while self.stale > 0 {
            let msg = match self.timeout {
                Some(waited) => self.worker.recv_timeout(waited)?.ok_or(ClientError::Busy {
                    pending: self.stale,
                    waited,
                })?,
                None => self.worker.recv()?,
            };
            if msg.is(crate::message::DONE) {
                self.stale -= 1;
            }
            tracing::debug!(
                kind = msg.message_type().unwrap_or("?"),
                pending = self.stale,
                "discarded reply from a timed-out run"
            );
        }
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(self) -> ClientResult<()> {
        Ok(self.worker.shutdown()?)
    }
}
