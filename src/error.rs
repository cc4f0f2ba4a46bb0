//! Rich diagnostic error types for the validation pipeline.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers know exactly what went wrong
//! on which side of the thread boundary.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the validation pipeline.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum LurchError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Notation(#[from] NotationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Message errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MessageError {
    #[error("cannot build a message from {found}")]
    #[diagnostic(
        code(lurch::message::unsupported_input),
        help(
            "A message can be built from an event carrying a `data` field, \
             a plain string (wrapped as {{\"text\": ...}}), or a JSON object. \
             Numbers, booleans, arrays and null are rejected."
        )
    )]
    UnsupportedInput { found: String },

    #[error("no channel to send on: no target given and no ambient port installed")]
    #[diagnostic(
        code(lurch::message::no_channel),
        help(
            "Pass an explicit sink to `Message::send`, or install one for this thread \
             with `message::install_port` before sending."
        )
    )]
    NoChannel,

    #[error("message does not decode as a known payload: {message}")]
    #[diagnostic(
        code(lurch::message::payload),
        help(
            "Typed payloads require a `type` of document, feedback, progress, error or done, \
             plus the fields that type carries."
        )
    )]
    Payload { message: String },
}

pub type MessageResult<T> = std::result::Result<T, MessageError>;

// ---------------------------------------------------------------------------
// Notation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum NotationError {
    #[error("unexpected {found} at offset {offset}")]
    #[diagnostic(
        code(lurch::notation::unexpected),
        help("Check the expression near the reported offset for a stray or missing symbol.")
    )]
    Unexpected { found: String, offset: usize },

    #[error("unexpected end of input: expected {expected}")]
    #[diagnostic(
        code(lurch::notation::eof),
        help("The expression ended early. Look for an unclosed bracket or a dangling operator.")
    )]
    UnexpectedEnd { expected: String },

    #[error("malformed attribute block at offset {offset}: {message}")]
    #[diagnostic(
        code(lurch::notation::attributes),
        help("Attributes follow a node as `+{{...}}` and must be a single JSON object.")
    )]
    Attributes { offset: usize, message: String },

    #[error("malformed quoted symbol at offset {offset}")]
    #[diagnostic(
        code(lurch::notation::quoted),
        help("Quoted symbols use JSON string syntax, e.g. \"a b\" or \"\\u00b7\".")
    )]
    Quoted { offset: usize },

    #[error("empty expression")]
    #[diagnostic(
        code(lurch::notation::empty),
        help("The atom contains no meaning to serialize. Type an expression or remove the atom.")
    )]
    Empty,

    #[error("expression nests deeper than {limit} levels at offset {offset}")]
    #[diagnostic(
        code(lurch::notation::too_deep),
        help("Split the expression into smaller atoms or remove redundant brackets.")
    )]
    TooDeep { offset: usize, limit: usize },

    #[error("tree cannot be written as putdown: {reason}")]
    #[diagnostic(
        code(lurch::notation::unrepresentable),
        help("Putdown reserves the `id` attribute for correlation IDs and has no form for an application without a head. Use the json encoding for such trees.")
    )]
    Unrepresentable { reason: String },
}

pub type NotationResult<T> = std::result::Result<T, NotationError>;

// ---------------------------------------------------------------------------
// Serializer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SerializeError {
    #[error("unsupported encoding: \"{encoding}\"")]
    #[diagnostic(
        code(lurch::serialize::encoding),
        help("Documents can be encoded as \"json\" or \"putdown\".")
    )]
    UnsupportedEncoding { encoding: String },

    #[error("failed to encode document as {encoding}: {message}")]
    #[diagnostic(
        code(lurch::serialize::encode),
        help("The document tree could not be written out. This is a bug; please report it.")
    )]
    Encode { encoding: String, message: String },

    #[error("failed to read document description from {path}: {message}")]
    #[diagnostic(
        code(lurch::serialize::document_read),
        help("The file must contain a JSON array of elements with `span` and `kind` fields.")
    )]
    DocumentRead { path: String, message: String },

    #[error("element span {start}..{end} cannot be shifted past a header ending at {shift}")]
    #[diagnostic(
        code(lurch::serialize::span_overflow),
        help("Element spans must be byte offsets into a real document.")
    )]
    SpanOverflow { start: usize, end: usize, shift: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Notation(#[from] NotationError),
}

pub type SerializeResult<T> = std::result::Result<T, SerializeError>;

// ---------------------------------------------------------------------------
// Decode errors (worker side)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("unsupported encoding: \"{encoding}\"")]
    #[diagnostic(
        code(lurch::decode::encoding),
        help("The worker understands \"json\" and \"putdown\" documents only.")
    )]
    UnsupportedEncoding { encoding: String },

    #[error("document message is missing the `{field}` field")]
    #[diagnostic(
        code(lurch::decode::missing_field),
        help("Document messages carry `encoding` and `code` strings.")
    )]
    MissingField { field: &'static str },

    #[error("invalid JSON document: {message}")]
    #[diagnostic(
        code(lurch::decode::json),
        help("The `code` field did not decode as a document tree.")
    )]
    Json { message: String },

    #[error("invalid putdown document: {source}")]
    #[diagnostic(
        code(lurch::decode::putdown),
        help("The `code` field did not parse as putdown notation.")
    )]
    Putdown {
        #[source]
        source: NotationError,
    },

    #[error("expected exactly one root node, found {count}")]
    #[diagnostic(
        code(lurch::decode::root_count),
        help("A serialized document is a single environment containing everything else.")
    )]
    RootCount { count: usize },

    #[error("document nests deeper than {limit} levels")]
    #[diagnostic(
        code(lurch::decode::too_deep),
        help("The serializer never produces trees this deep; the document did not come from it.")
    )]
    TooDeep { limit: usize },
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("validation engine failed: {message}")]
    #[diagnostic(
        code(lurch::engine::failed),
        help("The validation engine aborted this run. No feedback was produced for the document.")
    )]
    Failed { message: String },

    #[error("validation worker is unavailable: {message}")]
    #[diagnostic(
        code(lurch::engine::worker_gone),
        help("The worker thread exited or its channel closed. Start a new client.")
    )]
    WorkerGone { message: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(lurch::config::read),
        help("Check that the file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(lurch::config::parse),
        help("The config file must be valid TOML. See `lurch-validate config init` for a template.")
    )]
    ConfigParse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(lurch::config::write),
        help("Check that the parent directory is writable.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value for {field}: {message}")]
    #[diagnostic(
        code(lurch::config::invalid),
        help("Fix the value in the config file or override it on the command line.")
    )]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Convenience alias for functions returning `LurchError`.
pub type LurchResult<T> = std::result::Result<T, LurchError>;
