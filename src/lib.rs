// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # lurch-validation
//!
//! Messaging core for validating mathematical documents off the main thread.
//!
//! ## Architecture
//!
//! - **Envelope** (`message`): typed cross-thread messages and the sinks that carry them
//! - **Correlation** (`correlation`): per-run map from node IDs back to document elements
//! - **Trees** (`lc`, `putdown`, `infix`): logic-concept nodes and their two notations
//! - **Serializer** (`element`, `serializer`): ordered elements in, one `document` message out
//! - **Worker** (`engine`, `worker`): decode, validate, and report feedback in post-order
//! - **Presenter** (`feedback`): closed mapping from raw results to display records
//! - **Client** (`client`): one run at a time, replies routed back to their elements
//!
//! ## Library usage
//!
//! ```no_run
//! use lurch_validation::client::ValidationClient;
//! use lurch_validation::config::ValidationConfig;
//! use lurch_validation::element::{Element, Language, Span};
//! use lurch_validation::engine::NoopEngine;
//!
//! let mut client = ValidationClient::new(NoopEngine, ValidationConfig::default()).unwrap();
//! let doc = vec![Element::expression(Span::new(0, 9), Language::Infix, "2 + 2 = 4")];
//! let report = client.validate(&doc).unwrap();
//! assert!(report.errors.is_empty());
//! ```

pub mod client;
pub mod config;
pub mod correlation;
pub mod element;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod infix;
pub mod lc;
pub mod message;
pub mod putdown;
pub mod serializer;
pub mod worker;
