//! Validation engine seam.
//!
//! The engine that actually checks mathematics lives outside this crate. The
//! worker hands it the decoded document root. The engine marks nodes up in
//! place with `scope errors`, `validation result` and `validation results`
//! attributes (see [`crate::lc`]) and may report progress along the way.

use crate::error::EngineResult;
use crate::lc::Node;

/// An opaque validation engine.
pub trait ValidationEngine: Send {
    /// Validate the tree rooted at `root`, annotating nodes in place.
    ///
    /// `progress` accepts a completion percentage and may be called any
    /// number of times. Returning an error aborts the run.
    fn validate(&mut self, root: &mut Node, progress: &mut dyn FnMut(u8)) -> EngineResult<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "engine"
    }
}

/// An engine that accepts everything and annotates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEngine;

impl ValidationEngine for NoopEngine {
    fn validate(&mut self, _root: &mut Node, progress: &mut dyn FnMut(u8)) -> EngineResult<()> {
        progress(100);
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

impl<F> ValidationEngine for F
where
    F: FnMut(&mut Node) -> EngineResult<()> + Send,
{
    fn validate(&mut self, root: &mut Node, _progress: &mut dyn FnMut(u8)) -> EngineResult<()> {
        self(root)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
