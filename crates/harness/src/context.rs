//! Per-scenario execution state

use apiscope_common::{CallRequest, CallResult, TraceScope, TransportKind};
use std::ops::{Deref, DerefMut};

/// Most recent call made through a context
#[derive(Debug, Clone)]
pub struct LastCall {
    /// Request as issued, before redaction
    pub request: CallRequest,
    pub result: CallResult,
}

/// State threaded through every call of one scenario
#[derive(Debug, Default)]
pub struct ExecutionContext {
    /// Per-scenario transport choice; beats the process-wide override
    pub transport: Option<TransportKind>,
    pub scope: TraceScope,
    silent: bool,
    last: Option<LastCall>,
}

impl ExecutionContext {
    pub fn new(scope: TraceScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Suppress detailed logging and trace emission until the guard drops.
    /// Windows nest; each restores the flag it found.
    pub fn silent(&mut self) -> SilentWindow<'_> {
        let previous = self.silent;
        self.silent = true;
        SilentWindow { ctx: self, previous }
    }

    pub fn last_response(&self) -> Option<&CallResult> {
        self.last.as_ref().map(|call| &call.result)
    }

    pub fn last_call(&self) -> Option<&LastCall> {
        self.last.as_ref()
    }

    pub(crate) fn set_last(&mut self, request: CallRequest, result: CallResult) {
        self.last = Some(LastCall { request, result });
    }
}

/// Guard returned by [`ExecutionContext::silent`]
pub struct SilentWindow<'a> {
    ctx: &'a mut ExecutionContext,
    previous: bool,
}

impl Deref for SilentWindow<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.ctx
    }
}

impl DerefMut for SilentWindow<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.ctx
    }
}

impl Drop for SilentWindow<'_> {
    fn drop(&mut self) {
        self.ctx.silent = self.previous;
    }
}
