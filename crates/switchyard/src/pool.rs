//! Recycling of per-call execution frames.
//!
//! Every external call needs a mutable record for the middleware cursor, the
//! call context and the route being processed. Frames are taken from a pool,
//! reset to blank on the way in and on the way out, and handed back when the
//! guard drops, including on error and unwind paths.

use crate::config::PoolConfig;
use crate::context::CallContext;
use crate::handler::Route;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// The reusable part of an execution context.
#[derive(Default)]
pub(crate) struct Frame {
    pub(crate) call: CallContext,
    /// Index of the next per-call middleware link to enter.
    pub(crate) cursor: usize,
    /// Handler of the command currently being processed.
    pub(crate) route: Option<Arc<Route>>,
}

impl Frame {
    pub(crate) fn reset(&mut self) {
        self.call = CallContext::default();
        self.cursor = 0;
        self.route = None;
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.cursor == 0 && self.route.is_none() && self.call.is_blank()
    }
}

/// Pool of execution frames, safe for concurrent acquire and release.
pub(crate) struct ContextPool {
    idle: Mutex<Vec<Box<Frame>>>,
    max_idle: usize,
}

impl ContextPool {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        let idle = (0..config.prewarm.min(config.max_idle))
            .map(|_| Box::default())
            .collect();
        Self {
            idle: Mutex::new(idle),
            max_idle: config.max_idle,
        }
    }

    /// Take a blank frame, allocating one if the pool is empty.
    pub(crate) fn acquire(self: &Arc<Self>) -> Pooled {
        let mut frame = self.idle.lock().pop().unwrap_or_default();
        frame.reset();
        Pooled {
            frame: Some(frame),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut frame: Box<Frame>) {
        // Clearing here also drops the bus handle the frame held.
        frame.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(frame);
        }
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A frame on loan from the pool. Returned when dropped.
pub(crate) struct Pooled {
    frame: Option<Box<Frame>>,
    pool: Arc<ContextPool>,
}

impl Deref for Pooled {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame.as_deref().expect("frame is present until drop")
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Frame {
        self.frame.as_deref_mut().expect("frame is present until drop")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}
