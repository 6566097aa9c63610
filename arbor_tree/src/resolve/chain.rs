// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Presentation handler chains and post-processors.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use arbor_bus::Deferral;

use super::NodeView;
use crate::error::Error;
use crate::node::NodeState;
use crate::tree::{Command, Tree};

/// Whether a handler lets the rest of the chain run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    /// Keep going.
    Continue,
    /// Stop; later handlers do not run.
    Stop,
}

/// Presents a node during drawing.
pub trait Handler {
    /// Runtime check beyond the type shape. Defaults to accepting every node.
    fn can_handle(&self, node: &NodeView<'_>) -> bool {
        let _ = node;
        true
    }

    /// Present the node.
    fn present(&self, cx: &mut PresentCx<'_>) -> Result<Outcome, Error>;
}

/// Context handed to [`Handler::present`].
///
/// Handlers cannot touch the tree while it draws; they queue work instead.
pub struct PresentCx<'a> {
    /// The node being presented.
    pub node: NodeView<'a>,
    /// Depth below the root.
    pub depth: usize,
    /// Output sink.
    pub out: &'a mut dyn fmt::Write,
    pub(crate) requests: Vec<(Deferral, Command)>,
}

impl fmt::Debug for PresentCx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentCx")
            .field("node", &self.node.id)
            .field("depth", &self.depth)
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl<'a> PresentCx<'a> {
    pub(crate) fn new(node: NodeView<'a>, depth: usize, out: &'a mut dyn fmt::Write) -> Self {
        Self {
            node,
            depth,
            out,
            requests: Vec::new(),
        }
    }

    /// Refresh this node at the end of the current pass.
    pub fn request_refresh(&mut self) {
        self.requests
            .push((Deferral::EndOfPass, Command::Refresh(self.node.id)));
    }

    /// Run `f` against the tree at the end of the current pass.
    pub fn request(&mut self, f: impl FnOnce(&mut Tree) -> Result<(), Error> + 'static) {
        self.requests
            .push((Deferral::EndOfPass, Command::Callback(Box::new(f))));
    }

    /// Run `f` against the tree when the next pass begins.
    pub fn request_until_next_stable_pass(
        &mut self,
        f: impl FnOnce(&mut Tree) -> Result<(), Error> + 'static,
    ) {
        self.requests
            .push((Deferral::NextStablePass, Command::Callback(Box::new(f))));
    }
}

/// Handlers accepted for a node, best first, with a cursor.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Rc<dyn Handler>>,
    position: usize,
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .field("position", &self.position)
            .finish()
    }
}

impl HandlerChain {
    /// Chain over `handlers`, cursor at the start.
    pub fn new(handlers: Vec<Rc<dyn Handler>>) -> Self {
        Self {
            handlers,
            position: 0,
        }
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if there are no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Handler under the cursor.
    pub fn current(&self) -> Option<&Rc<dyn Handler>> {
        self.handlers.get(self.position)
    }

    /// Advance the cursor. Returns `false` once past the end.
    pub fn next(&mut self) -> bool {
        if self.position < self.handlers.len() {
            self.position += 1;
        }
        self.position < self.handlers.len()
    }

    /// Move the cursor back to the start.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Run handlers from the start until one stops or fails.
    ///
    /// Returns the index of the handler that stopped the chain, if any. The cursor is left
    /// on that handler, or past the end.
    pub fn run(&mut self, cx: &mut PresentCx<'_>) -> Result<Option<usize>, Error> {
        self.reset();
        while let Some(handler) = self.current().cloned() {
            if handler.present(cx)? == Outcome::Stop {
                return Ok(Some(self.position));
            }
            self.next();
        }
        Ok(None)
    }
}

/// Adjusts a node's state once per refresh.
pub trait Processor {
    /// Runtime check beyond the type shape. Defaults to accepting every node.
    fn can_process(&self, node: &NodeView<'_>) -> bool {
        let _ = node;
        true
    }

    /// Process the node.
    fn process(&self, cx: &mut ProcessCx<'_>) -> Result<(), Error>;
}

/// Context handed to [`Processor::process`].
#[derive(Debug)]
pub struct ProcessCx<'a> {
    /// The node.
    pub node: NodeView<'a>,
    /// Its flags, writable.
    pub state: &'a mut NodeState,
}

/// Processors accepted for a node, best first.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Rc<dyn Processor>>,
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("len", &self.processors.len())
            .finish()
    }
}

impl ProcessorChain {
    /// Chain over `processors`.
    pub fn new(processors: Vec<Rc<dyn Processor>>) -> Self {
        Self { processors }
    }

    /// Number of processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` if there are no processors.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor in order, stopping at the first error.
    pub fn run(&self, cx: &mut ProcessCx<'_>) -> Result<(), Error> {
        for p in &self.processors {
            p.process(cx)?;
        }
        Ok(())
    }
}

/// Clears [`NodeState::ENABLED`] on read-only nodes.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReadOnlyDisables;

impl Processor for ReadOnlyDisables {
    fn process(&self, cx: &mut ProcessCx<'_>) -> Result<(), Error> {
        let read_only = cx.node.definition.is_read_only()
            || cx.node.entry.is_some_and(|e| e.is_read_only());
        if read_only {
            cx.state.remove(NodeState::ENABLED);
        }
        Ok(())
    }
}
