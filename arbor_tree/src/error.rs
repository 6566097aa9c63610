// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use alloc::string::String;

use arbor_bus::BusError;
use arbor_match::TypeError;

use crate::node::NodeId;

/// A [`Definition`](crate::Definition) could not be built.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    /// Names identify siblings and cannot be empty.
    #[error("definition name is empty")]
    EmptyName,
    /// A value-bearing role was given no accessor.
    #[error("definition `{0}` needs an accessor")]
    MissingAccessor(String),
}

/// Reading or writing through an [`Accessor`](crate::Accessor) failed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AccessError {
    /// The owner is `Null`.
    #[error("owner is null")]
    NullOwner,
    /// The owner is not the kind of value the accessor addresses.
    #[error("owner is not {0}")]
    WrongOwner(&'static str),
    /// An item index is past the end.
    #[error("index {0} is out of range")]
    OutOfRange(usize),
    /// A map has no such key.
    #[error("no entry for key `{0}`")]
    MissingKey(String),
    /// The accessor cannot be read.
    #[error("accessor is not readable")]
    NotReadable,
    /// The accessor cannot be written.
    #[error("accessor is not writable")]
    NotWritable,
}

/// A resolver provider failed to build its resolver.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ResolverError {
    /// The provider reported a failure. Kept on the node; the pass continues.
    #[error("resolver construction failed: {0}")]
    Construction(String),
    /// A definition built by the provider was invalid.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    /// Abort the current pass.
    #[error("exit pass")]
    ExitPass,
}

impl ResolverError {
    /// Returns `true` for the pass-exit signal, which is never kept node-local.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::ExitPass)
    }
}

/// Errors returned by tree operations.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// The node handle no longer refers to a live node.
    #[error("node {0:?} is disposed")]
    Disposed(NodeId),
    /// The tree was disposed.
    #[error("tree is disposed")]
    TreeDisposed,
    /// Trees need at least one target, and all targets must share one type.
    #[error("invalid targets: {0}")]
    InvalidTargets(&'static str),
    /// Definition construction failed.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    /// Reading or writing a value failed.
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The value is read-only.
    #[error("`{0}` is read-only")]
    ReadOnly(String),
    /// The value is not assignable to the entry's type.
    #[error("expected a value assignable to `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Type the entry accepts.
        expected: String,
        /// Type of the rejected value.
        found: String,
    },
    /// The node does not represent a method.
    #[error("node is not a method")]
    NotAMethod,
    /// No implementation is registered for the method on the target's type.
    #[error("no implementation for method `{0}`")]
    MissingMethod(String),
    /// A move would make a node its own ancestor, or targets a node that is not attached.
    #[error("invalid move")]
    InvalidMove,
    /// Abort the current pass. Propagates through every layer unchanged.
    #[error("exit pass")]
    ExitPass,
    /// Move-event batching was misused.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Type registration failed.
    #[error(transparent)]
    Type(#[from] TypeError),
    /// A resolver failed to build.
    #[error(transparent)]
    Resolver(ResolverError),
}

impl From<ResolverError> for Error {
    fn from(e: ResolverError) -> Self {
        match e {
            ResolverError::ExitPass => Self::ExitPass,
            other => Self::Resolver(other),
        }
    }
}

impl Error {
    /// Returns `true` for the pass-exit signal.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::ExitPass)
    }
}
