// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use alloc::string::String;

/// Errors raised while registering or instantiating types.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TypeError {
    /// A handle did not come from this table.
    #[error("unknown type handle {0}")]
    UnknownType(u32),
    /// A type with the same name is already registered.
    #[error("type `{0}` is already registered")]
    DuplicateName(String),
    /// A member name collides with one declared on the type or its bases.
    #[error("member `{0}` is already declared")]
    DuplicateMember(String),
    /// `instantiate` was called on a type that is not an open generic definition.
    #[error("type `{0}` is not a generic definition")]
    NotGeneric(String),
    /// Wrong number of type arguments.
    #[error("`{name}` expects {expected} type arguments, found {found}")]
    Arity {
        /// Definition name.
        name: String,
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },
}
