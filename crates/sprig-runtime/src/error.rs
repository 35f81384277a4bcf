#![forbid(unsafe_code)]

//! Errors reported by the runtime.

use sprig_core::{Id, MutationError};
use thiserror::Error;

use crate::node::NodePhase;

/// Result alias used across the runtime.
pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// A binding was handed a value outside its allowed shape.
    #[error("{component}: {role} `{name}` expects {expected}, got {value}")]
    ShapeViolation {
        component: String,
        role: &'static str,
        name: String,
        expected: &'static str,
        value: String,
    },

    #[error("no store entry named `{key}`")]
    MissingEntry { key: String },

    #[error("no ancestor provides `{alias}`")]
    MissingProvider { alias: String },

    #[error("`{alias}` is already provided by this component")]
    DuplicateProvider { alias: String },

    #[error("cannot set unknown store key `{key}`")]
    UnknownKey { key: String },

    #[error("store key `{key}` cannot be set to null or undefined")]
    NullValue { key: String },

    #[error("store entry `{key}` still has {count} subscriber(s)")]
    HasSubscribers { key: String, count: usize },

    #[error("store cannot be cleared, entries still subscribed: {keys:?}")]
    StoreBusy { keys: Vec<String> },

    #[error("component {node} is disposed, `{operation}` refused")]
    Disposed { node: String, operation: &'static str },

    #[error("component {node} cannot `{operation}` while {phase:?}")]
    InvalidPhase {
        node: String,
        operation: &'static str,
        phase: NodePhase,
    },

    #[error("component {node} still has {count} live child component(s)")]
    LiveChildren { node: String, count: usize },

    #[error("binding `{name}` still has {count} subscriber(s) and cannot be destroyed")]
    BindingDestroy { name: String, count: usize },

    #[error("binding `{name}` has been destroyed")]
    BindingDestroyed { name: String },

    #[error("element {element} is not a child component of {node}")]
    UnknownChild { node: String, element: Id },

    #[error("cannot move registration {old} to {new}")]
    RemapFailed { old: Id, new: Id },

    #[error("store entry `{key}` holds a value that cannot be persisted")]
    Unpersistable { key: String },

    #[error("backend error: {message}")]
    Backend { message: String },

    #[error(transparent)]
    Mutation(#[from] MutationError),
}
