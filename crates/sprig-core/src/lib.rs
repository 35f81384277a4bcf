#![forbid(unsafe_code)]

//! Core primitives for Sprig's reactive state engine.
//!
//! - [`Id`]: globally unique identity shared by subscribers and rendered
//!   elements.
//! - [`registry`]: the thread-scoped Subscriber Registry that resolves ids to
//!   live subscribers.
//! - [`Value`]: the dynamic data model applications store in bindings.
//! - [`ObservedObject`]: the observation wrapper that turns in-place mutation
//!   of compound values into owner notifications.
//! - [`copy`]: shallow and deep (cycle-safe) snapshot copies.
//!
//! # Threading
//!
//! The engine is single-threaded and cooperative. Everything here uses
//! `Rc`/`RefCell`, and "process-wide" state is thread-scoped: each thread
//! that builds a UI owns its own registry and id counter.

pub mod copy;
pub mod id;
pub mod mutation;
pub mod observed;
pub mod registry;
pub mod value;

pub use copy::{deep_copy, detach, shallow_copy};
pub use id::Id;
pub use mutation::{Mutation, MutationError};
pub use observed::{ObjectChange, ObservedObject, unwrap_value, wrap_value};
pub use registry::{Subscriber, SubscriberRegistry};
pub use value::{Callback, Compound, CompoundKind, Object, Shape, Value, deep_eq};
