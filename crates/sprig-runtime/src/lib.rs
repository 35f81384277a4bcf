#![forbid(unsafe_code)]

//! Reactive state runtime for Sprig.
//!
//! # Role in Sprig
//! `sprig-runtime` turns the primitives of `sprig-core` into a state engine
//! for a declarative UI: bindings hold application data, component nodes
//! record which rendered elements read which bindings, and a change to a
//! binding re-runs only the update functions of the elements that read it.
//!
//! # Primary responsibilities
//! - **Bindings** ([`binding`]): local state, one-way props, two-way links
//!   and nested-object links, with change propagation and delayed delivery
//!   to inactive components.
//! - **Component nodes** ([`node`]): the component tree, per-element read
//!   tracking, dirty-set replay, activation, disposal and recycling.
//! - **Scheduling** ([`scheduler`]): one replay pass over every dirty node,
//!   in ascending id order.
//! - **Stores** ([`store`]): app-wide and local keyed state, plus the
//!   persistence and environment adapters.
//! - **Configuration** ([`config`]): copy and delay policies and the replay
//!   round limit.
//!
//! # How it fits in the system
//! The host owns the element tree. It creates nodes, registers one update
//! function per element, reports deleted elements
//! ([`render::report_deleted_elements`]) and calls
//! [`scheduler::run_pass`] when it wants the UI brought up to date.
//!
//! # Threading
//! Single-threaded. Handles are `Rc`-based and not `Send`; the application
//! store, the render stack and the scheduler queue are thread-scoped.

pub mod binding;
pub mod config;
pub mod error;
pub mod node;
pub mod render;
pub mod scheduler;
pub mod store;

pub use binding::{Binding, BindingKind, BindingRole, Origin, read, write};
pub use config::{ConfigOverride, CopyPolicy, DelayPolicy, EngineConfig};
pub use error::{Result, StateError};
pub use node::{ComponentNode, NodePhase};
pub use store::{
    AppStore, ChangeListener, Environment, HostSignals, KeyValueBackend, MemoryBackend,
    PersistentStore, StaticHost, Store,
};
#[cfg(feature = "state-persistence")]
pub use store::backend::FileBackend;
