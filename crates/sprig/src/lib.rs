#![forbid(unsafe_code)]

//! Sprig public facade crate.
//!
//! Re-exports the value model and the runtime under one name. Most
//! applications only need the prelude:
//!
//! ```
//! use sprig::prelude::*;
//!
//! let screen = ComponentNode::new("Screen");
//! let count = screen.state("count", 0).unwrap();
//! count.set(1).unwrap();
//! assert_eq!(count.get().as_number(), Some(1.0));
//! ```

pub use sprig_core as core;
pub use sprig_runtime as runtime;

pub mod prelude {
    pub use sprig_core::{Id, Mutation, Object, ObservedObject, Value};
    pub use sprig_runtime::{
        AppStore, Binding, ComponentNode, EngineConfig, Environment, MemoryBackend,
        PersistentStore, Result, StateError, StaticHost, Store, scheduler,
    };
}
