//! Machine control engine protocol.
//!
//! The server front end never links against an engine directly. Everything it
//! needs from the engine (module loading, storage, the execution context and
//! the per-request handlers) is expressed as the traits in [`engine`], and
//! concrete engines are handed in through an [`EngineFactory`].

pub mod engine;
pub mod error;
pub mod types;

pub use engine::{
    CoreModule, DataModel, DataModule, EngineFactory, ExecutionContext, Handler, LogCallback,
};
pub use error::{EngineError, EngineResult};
pub use types::{
    DatabaseType, FieldDescriptor, HandlerResponse, LogLevel, LogSubSystem, SymbolLookup, Version,
};

/// Name under which the storage module's symbol lookup is injected into the core module.
pub const DATA_COMPONENT: &str = "datamodel";
