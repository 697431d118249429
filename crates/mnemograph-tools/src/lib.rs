//! Mnemograph tools — the dispatcher and the complete tool surface
//!
//! The registry is a flat table of [`registry::ToolSpec`] values; each spec
//! carries its metadata, input shape, output field priorities, argument
//! synonyms and a boxed async handler. [`context::Engines`] wires the
//! stores and engines together and is shared by every handler.

pub mod args;
pub mod context;
pub mod pack;
pub mod registry;
pub mod schema;
pub mod tools;

pub use context::{Engines, ToolContext};
pub use registry::{handler, Handler, ToolOutput, ToolRegistry, ToolSpec};
pub use schema::{ArgSpec, ArgType, InputShape, ValidationReport};
