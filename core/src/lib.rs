// core/src/lib.rs

//! hera-flow: a small asynchronous step pipeline engine.
//!
//! A pipeline is an ordered list of named steps operating on one shared
//! context (`ContextData<T>`). Every step may carry `before`, `on` and `after`
//! handlers. A handler either lets the pipeline continue, stops it early
//! (a normal, non-error outcome) or fails it with the pipeline's error type.
//!
//! Steps can be optional (skipped silently when nothing is registered for
//! them) and can carry a `skip_if` predicate evaluated against the context
//! right before the step runs.
//!
//! `FlowRegistry<E>` keeps one pipeline per context type, so callers only
//! need to build the context and hand it to `FlowRegistry::run`.

pub mod context;
pub mod control;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod step;

pub use crate::context::ContextData;
pub use crate::control::{PipelineControl, PipelineResult};
pub use crate::error::{FlowError, FlowResult};
pub use crate::pipeline::{Handler, Pipeline};
pub use crate::registry::FlowRegistry;
pub use crate::step::{SkipCondition, StepDef};
