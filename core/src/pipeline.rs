// core/src/pipeline.rs

//! `Pipeline<TData, E>`: step definitions, handler registration and the run loop.

use crate::context::ContextData;
use crate::control::{PipelineControl, PipelineResult};
use crate::error::FlowError;
use crate::step::{SkipCondition, StepDef};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::{event, instrument, span, Instrument, Level};

/// A registered step handler.
///
/// Handlers receive a clone of the shared context and resolve to
/// `Result<PipelineControl, E>`. Lock guards taken on the context must be
/// released before the handler awaits anything.
pub type Handler<TData, E> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<PipelineControl, E>> + Send>>
    + Send
    + Sync,
>;

#[derive(Debug, Clone, Copy)]
enum Phase {
  Before,
  On,
  After,
}

impl Phase {
  fn label(self) -> &'static str {
    match self {
      Phase::Before => "before",
      Phase::On => "on",
      Phase::After => "after",
    }
  }
}

pub struct Pipeline<TData, E>
where
  TData: 'static + Send + Sync,
  E: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  steps: Vec<StepDef<TData>>,
  before: HashMap<String, Vec<Handler<TData, E>>>,
  on: HashMap<String, Vec<Handler<TData, E>>>,
  after: HashMap<String, Vec<Handler<TData, E>>>,
}

impl<TData, E> Pipeline<TData, E>
where
  TData: 'static + Send + Sync,
  E: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Creates a pipeline from `(name, optional, skip_if)` step tuples.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_if)| StepDef {
        name: (*name).to_string(),
        optional: *optional,
        skip_if: skip_if.clone(),
      })
      .collect();

    Self {
      steps,
      before: HashMap::new(),
      on: HashMap::new(),
      after: HashMap::new(),
    }
  }

  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  // Registering a handler for an undeclared step is a wiring bug, not a runtime condition.
  fn ensure_step_exists(&self, step_name: &str) {
    if !self.steps.iter().any(|s| s.name == step_name) {
      panic!("hera-flow setup error: step '{}' is not declared in this pipeline", step_name);
    }
  }

  fn wrap<F, UserErr>(handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static) -> Handler<TData, E>
  where
    F: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<E> + Send + Sync + 'static,
  {
    Box::new(move |ctx_data| {
      let fut = handler_fn(ctx_data);
      Box::pin(async move { fut.await.map_err(Into::into) })
    })
  }

  pub fn before_step<F, UserErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<E> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    let handler = Self::wrap(handler_fn);
    self.before.entry(step_name.to_string()).or_default().push(handler);
  }

  pub fn on_step<F, UserErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<E> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    let handler = Self::wrap(handler_fn);
    self.on.entry(step_name.to_string()).or_default().push(handler);
  }

  pub fn after_step<F, UserErr>(
    &mut self,
    step_name: &str,
    handler_fn: impl Fn(ContextData<TData>) -> F + Send + Sync + 'static,
  ) where
    F: Future<Output = Result<PipelineControl, UserErr>> + Send + 'static,
    UserErr: Into<E> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    let handler = Self::wrap(handler_fn);
    self.after.entry(step_name.to_string()).or_default().push(handler);
  }

  fn handlers_for(&self, phase: Phase, step_name: &str) -> &[Handler<TData, E>] {
    let map = match phase {
      Phase::Before => &self.before,
      Phase::On => &self.on,
      Phase::After => &self.after,
    };
    map.get(step_name).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Runs every step in declaration order against `ctx_data`.
  ///
  /// Returns `Stopped` as soon as any handler asks to stop, the handler's
  /// error as soon as one fails, and `Completed` otherwise. A non-optional
  /// step with no handlers at all is reported as `FlowError::HandlerMissing`.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(context_type = %std::any::type_name::<TData>(), num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, E> {
    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      if let Some(skip_if) = &step_def.skip_if {
        if skip_if(ctx_data.clone()) {
          event!(Level::DEBUG, step = step_name, "Step skipped by skip_if condition.");
          continue;
        }
      }

      let phases = [Phase::Before, Phase::On, Phase::After];
      if phases.iter().all(|phase| self.handlers_for(*phase, step_name).is_empty()) {
        if step_def.optional {
          event!(Level::DEBUG, step = step_name, "Optional step has no handlers, skipping.");
          continue;
        }
        event!(Level::ERROR, step = step_name, "Non-optional step has no handlers.");
        return Err(E::from(FlowError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      for phase in phases {
        for (handler_idx, handler_fn) in self.handlers_for(phase, step_name).iter().enumerate() {
          let handler_span = span!(
            Level::DEBUG,
            "step_handler",
            step = step_name,
            step_index = step_idx,
            phase = phase.label(),
            handler_index = handler_idx
          );
          match handler_fn(ctx_data.clone()).instrument(handler_span).await {
            Ok(PipelineControl::Continue) => {}
            Ok(PipelineControl::Stop) => {
              event!(Level::INFO, step = step_name, phase = phase.label(), "Pipeline stopped by handler.");
              return Ok(PipelineResult::Stopped);
            }
            Err(e) => {
              event!(Level::ERROR, step = step_name, phase = phase.label(), error = %e, "Handler failed.");
              return Err(e);
            }
          }
        }
      }
    }

    Ok(PipelineResult::Completed)
  }
}
