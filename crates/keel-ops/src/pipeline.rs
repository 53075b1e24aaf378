use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use keel_types::OperationId;

use crate::cancel::CancelToken;

/// Failure reported by a pipeline step.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StepError(pub String);

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a step sees when it runs.
#[derive(Clone, Debug)]
pub struct StepContext {
    pub operation: OperationId,
    /// Position of this step in the pipeline, starting at 0.
    pub index: usize,
    /// Output of the previous step, `Null` for the first.
    pub input: Value,
    /// Long steps may poll this between chunks of work.
    pub token: CancelToken,
}

/// One unit of work in a [`Pipeline`]: typically a transport call the host
/// provides.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: StepContext) -> Result<Value, StepError>;
}

/// A step built from an async closure.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> PipelineStep for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: StepContext) -> Result<Value, StepError> {
        (self.f)(ctx).await
    }
}

pub(crate) struct WeightedStep {
    pub(crate) weight: f64,
    pub(crate) step: Box<dyn PipelineStep>,
}

/// Ordered, weighted steps. Progress after a step is the completed share of
/// the total weight.
#[derive(Default)]
pub struct Pipeline {
    pub(crate) steps: Vec<WeightedStep>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Non-positive or non-finite weights count as zero.
    pub fn step(mut self, weight: f64, step: impl PipelineStep + 'static) -> Self {
        let weight = if weight.is_finite() && weight > 0.0 { weight } else { 0.0 };
        self.steps.push(WeightedStep {
            weight,
            step: Box::new(step),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.steps.iter().map(|s| s.weight).sum()
    }

    /// Progress percentage once `done` weight has completed.
    pub(crate) fn percent(&self, done: f64) -> f64 {
        let total = self.total_weight();
        if total <= 0.0 {
            return 100.0;
        }
        (done / total * 100.0).clamp(0.0, 100.0)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(|s| s.step.name()).collect();
        f.debug_struct("Pipeline").field("steps", &names).finish()
    }
}
