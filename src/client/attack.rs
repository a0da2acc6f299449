//! # Attack Loop
//!
//! [`BsonAttack`] drives a [`Strategy`] against a [`Model`] until it finds an
//! adversarial example, the session budget runs out, the iteration cap is
//! reached or the run is cancelled.
//!
//! The bookkeeping lives in [`AttackRun`], a synchronous state object with no
//! I/O, so the acceptance rule and stop conditions can be exercised without a
//! model. A candidate is accepted when:
//!
//! - the model's label differs from the original label,
//! - its distance to the original is at most `max_distance`, and
//! - its distance is strictly smaller than the best accepted so far.
//!
//! Running out of budget ends the run normally with whatever was found; any
//! other model error aborts it.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::distance::Distance;
use crate::client::strategy::{Feedback, StepContext, Strategy};
use crate::client::Model;
use crate::config::AttackConfig;
use crate::core::tensor::Tensor;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Response, Want};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An acceptable candidate was found and the run stops on success
    Success,
    /// The server refused further queries
    BudgetExhausted,
    /// `max_iterations` probes were sent
    IterationCap,
    Cancelled,
}

/// Whether the loop goes on after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(StopReason),
}

/// An accepted adversarial candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    delta: Vec<f32>,
    candidate: Tensor,
    label: i64,
    distance: f64,
    iteration: u64,
}

impl Perturbation {
    /// Perturbation applied to the original, after bounds clipping.
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    pub fn candidate(&self) -> &Tensor {
        &self.candidate
    }

    /// Label the model gave the candidate.
    pub fn label(&self) -> i64 {
        self.label
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// One-based iteration that produced it.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }
}

/// Outcome of an attack run.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackResult {
    original_label: Option<i64>,
    best: Option<Perturbation>,
    queries_used: u64,
    iterations: u64,
    stop_reason: StopReason,
}

impl AttackResult {
    pub fn success(&self) -> bool {
        self.best.is_some()
    }

    pub fn best(&self) -> Option<&Perturbation> {
        self.best.as_ref()
    }

    pub fn into_best(self) -> Option<Perturbation> {
        self.best
    }

    /// Distance of the best candidate, if any.
    pub fn distance(&self) -> Option<f64> {
        self.best.as_ref().map(Perturbation::distance)
    }

    /// Queries charged by the server during the run, including the one that
    /// established the original label when it was not given.
    pub fn queries_used(&self) -> u64 {
        self.queries_used
    }

    /// Candidate probes answered by the model.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Label of the unperturbed input; unknown only if the budget ran out
    /// before it could be queried.
    pub fn original_label(&self) -> Option<i64> {
        self.original_label
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }
}

/// What [`AttackRun::observe`] concluded about one answered probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub step: Step,
    pub distance: f64,
    pub adversarial: bool,
    pub accepted: bool,
}

/// State of one attack run.
#[derive(Debug, Clone)]
pub struct AttackRun {
    original: Tensor,
    original_label: i64,
    max_distance: f64,
    stop_on_success: bool,
    max_iterations: u64,
    metric: Distance,
    bounds: Option<[f32; 2]>,
    iterations: u64,
    queries_used: u64,
    best: Option<Perturbation>,
}

impl AttackRun {
    pub fn new(
        original: Tensor,
        original_label: i64,
        max_distance: f64,
        stop_on_success: bool,
        config: &AttackConfig,
    ) -> Self {
        Self {
            original,
            original_label,
            max_distance,
            stop_on_success,
            max_iterations: config.max_iterations,
            metric: config.distance,
            bounds: config.bounds,
            iterations: 0,
            queries_used: 0,
            best: None,
        }
    }

    /// Account for queries spent outside the candidate loop.
    pub fn charge_setup_query(&mut self) {
        self.queries_used += 1;
    }

    pub fn best(&self) -> Option<&Perturbation> {
        self.best.as_ref()
    }

    pub fn queries_used(&self) -> u64 {
        self.queries_used
    }

    /// Check the iteration cap before the next probe.
    pub fn begin(&self) -> Step {
        if self.iterations >= self.max_iterations {
            Step::Stop(StopReason::IterationCap)
        } else {
            Step::Continue
        }
    }

    pub fn context(&self) -> StepContext<'_> {
        StepContext {
            original: &self.original,
            original_label: self.original_label,
            iteration: self.iterations,
            max_distance: self.max_distance,
            best: self.best.as_ref(),
        }
    }

    /// Apply `delta` to the original and clip into the input bounds.
    ///
    /// Returns the effective perturbation and the candidate.
    ///
    /// # Errors
    /// `ShapeMismatch` if `delta` is not as long as the original.
    pub fn candidate(&self, delta: &[f32]) -> Result<(Vec<f32>, Tensor)> {
        let original = self.original.data();
        if delta.len() != original.len() {
            return Err(ProtocolError::ShapeMismatch {
                expected: self.original.shape().to_vec(),
                actual: vec![delta.len()],
            });
        }

        let data: Vec<f32> = original
            .iter()
            .zip(delta)
            .map(|(&x, &d)| {
                let v = x + d;
                match self.bounds {
                    Some([lo, hi]) => v.clamp(lo, hi),
                    None => v,
                }
            })
            .collect();
        let effective = data.iter().zip(original).map(|(&c, &x)| c - x).collect();
        let candidate = self.original.with_data(data)?;
        Ok((effective, candidate))
    }

    /// Record the model's answer to `candidate` and decide whether to go on.
    pub fn observe(&mut self, delta: &[f32], candidate: &Tensor, response: &Response) -> Observation {
        self.iterations += 1;
        self.queries_used += 1;

        let distance = self.metric.measure(self.original.data(), candidate.data());
        let adversarial = response.label != self.original_label;
        let improves = self.best.as_ref().map_or(true, |b| distance < b.distance);
        let accepted = adversarial && distance <= self.max_distance && improves;

        if accepted {
            info!(
                iteration = self.iterations,
                label = response.label,
                distance,
                "New best adversarial candidate"
            );
            self.best = Some(Perturbation {
                delta: delta.to_vec(),
                candidate: candidate.clone(),
                label: response.label,
                distance,
                iteration: self.iterations,
            });
        } else {
            debug!(
                iteration = self.iterations,
                label = response.label,
                distance,
                adversarial,
                "Candidate rejected"
            );
        }

        let step = if accepted && self.stop_on_success {
            Step::Stop(StopReason::Success)
        } else if self.iterations >= self.max_iterations {
            Step::Stop(StopReason::IterationCap)
        } else {
            Step::Continue
        };

        Observation {
            step,
            distance,
            adversarial,
            accepted,
        }
    }

    pub fn finish(self, stop_reason: StopReason) -> AttackResult {
        AttackResult {
            original_label: Some(self.original_label),
            best: self.best,
            queries_used: self.queries_used,
            iterations: self.iterations,
            stop_reason,
        }
    }
}

/// Query-budgeted black-box attack against a [`Model`].
pub struct BsonAttack<S> {
    strategy: S,
    config: AttackConfig,
    original_label: Option<i64>,
    cancel: CancellationToken,
}

impl<S: Strategy> BsonAttack<S> {
    pub fn new(strategy: S, config: AttackConfig) -> Self {
        Self {
            strategy,
            config,
            original_label: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Skip the query that would otherwise establish the original label.
    pub fn with_original_label(mut self, label: i64) -> Self {
        self.original_label = Some(label);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the run before its next probe.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Search for an input the model labels differently from `original`,
    /// at most `max_distance` away.
    ///
    /// With `stop_on_success` the run ends at the first acceptable candidate;
    /// otherwise it keeps looking for closer ones until the budget or the
    /// iteration cap runs out.
    ///
    /// # Errors
    /// `ShapeMismatch` if the server rejects the input shape or the strategy
    /// proposes a wrongly sized perturbation; any model error other than an
    /// exhausted budget.
    pub async fn run<M: Model>(
        &mut self,
        model: &mut M,
        original: &Tensor,
        max_distance: f64,
        stop_on_success: bool,
    ) -> Result<AttackResult> {
        info!(
            max_distance,
            stop_on_success,
            max_iterations = self.config.max_iterations,
            metric = self.config.distance.name(),
            "Starting attack"
        );

        let mut labelled_by_query = false;
        let original_label = match self.original_label {
            Some(label) => label,
            None => match model.predict(original, Want::Label).await {
                Ok(response) => {
                    labelled_by_query = true;
                    response.label
                }
                Err(e) if e.is_budget_exhausted() => {
                    warn!("Budget exhausted before the original label was known");
                    return Ok(AttackResult {
                        original_label: None,
                        best: None,
                        queries_used: 0,
                        iterations: 0,
                        stop_reason: StopReason::BudgetExhausted,
                    });
                }
                Err(e) => return Err(e),
            },
        };

        let mut run = AttackRun::new(
            original.clone(),
            original_label,
            max_distance,
            stop_on_success,
            &self.config,
        );
        if labelled_by_query {
            run.charge_setup_query();
        }

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if let Step::Stop(reason) = run.begin() {
                break reason;
            }

            let proposed = self.strategy.propose(&run.context());
            let (delta, candidate) = run.candidate(&proposed)?;

            let response = match model.predict(&candidate, self.strategy.want()).await {
                Ok(response) => response,
                Err(e) if e.is_budget_exhausted() => break StopReason::BudgetExhausted,
                Err(e) => {
                    warn!(error = %e, "Attack aborted by model error");
                    return Err(e);
                }
            };

            let observation = run.observe(&delta, &candidate, &response);
            self.strategy.observe(&Feedback {
                delta: &delta,
                response: &response,
                distance: observation.distance,
                adversarial: observation.adversarial,
                accepted: observation.accepted,
            });

            if let Step::Stop(reason) = observation.step {
                break reason;
            }
        };

        let result = run.finish(reason);
        info!(
            success = result.success(),
            queries_used = result.queries_used(),
            iterations = result.iterations(),
            distance = ?result.distance(),
            stop_reason = ?result.stop_reason(),
            "Attack finished"
        );
        Ok(result)
    }
}
