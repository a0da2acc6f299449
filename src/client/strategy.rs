//! Perturbation proposal strategies.
//!
//! The attack loop owns accounting and acceptance; a strategy only decides
//! which perturbation to try next and learns from what the model answered.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::client::attack::Perturbation;
use crate::config::AttackConfig;
use crate::core::tensor::Tensor;
use crate::protocol::message::{Response, Want};

/// What a strategy sees before proposing.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub original: &'a Tensor,
    pub original_label: i64,
    /// Zero-based index of the probe about to be sent
    pub iteration: u64,
    pub max_distance: f64,
    pub best: Option<&'a Perturbation>,
}

/// What a strategy learns after a probe.
#[derive(Debug, Clone, Copy)]
pub struct Feedback<'a> {
    /// Perturbation actually applied, after clipping to the input bounds
    pub delta: &'a [f32],
    pub response: &'a Response,
    pub distance: f64,
    /// The model's label differs from the original
    pub adversarial: bool,
    /// The candidate became the new best
    pub accepted: bool,
}

pub trait Strategy: Send {
    /// Output kind requested with each probe.
    fn want(&self) -> Want {
        Want::Label
    }

    /// Next perturbation, as long as the original input.
    fn propose(&mut self, ctx: &StepContext<'_>) -> Vec<f32>;

    fn observe(&mut self, _feedback: &Feedback<'_>) {}
}

/// Uniform noise whose magnitude adapts to the answers.
///
/// The radius doubles after every failed probe and halves after every
/// adversarial one, so the search first finds the decision boundary and then
/// tightens around it.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: StdRng,
    epsilon: f32,
    max_epsilon: f32,
}

impl RandomSearch {
    pub fn new(seed: u64, initial_epsilon: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            epsilon: initial_epsilon,
            max_epsilon: 1.0,
        }
    }

    pub fn from_config(config: &AttackConfig) -> Self {
        let mut search = Self::new(config.seed, config.initial_epsilon);
        if let Some([lo, hi]) = config.bounds {
            search.max_epsilon = hi - lo;
        }
        search
    }

    pub fn with_max_epsilon(mut self, max_epsilon: f32) -> Self {
        self.max_epsilon = max_epsilon;
        self
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }
}

impl Strategy for RandomSearch {
    fn propose(&mut self, ctx: &StepContext<'_>) -> Vec<f32> {
        let eps = self.epsilon;
        (0..ctx.original.len())
            .map(|_| self.rng.random_range(-eps..=eps))
            .collect()
    }

    fn observe(&mut self, feedback: &Feedback<'_>) {
        self.epsilon = if feedback.adversarial {
            self.epsilon * 0.5
        } else {
            (self.epsilon * 2.0).min(self.max_epsilon)
        };
    }
}

/// Iterative gradient-sign steps inside an L-infinity ball.
///
/// Each step moves every element by `step_size` in the direction that raises
/// the loss of the current label, then clips the accumulated perturbation to
/// `[-epsilon, epsilon]`. The first probe carries no perturbation and only
/// fetches the starting gradient.
#[derive(Debug, Clone)]
pub struct GradientSign {
    step_size: f32,
    epsilon: f32,
    delta: Vec<f32>,
    gradient: Option<Vec<f32>>,
}

impl GradientSign {
    pub fn new(step_size: f32, epsilon: f32) -> Self {
        Self {
            step_size,
            epsilon,
            delta: Vec::new(),
            gradient: None,
        }
    }

    pub fn from_config(config: &AttackConfig) -> Self {
        Self::new(config.step_size, config.initial_epsilon)
    }
}

impl Strategy for GradientSign {
    fn want(&self) -> Want {
        Want::Gradient
    }

    fn propose(&mut self, ctx: &StepContext<'_>) -> Vec<f32> {
        if self.delta.len() != ctx.original.len() {
            self.delta = vec![0.0; ctx.original.len()];
        }
        if let Some(gradient) = &self.gradient {
            for (d, g) in self.delta.iter_mut().zip(gradient) {
                let sign = if *g > 0.0 {
                    1.0
                } else if *g < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                *d = (*d + self.step_size * sign).clamp(-self.epsilon, self.epsilon);
            }
        }
        self.delta.clone()
    }

    fn observe(&mut self, feedback: &Feedback<'_>) {
        // Continue from what was actually applied after bounds clipping.
        self.delta.clear();
        self.delta.extend_from_slice(feedback.delta);
        self.gradient = feedback.response.gradient.clone();
    }
}
