#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Arc;

use adversarial_protocol::client::Model;
use adversarial_protocol::config::ServerConfig;
use adversarial_protocol::error::{ProtocolError, Result};
use adversarial_protocol::protocol::{Response, Want};
use adversarial_protocol::server::{Classifier, Inference, LinearClassifier};
use adversarial_protocol::{ModelServer, Tensor};

/// Two features, label = index of the larger one.
pub fn two_class_classifier() -> LinearClassifier {
    LinearClassifier::new(
        vec![2],
        vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        vec![0.0, 0.0],
    )
    .expect("classifier")
}

pub fn server() -> Arc<ModelServer> {
    server_with(ServerConfig::default())
}

pub fn server_with(config: ServerConfig) -> Arc<ModelServer> {
    Arc::new(ModelServer::new(Arc::new(two_class_classifier()), config))
}

/// Label 1 when the mean input exceeds a threshold, else 0. No gradients.
pub struct ThresholdClassifier {
    pub shape: Vec<usize>,
    pub threshold: f32,
}

impl Classifier for ThresholdClassifier {
    fn input_shape(&self) -> &[usize] {
        &self.shape
    }

    fn num_classes(&self) -> usize {
        2
    }

    fn infer(&self, input: &Tensor, _with_gradient: bool) -> Result<Inference> {
        let mean = input.data().iter().sum::<f32>() / input.len().max(1) as f32;
        let label = i64::from(mean > self.threshold);
        let p1 = if label == 1 { 0.9 } else { 0.1 };
        Ok(Inference {
            label,
            probabilities: vec![1.0 - p1, p1],
            gradient: None,
        })
    }
}

/// A model that answers from a fixed list of labels and enforces a budget,
/// recording every candidate it was shown.
pub struct ScriptedModel {
    labels: VecDeque<i64>,
    fallback: i64,
    budget: u64,
    pub consumed: u64,
    pub seen: Vec<Tensor>,
}

impl ScriptedModel {
    pub fn new(labels: &[i64], fallback: i64, budget: u64) -> Self {
        Self {
            labels: labels.iter().copied().collect(),
            fallback,
            budget,
            consumed: 0,
            seen: Vec::new(),
        }
    }
}

impl Model for ScriptedModel {
    async fn predict(&mut self, input: &Tensor, _want: Want) -> Result<Response> {
        if self.consumed >= self.budget {
            return Err(ProtocolError::BudgetExceeded {
                budget: self.budget,
            });
        }
        self.consumed += 1;
        self.seen.push(input.clone());
        Ok(Response {
            label: self.labels.pop_front().unwrap_or(self.fallback),
            probs: None,
            gradient: None,
            queries_remaining: self.budget - self.consumed,
        })
    }
}
