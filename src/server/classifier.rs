//! The model a server wraps.

use crate::core::tensor::{element_count, Tensor};
use crate::error::{ProtocolError, Result};

/// Output of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// Index of the predicted class
    pub label: i64,
    /// Probability per class, `num_classes()` long
    pub probabilities: Vec<f32>,
    /// Gradient of the loss of the predicted label with respect to the input,
    /// present only when requested and supported
    pub gradient: Option<Vec<f32>>,
}

/// A classifier served behind a query budget.
///
/// Implementations must be safe to call from many sessions at once; the
/// server never holds more than one session lock while calling [`infer`].
///
/// [`infer`]: Classifier::infer
pub trait Classifier: Send + Sync {
    /// Exact shape every probe must have.
    fn input_shape(&self) -> &[usize];

    fn num_classes(&self) -> usize;

    /// Whether `infer` can return input gradients.
    fn supports_gradient(&self) -> bool {
        false
    }

    /// Classify an input already checked against [`input_shape`].
    ///
    /// [`input_shape`]: Classifier::input_shape
    fn infer(&self, input: &Tensor, with_gradient: bool) -> Result<Inference>;
}

/// Dense linear classifier `softmax(W x + b)` over a flattened input.
///
/// Small enough to serve in tests and demos, and differentiable, so it
/// answers gradient probes.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    input_shape: Vec<usize>,
    /// One row of weights per class
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearClassifier {
    /// Fails with `ShapeMismatch` if a weight row or the bias does not fit.
    pub fn new(input_shape: Vec<usize>, weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        let features = element_count(&input_shape).unwrap_or(0);
        if let Some(row) = weights.iter().find(|row| row.len() != features) {
            return Err(ProtocolError::ShapeMismatch {
                expected: vec![features],
                actual: vec![row.len()],
            });
        }
        if bias.len() != weights.len() || weights.is_empty() {
            return Err(ProtocolError::ShapeMismatch {
                expected: vec![weights.len()],
                actual: vec![bias.len()],
            });
        }
        Ok(Self {
            input_shape,
            weights,
            bias,
        })
    }

    pub fn logits(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect()
    }
}

impl Classifier for LinearClassifier {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.weights.len()
    }

    fn supports_gradient(&self) -> bool {
        true
    }

    fn infer(&self, input: &Tensor, with_gradient: bool) -> Result<Inference> {
        let probabilities = softmax(&self.logits(input.data()));
        let label = argmax(&probabilities).unwrap_or(0);

        // d(-log p_label)/dx = W^T (p - onehot(label))
        let gradient = with_gradient.then(|| {
            let mut grad = vec![0.0f32; input.len()];
            for (class, (row, p)) in self.weights.iter().zip(&probabilities).enumerate() {
                let coeff = if class == label { p - 1.0 } else { *p };
                for (g, w) in grad.iter_mut().zip(row) {
                    *g += coeff * w;
                }
            }
            grad
        });

        Ok(Inference {
            label: label as i64,
            probabilities,
            gradient,
        })
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / logits.len().max(1) as f32; logits.len()]
    }
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_class() -> LinearClassifier {
        LinearClassifier::new(vec![2], vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![0.0, 0.0])
            .expect("classifier")
    }

    #[test]
    fn test_linear_predicts_larger_feature() {
        let model = two_class();
        let out = model
            .infer(&Tensor::from_vec(vec![0.2, 0.9]), false)
            .expect("infer");
        assert_eq!(out.label, 1);
        assert_eq!(out.probabilities.len(), 2);
        assert!(out.gradient.is_none());
    }

    #[test]
    fn test_linear_gradient_points_away_from_label() {
        let model = two_class();
        let out = model
            .infer(&Tensor::from_vec(vec![0.9, 0.2]), true)
            .expect("infer");
        let grad = out.gradient.expect("gradient");
        assert_eq!(out.label, 0);
        // Raising feature 0 lowers the loss of label 0; raising feature 1 raises it.
        assert!(grad[0] < 0.0);
        assert!(grad[1] > 0.0);
    }

    #[test]
    fn test_linear_rejects_bad_weights() {
        assert!(LinearClassifier::new(vec![3], vec![vec![1.0, 0.0]], vec![0.0]).is_err());
        assert!(LinearClassifier::new(vec![2], vec![vec![1.0, 0.0]], vec![]).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_large_logits() {
        let probs = softmax(&[1000.0, 0.0]);
        assert!((probs[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_ties_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
