//! Feed-forward neural network classifier
//!
//! ReLU hidden layers, softmax output, cross-entropy loss with L2 penalty,
//! trained with Adam on shuffled mini-batches until the loss stops improving.

use super::{softmax, Classifier, ModelKind};
use crate::error::{EngineError, EngineResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    /// L2 penalty
    pub alpha: f64,
    pub batch_size: usize,
    /// Maximum training epochs
    pub max_iter: usize,
    /// Minimum loss improvement counted as progress
    pub tolerance: f64,
    /// Epochs without progress before stopping
    pub patience: usize,
    pub seed: u64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100, 50],
            learning_rate: 0.001,
            alpha: 0.0001,
            batch_size: 200,
            max_iter: 500,
            tolerance: 1e-4,
            patience: 10,
            seed: 42,
        }
    }
}

/// Fully connected layer; weights are row-major `outputs x inputs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl DenseLayer {
    fn init(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (inputs + outputs) as f64).sqrt();
        Self {
            inputs,
            outputs,
            weights: (0..inputs * outputs).map(|_| rng.gen_range(-bound..bound)).collect(),
            biases: (0..outputs).map(|_| rng.gen_range(-bound..bound)).collect(),
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                self.biases[o] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>()
            })
            .collect()
    }
}

/// Gradient or Adam moment buffers shaped like a layer
#[derive(Clone)]
struct LayerBuffers {
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl LayerBuffers {
    fn zeros(layer: &DenseLayer) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    fn clear(&mut self) {
        self.weights.iter_mut().for_each(|v| *v = 0.0);
        self.biases.iter_mut().for_each(|v| *v = 0.0);
    }
}

struct Adam {
    step: i32,
    first: Vec<LayerBuffers>,
    second: Vec<LayerBuffers>,
}

impl Adam {
    fn new(layers: &[DenseLayer]) -> Self {
        let zeros: Vec<LayerBuffers> = layers.iter().map(LayerBuffers::zeros).collect();
        Self {
            step: 0,
            first: zeros.clone(),
            second: zeros,
        }
    }

    fn update(&mut self, layers: &mut [DenseLayer], grads: &[LayerBuffers], learning_rate: f64) {
        self.step += 1;
        let lr = learning_rate * (1.0 - BETA2.powi(self.step)).sqrt() / (1.0 - BETA1.powi(self.step));
        for (l, layer) in layers.iter_mut().enumerate() {
            adam_step(&mut layer.weights, &grads[l].weights, &mut self.first[l].weights, &mut self.second[l].weights, lr);
            adam_step(&mut layer.biases, &grads[l].biases, &mut self.first[l].biases, &mut self.second[l].biases, lr);
        }
    }
}

fn adam_step(params: &mut [f64], grads: &[f64], m: &mut [f64], v: &mut [f64], lr: f64) {
    for i in 0..params.len() {
        m[i] = BETA1 * m[i] + (1.0 - BETA1) * grads[i];
        v[i] = BETA2 * v[i] + (1.0 - BETA2) * grads[i] * grads[i];
        params[i] -= lr * m[i] / (v[i].sqrt() + ADAM_EPSILON);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetwork {
    params: NetworkParams,
    layers: Vec<DenseLayer>,
    /// Epochs actually run by the last fit
    epochs_run: usize,
}

impl NeuralNetwork {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            layers: Vec::new(),
            epochs_run: 0,
        }
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    /// Activations of every layer, input first
    fn activations(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = vec![input.to_vec()];
        let last = self.layers.len().saturating_sub(1);
        for (l, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&acts[l]);
            let a = if l == last {
                softmax(&z)
            } else {
                z.into_iter().map(|v| v.max(0.0)).collect()
            };
            acts.push(a);
        }
        acts
    }

    /// Accumulate gradients for one sample; returns its cross-entropy
    fn backprop(&self, input: &[f64], label: usize, grads: &mut [LayerBuffers]) -> f64 {
        let acts = self.activations(input);
        let output = &acts[acts.len() - 1];
        let loss = -output.get(label).copied().unwrap_or(0.0).max(1e-12).ln();

        let mut delta: Vec<f64> = output.clone();
        if let Some(d) = delta.get_mut(label) {
            *d -= 1.0;
        }

        for l in (0..self.layers.len()).rev() {
            let layer = &self.layers[l];
            let below = &acts[l];
            for o in 0..layer.outputs {
                let d = delta[o];
                if d == 0.0 {
                    continue;
                }
                let row = &mut grads[l].weights[o * layer.inputs..(o + 1) * layer.inputs];
                for (g, x) in row.iter_mut().zip(below) {
                    *g += d * x;
                }
                grads[l].biases[o] += d;
            }
            if l > 0 {
                let mut previous = vec![0.0; layer.inputs];
                for o in 0..layer.outputs {
                    let d = delta[o];
                    if d == 0.0 {
                        continue;
                    }
                    let row = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                    for (p, w) in previous.iter_mut().zip(row) {
                        *p += d * w;
                    }
                }
                for (p, a) in previous.iter_mut().zip(below) {
                    if *a <= 0.0 {
                        *p = 0.0;
                    }
                }
                delta = previous;
            }
        }
        loss
    }
}

impl Classifier for NeuralNetwork {
    fn kind(&self) -> ModelKind {
        ModelKind::NeuralNetwork
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()> {
        if features.is_empty() || features.len() != labels.len() || n_classes == 0 {
            return Err(EngineError::TrainingAborted(format!(
                "neural network needs matching rows and labels, got {} and {}",
                features.len(),
                labels.len()
            )));
        }

        let n = features.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut sizes = vec![features[0].len()];
        sizes.extend(self.params.hidden_layers.iter().copied().filter(|s| *s > 0));
        sizes.push(n_classes);
        self.layers = sizes.windows(2).map(|w| DenseLayer::init(w[0], w[1], &mut rng)).collect();

        let mut adam = Adam::new(&self.layers);
        let mut grads: Vec<LayerBuffers> = self.layers.iter().map(LayerBuffers::zeros).collect();
        let batch_size = self.params.batch_size.clamp(1, n);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;
        self.epochs_run = 0;

        for _ in 0..self.params.max_iter.max(1) {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(batch_size) {
                grads.iter_mut().for_each(LayerBuffers::clear);
                for &i in batch {
                    epoch_loss += self.backprop(&features[i], labels[i], &mut grads);
                }

                let m = batch.len() as f64;
                for (layer, grad) in self.layers.iter().zip(grads.iter_mut()) {
                    for (g, w) in grad.weights.iter_mut().zip(&layer.weights) {
                        *g = *g / m + self.params.alpha * w / m;
                    }
                    for g in grad.biases.iter_mut() {
                        *g /= m;
                    }
                }
                adam.update(&mut self.layers, &grads, self.params.learning_rate);
            }

            let penalty: f64 = self
                .layers
                .iter()
                .map(|l| l.weights.iter().map(|w| w * w).sum::<f64>())
                .sum::<f64>()
                * 0.5
                * self.params.alpha
                / n as f64;
            let loss = epoch_loss / n as f64 + penalty;
            self.epochs_run += 1;

            if !loss.is_finite() {
                return Err(EngineError::TrainingAborted("neural network loss diverged".into()));
            }
            if loss > best_loss - self.params.tolerance {
                stale_epochs += 1;
            } else {
                stale_epochs = 0;
            }
            best_loss = best_loss.min(loss);
            if stale_epochs > self.params.patience {
                break;
            }
        }
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        if self.layers.is_empty() {
            return Vec::new();
        }
        self.activations(features).pop().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{accuracy, three_blobs};
    use super::*;

    fn small() -> NetworkParams {
        NetworkParams {
            hidden_layers: vec![16, 8],
            learning_rate: 0.01,
            max_iter: 200,
            ..NetworkParams::default()
        }
    }

    #[test]
    fn test_network_learns_separable_blobs() {
        let (x, y) = three_blobs();
        let mut net = NeuralNetwork::new(small());
        net.fit(&x, &y, 3).unwrap();
        assert!(accuracy(&net, &x, &y) > 0.95);
    }

    #[test]
    fn test_output_is_a_distribution() {
        let (x, y) = three_blobs();
        let mut net = NeuralNetwork::new(small());
        net.fit(&x, &y, 3).unwrap();
        let p = net.predict_proba(&[0.3, -0.1, 0.0]);
        assert_eq!(p.len(), 3);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_training_is_seeded() {
        let (x, y) = three_blobs();
        let mut a = NeuralNetwork::new(small());
        let mut b = NeuralNetwork::new(small());
        a.fit(&x, &y, 3).unwrap();
        b.fit(&x, &y, 3).unwrap();
        assert_eq!(a, b);
        assert!(a.epochs_run() <= 200);
    }

    #[test]
    fn test_layer_shapes_follow_params() {
        let (x, y) = three_blobs();
        let mut net = NeuralNetwork::new(small());
        net.fit(&x, &y, 3).unwrap();
        let shapes: Vec<(usize, usize)> = net.layers.iter().map(|l| (l.inputs, l.outputs)).collect();
        assert_eq!(shapes, vec![(3, 16), (16, 8), (8, 3)]);
    }
}
