//! The remote half of the split model.

use std::{num::NonZeroUsize, time::Duration};

use comms::specs::TopK;
use log::debug;
use tokio::time::{self, Instant};

use crate::{Result, WorkerErr};

/// How many classes a classification result carries.
pub const TOP_K: usize = 5;

/// The result of running the remainder of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOutput {
    pub top5: Vec<TopK>,
    /// Milliseconds spent in inference.
    pub remote_time_ms: f64,
}

/// The remote inference engine.
#[trait_variant::make(RemoteInference: Send)]
pub trait RemoteInferenceTemplate {
    /// Runs the model from `split_layer` onwards.
    ///
    /// # Arguments
    /// * `features` - The split layer's output, row-major.
    /// * `shape` - The shape of `features`.
    /// * `split_layer` - The name of the layer that produced `features`.
    ///
    /// # Returns
    /// The top classes and the time spent.
    async fn run_remote(
        &self,
        features: &[f32],
        shape: &[usize],
        split_layer: &str,
    ) -> Result<RemoteOutput>;
}

/// A stand-in classifier for running the system without a model.
///
/// Folds the features into `classes` logits and returns their softmax top 5,
/// so equal inputs always classify the same way.
#[derive(Debug, Clone)]
pub struct SyntheticExecutor {
    classes: NonZeroUsize,
    latency: Duration,
}

impl SyntheticExecutor {
    /// Creates a new `SyntheticExecutor`.
    ///
    /// # Arguments
    /// * `classes` - The amount of output classes.
    /// * `latency` - Extra time every call takes, to emulate a heavy model.
    pub fn new(classes: NonZeroUsize, latency: Duration) -> Self {
        Self { classes, latency }
    }
}

impl RemoteInference for SyntheticExecutor {
    async fn run_remote(
        &self,
        features: &[f32],
        shape: &[usize],
        split_layer: &str,
    ) -> Result<RemoteOutput> {
        let start = Instant::now();

        if !self.latency.is_zero() {
            time::sleep(self.latency).await;
        }

        if let Some(at) = features.iter().position(|x| !x.is_finite()) {
            return Err(WorkerErr::Inference(format!(
                "feature {at} is not a finite number"
            )));
        }

        let logits = fold_logits(features, self.classes.get());
        let top5 = top_k(&logits, TOP_K);
        let remote_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(split = split_layer, rank = shape.len(), ms = remote_time_ms; "synthetic inference");
        Ok(RemoteOutput {
            top5,
            remote_time_ms,
        })
    }
}

fn fold_logits(features: &[f32], classes: usize) -> Vec<f64> {
    let mut logits = vec![0.0; classes];
    for (i, &x) in features.iter().enumerate() {
        logits[i % classes] += x as f64;
    }

    logits
}

/// The `k` most probable classes of `logits`, most probable first.
///
/// Ties keep the lowest class index first.
pub fn top_k(logits: &[f64], k: usize) -> Vec<TopK> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exp.iter().sum();

    let mut ranked: Vec<(usize, f64)> = exp.into_iter().map(|e| e / sum).enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    ranked
        .into_iter()
        .take(k)
        .map(|(index, probability)| TopK {
            index: index as i64,
            probability,
        })
        .collect()
}
