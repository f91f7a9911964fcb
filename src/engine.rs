//! A synthetic on-device model, so the driver runs without real weights.

use std::{num::NonZeroUsize, time::Duration};

use client::{
    OffloadError,
    inference::{FullOutput, LocalInference, PartialOutput, Tensor},
};
use tokio::time::Instant;
use worker::{RemoteInference, SyntheticExecutor};

/// Pools the input once per block of depth and classifies with the same
/// synthetic head the worker uses.
pub struct SyntheticEngine {
    head: SyntheticExecutor,
}

impl SyntheticEngine {
    pub fn new(classes: NonZeroUsize) -> Self {
        Self {
            head: SyntheticExecutor::new(classes, Duration::ZERO),
        }
    }
}

impl LocalInference for SyntheticEngine {
    async fn run_local_partial(
        &mut self,
        input: &Tensor,
        split_layer: &str,
    ) -> client::Result<PartialOutput> {
        let start = Instant::now();

        let mut features = input.clone();
        for _ in 0..block_depth(split_layer) {
            match avg_pool_2x2(&features) {
                Some(pooled) => features = pooled,
                None => break,
            }
        }

        Ok(PartialOutput {
            features,
            device_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn run_local_full(&mut self, input: &Tensor) -> client::Result<FullOutput> {
        let start = Instant::now();

        let output = self
            .head
            .run_remote(&input.data, &input.shape, "input")
            .await
            .map_err(|e| OffloadError::Inference(e.to_string()))?;

        Ok(FullOutput {
            top5: output.top5,
            device_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

/// The trailing number of a layer name, `block_3` runs three blocks.
fn block_depth(layer: &str) -> usize {
    let digits = layer.trim_start_matches(|c: char| !c.is_ascii_digit());
    digits.parse().unwrap_or(1)
}

/// Halves the two innermost dimensions, `None` when they are empty or not even.
fn avg_pool_2x2(tensor: &Tensor) -> Option<Tensor> {
    let rank = tensor.shape.len();
    if rank < 2 {
        return None;
    }

    let (h, w) = (tensor.shape[rank - 2], tensor.shape[rank - 1]);
    if h == 0 || w == 0 || h % 2 != 0 || w % 2 != 0 {
        return None;
    }

    let (oh, ow) = (h / 2, w / 2);
    let planes = tensor.data.len() / (h * w);
    let mut data = Vec::with_capacity(planes * oh * ow);

    for plane in tensor.data.chunks_exact(h * w) {
        for y in 0..oh {
            for x in 0..ow {
                let at = |dy: usize, dx: usize| plane[(2 * y + dy) * w + 2 * x + dx];
                data.push((at(0, 0) + at(0, 1) + at(1, 0) + at(1, 1)) / 4.0);
            }
        }
    }

    let mut shape = tensor.shape.clone();
    shape[rank - 2] = oh;
    shape[rank - 1] = ow;
    Tensor::new(data, shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_innermost_dimensions() {
        let input = Tensor::new((0..16).map(|i| i as f32).collect(), vec![1, 1, 4, 4]).unwrap();
        let pooled = avg_pool_2x2(&input).unwrap();

        assert_eq!(pooled.shape, [1, 1, 2, 2]);
        assert_eq!(pooled.data, [2.5, 4.5, 10.5, 12.5]);
        assert!(avg_pool_2x2(&Tensor::new(vec![0.0; 3], vec![1, 3]).unwrap()).is_none());
    }

    #[test]
    fn empty_planes_are_not_pooled() {
        let empty = Tensor {
            data: vec![],
            shape: vec![1, 0, 2],
        };
        assert!(avg_pool_2x2(&empty).is_none());
    }

    #[test]
    fn deeper_splits_send_less() {
        let mut engine = SyntheticEngine::new(NonZeroUsize::new(10).unwrap());
        let input = Tensor::new(vec![1.0; 3 * 8 * 8], vec![1, 3, 8, 8]).unwrap();

        let shallow =
            tokio_test::block_on(engine.run_local_partial(&input, "block_1")).unwrap();
        let deep = tokio_test::block_on(engine.run_local_partial(&input, "block_2")).unwrap();

        assert_eq!(shallow.features.shape, [1, 3, 4, 4]);
        assert_eq!(deep.features.shape, [1, 3, 2, 2]);
        assert_eq!(block_depth("features"), 1);
    }

    #[test]
    fn full_inference_is_top5() {
        let mut engine = SyntheticEngine::new(NonZeroUsize::new(10).unwrap());
        let input = Tensor::new((0..20).map(|i| i as f32).collect(), vec![1, 20]).unwrap();

        let output = tokio_test::block_on(engine.run_local_full(&input)).unwrap();
        assert_eq!(output.top5.len(), 5);
    }
}
