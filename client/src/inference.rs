//! The contract with the inference engines running on the device.
//!
//! The coordinator calls these as opaque operations, it only forwards the
//! produced tensors and the measured device time.

use comms::specs::TopK;

/// A dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Returns
    /// The tensor, or `None` when `shape` has a zero dimension or does not
    /// describe `data.len()` elements.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Option<Self> {
        let numel: usize = shape.iter().product();
        let valid = !shape.is_empty() && !shape.contains(&0) && numel == data.len();
        valid.then_some(Self { data, shape })
    }
}

/// The output of running the model up to a split layer.
#[derive(Debug, Clone)]
pub struct PartialOutput {
    pub features: Tensor,
    pub device_time_ms: f64,
}

/// The output of running the whole model on the device.
#[derive(Debug, Clone)]
pub struct FullOutput {
    pub top5: Vec<TopK>,
    pub device_time_ms: f64,
}

/// The local inference engine.
#[trait_variant::make(LocalInference: Send)]
pub trait LocalInferenceTemplate {
    /// Runs the model from its input up to `split_layer`.
    ///
    /// # Arguments
    /// * `input` - The preprocessed model input.
    /// * `split_layer` - The name of the last layer to run on the device.
    async fn run_local_partial(
        &mut self,
        input: &Tensor,
        split_layer: &str,
    ) -> crate::Result<PartialOutput>;

    /// Runs the whole model on the device.
    ///
    /// # Arguments
    /// * `input` - The preprocessed model input.
    async fn run_local_full(&mut self, input: &Tensor) -> crate::Result<FullOutput>;
}

/// Produces the model input for every tick.
pub trait InputSource {
    /// The next input, or `None` when the source is not ready yet.
    fn next_input(&mut self) -> Option<Tensor>;
}

impl<F> InputSource for F
where
    F: FnMut() -> Option<Tensor>,
{
    fn next_input(&mut self) -> Option<Tensor> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_checks_its_shape() {
        assert!(Tensor::new(vec![0.0; 12], vec![1, 3, 2, 2]).is_some());
        assert!(Tensor::new(vec![0.0; 11], vec![1, 3, 2, 2]).is_none());
        assert!(Tensor::new(vec![], vec![]).is_none());
        assert!(Tensor::new(vec![], vec![1, 0]).is_none());
    }
}
