use serde::{Deserialize, Serialize};

use crate::FrameError;

/// The metadata block of an offload frame.
///
/// Timestamps are milliseconds on the client's monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Row-major shape of the payload tensor.
    pub shape: Vec<usize>,
    /// Name of the layer the payload was produced by.
    #[serde(alias = "splitLayerId")]
    pub split_layer_name: String,
    /// Time the device spent on local inference.
    pub inference_time_on_device: f64,
    /// When the client started working on this measurement.
    pub client_execute_start_timestamp: f64,
    /// When the client handed the frame to the connection.
    pub client_message_sent_timestamp: f64,
}

impl MessageMetadata {
    /// The amount of payload elements implied by `shape`.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Checks the values of this metadata against their domain.
    ///
    /// # Returns
    /// An `InvalidMetadata` error describing the first offending field.
    pub fn validate(&self) -> Result<(), FrameError> {
        let invalid = |msg: String| Err(FrameError::InvalidMetadata(msg));

        if self.shape.is_empty() {
            return invalid("shape must have at least one dimension".into());
        }

        if let Some(axis) = self.shape.iter().position(|&dim| dim == 0) {
            return invalid(format!("shape dimension {axis} must be positive"));
        }

        if !self.inference_time_on_device.is_finite() || self.inference_time_on_device < 0.0 {
            return invalid(format!(
                "inferenceTimeOnDevice must be a non negative number, got {}",
                self.inference_time_on_device
            ));
        }

        if !self.client_execute_start_timestamp.is_finite()
            || !self.client_message_sent_timestamp.is_finite()
        {
            return invalid("client timestamps must be finite".into());
        }

        Ok(())
    }
}
