use serde::{Deserialize, Serialize};

/// One entry of the remote classification result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopK {
    pub index: i64,
    pub probability: f64,
}

/// The remote worker's answer to an offload frame.
///
/// Client timestamps are echoed back untouched, server timestamps are taken on
/// the worker's own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    pub top5: Vec<TopK>,
    #[serde(alias = "splitLayerId")]
    pub split_layer_name: String,
    pub inference_time_on_device: f64,
    pub inference_time_on_remote: f64,
    pub client_execute_start_timestamp: f64,
    pub client_message_sent_timestamp: f64,
    pub server_message_received_timestamp: f64,
    pub server_response_sent_timestamp: f64,
}

/// The text message sent back by the remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Result { data: WireResponse },
    Error { message: String },
}

impl Envelope {
    /// Builds an error envelope out of anything printable.
    pub fn error(err: impl ToString) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    /// Serializes this envelope into its json text.
    pub fn to_json(&self) -> String {
        // SAFETY: Serialize impls are derived and hold no non string-key maps.
        serde_json::to_string(self).unwrap()
    }
}
