use std::io::Write;

use comms::specs::{TopK, WireResponse};
use serde::Serialize;

use crate::latency::{self, LatencyMetrics};

/// One finished measurement.
///
/// Timestamps are milliseconds, client ones on the client clock and server
/// ones on the worker's clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub split_layer_name: String,
    pub offloaded: bool,
    pub top5: Vec<TopK>,
    pub inference_time_on_device: f64,
    pub inference_time_on_remote: f64,
    pub client_execute_start_timestamp: f64,
    pub client_message_sent_timestamp: Option<f64>,
    pub server_message_received_timestamp: Option<f64>,
    pub server_response_sent_timestamp: Option<f64>,
    pub client_response_received_timestamp: f64,
    pub latency: Option<LatencyMetrics>,
}

impl LogRecord {
    /// Builds the record of an offloaded measurement.
    ///
    /// # Arguments
    /// * `response` - The remote worker's answer.
    /// * `received_at` - When the answer arrived, on the client clock.
    pub fn from_response(response: WireResponse, received_at: f64) -> Self {
        let latency = latency::estimate(
            response.client_message_sent_timestamp,
            response.server_message_received_timestamp,
            response.server_response_sent_timestamp,
            received_at,
        );

        Self {
            split_layer_name: response.split_layer_name,
            offloaded: true,
            top5: response.top5,
            inference_time_on_device: response.inference_time_on_device,
            inference_time_on_remote: response.inference_time_on_remote,
            client_execute_start_timestamp: response.client_execute_start_timestamp,
            client_message_sent_timestamp: Some(response.client_message_sent_timestamp),
            server_message_received_timestamp: Some(response.server_message_received_timestamp),
            server_response_sent_timestamp: Some(response.server_response_sent_timestamp),
            client_response_received_timestamp: received_at,
            latency: Some(latency),
        }
    }

    /// Builds the record of a measurement that never left the device.
    ///
    /// # Arguments
    /// * `split_layer_name` - The split point label.
    /// * `top5` - The local result.
    /// * `device_time_ms` - The time spent in local inference.
    /// * `started_at` - When the tick started.
    /// * `finished_at` - When the local result was available.
    pub fn local(
        split_layer_name: String,
        top5: Vec<TopK>,
        device_time_ms: f64,
        started_at: f64,
        finished_at: f64,
    ) -> Self {
        Self {
            split_layer_name,
            offloaded: false,
            top5,
            inference_time_on_device: device_time_ms,
            inference_time_on_remote: 0.0,
            client_execute_start_timestamp: started_at,
            client_message_sent_timestamp: None,
            server_message_received_timestamp: None,
            server_response_sent_timestamp: None,
            client_response_received_timestamp: finished_at,
            latency: None,
        }
    }

    /// Time spent on the device, from the start of the tick until the frame left.
    pub fn execution_time_on_device(&self) -> f64 {
        let until = self
            .client_message_sent_timestamp
            .unwrap_or(self.client_response_received_timestamp);
        until - self.client_execute_start_timestamp
    }

    /// Time the worker held the request.
    pub fn execution_time_on_server(&self) -> f64 {
        self.latency.map_or(0.0, |l| l.server_proc_ms)
    }

    /// End-to-end time of the measurement.
    pub fn total_time_ms(&self) -> f64 {
        match self.latency {
            Some(l) => l.rtt + self.execution_time_on_device() + l.server_proc_ms,
            None => self.client_response_received_timestamp - self.client_execute_start_timestamp,
        }
    }
}

/// The append-only sequence of measurements of one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct LogBook {
    records: Vec<LogRecord>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes every record as a pretty json array.
    ///
    /// # Arguments
    /// * `writer` - Where to write the export to.
    pub fn export_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}
