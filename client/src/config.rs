use std::time::Duration;

use serde::Deserialize;

use crate::OffloadError;

const DEFAULT_INPUT_LAYER: &str = "input";

/// The immutable settings of an offloading run.
///
/// Loading these from the environment or a file is up to the caller, the
/// library only validates them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OffloadConfig {
    /// The remote worker's address, `host:port`.
    pub endpoint: String,
    /// The first reconnect delay in milliseconds, doubled on every attempt.
    pub reconnect_delay_ms: u64,
    /// How many reconnects to try after an abnormal closure before giving up.
    pub max_reconnect_attempts: u32,
    /// Time between measurement ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// The split layer label sent when the raw input is offloaded.
    #[serde(default = "default_input_layer")]
    pub input_layer_name: String,
}

fn default_input_layer() -> String {
    DEFAULT_INPUT_LAYER.to_string()
}

impl OffloadConfig {
    /// Creates a new validated `OffloadConfig`.
    ///
    /// # Arguments
    /// * `endpoint` - The remote worker's address.
    /// * `reconnect_delay_ms` - The base reconnect delay.
    /// * `max_reconnect_attempts` - The reconnect attempt limit.
    /// * `tick_interval_ms` - The measurement interval.
    ///
    /// # Returns
    /// The config or a `Configuration` error naming the offending field.
    pub fn new(
        endpoint: impl Into<String>,
        reconnect_delay_ms: u64,
        max_reconnect_attempts: u32,
        tick_interval_ms: u64,
    ) -> crate::Result<Self> {
        let config = Self {
            endpoint: endpoint.into(),
            reconnect_delay_ms,
            max_reconnect_attempts,
            tick_interval_ms,
            input_layer_name: default_input_layer(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Overrides the label sent for full offloads.
    pub fn with_input_layer_name(mut self, name: impl Into<String>) -> Self {
        self.input_layer_name = name.into();
        self
    }

    /// Checks every field, to be called on configs that were deserialized.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(OffloadError::Configuration(msg.to_string()));

        if self.endpoint.trim().is_empty() {
            return invalid("endpoint must not be empty");
        }

        if self.reconnect_delay_ms == 0 {
            return invalid("reconnect delay must be positive");
        }

        if self.tick_interval_ms == 0 {
            return invalid("tick interval must be positive");
        }

        if self.input_layer_name.trim().is_empty() {
            return invalid("input layer name must not be empty");
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
