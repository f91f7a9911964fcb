//! Drives the measurement ticks of one experiment run.
//!
//! The protocol carries no request id, so at most one offload may be in
//! flight per connection: ticks that fire while an answer is pending are
//! skipped. Pipelining offloads would need a correlation id in both the
//! metadata and the response.

use std::time::Duration;

use comms::{
    Clock, frame,
    specs::{Envelope, MessageMetadata},
};
use log::{debug, info, warn};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    ConnectionEvent, ConnectionManager, Connector, LogBook, LogRecord, OffloadError, Result,
    config::OffloadConfig,
    connection::Inbound,
    inference::{InputSource, LocalInference, Tensor},
    policy::{SplitPoint, SplitPolicy},
};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Ran entirely on the device, the measurement is complete.
    Completed(LogRecord),
    /// A frame was sent, the measurement completes when the answer arrives.
    Offloaded { split: SplitPoint },
    /// A previous offload is still waiting for its answer.
    Skipped,
}

/// The offload waiting for its answer.
#[derive(Debug, Clone)]
struct InFlight {
    arm: Option<usize>,
    split: SplitPoint,
}

/// Picks split points, runs the local part and ships the rest.
pub struct OffloadCoordinator<E: LocalInference, C: Connector> {
    executor: E,
    policy: SplitPolicy,
    clock: Clock,
    input_layer_name: String,
    tick_interval: Duration,
    connection: Option<ConnectionManager<C>>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    in_flight: Option<InFlight>,
    log: LogBook,
}

impl<E: LocalInference, C: Connector> OffloadCoordinator<E, C> {
    /// Creates a new `OffloadCoordinator` without a connection.
    ///
    /// # Arguments
    /// * `config` - The run's settings.
    /// * `executor` - The local inference engine.
    /// * `policy` - How split points are chosen.
    /// * `clock` - The client clock, shared with the connection.
    pub fn new(config: &OffloadConfig, executor: E, policy: SplitPolicy, clock: Clock) -> Self {
        Self {
            executor,
            policy,
            clock,
            input_layer_name: config.input_layer_name.clone(),
            tick_interval: config.tick_interval(),
            connection: None,
            events: None,
            in_flight: None,
            log: LogBook::new(),
        }
    }

    /// Attaches the connection used for offloading.
    ///
    /// # Arguments
    /// * `connection` - The connection manager.
    /// * `events` - The receiving end of its events.
    pub fn with_connection(
        mut self,
        connection: ConnectionManager<C>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Self {
        self.connection = Some(connection);
        self.events = Some(events);
        self
    }

    pub fn log(&self) -> &LogBook {
        &self.log
    }

    pub fn policy(&self) -> &SplitPolicy {
        &self.policy
    }

    pub fn connection(&self) -> Option<&ConnectionManager<C>> {
        self.connection.as_ref()
    }

    /// Whether an offload is waiting for its answer.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Runs one measurement.
    ///
    /// # Arguments
    /// * `input` - The model input for this tick.
    ///
    /// # Errors
    /// `Configuration` when the split needs a connection and there is none,
    /// `NotConnected` when the connection is down, or the inference error.
    pub async fn tick(&mut self, input: Tensor) -> Result<TickOutcome> {
        if self.in_flight.is_some() {
            debug!("previous offload still in flight, skipping tick");
            return Ok(TickOutcome::Skipped);
        }

        let started_at = self.clock.now_ms();
        let selection = self.policy.select();
        let label = selection.split.to_string();
        debug!(split = label.as_str(); "tick");

        let (split_layer_name, features, device_time_ms) = match &selection.split {
            SplitPoint::NoOffload => {
                let output = self.executor.run_local_full(&input).await?;
                let record = LogRecord::local(
                    label,
                    output.top5,
                    output.device_time_ms,
                    started_at,
                    self.clock.now_ms(),
                );

                self.policy.record(selection.arm, &record);
                self.log.push(record.clone());
                return Ok(TickOutcome::Completed(record));
            }
            SplitPoint::FullOffload => {
                self.require_connection()?;
                (self.input_layer_name.clone(), input, 0.0)
            }
            SplitPoint::Layer(layer) => {
                self.require_connection()?;
                let output = self.executor.run_local_partial(&input, layer).await?;
                (layer.clone(), output.features, output.device_time_ms)
            }
        };

        let metadata = MessageMetadata {
            shape: features.shape,
            split_layer_name,
            inference_time_on_device: device_time_ms,
            client_execute_start_timestamp: started_at,
            client_message_sent_timestamp: self.clock.now_ms(),
        };
        let encoded = frame::encode(&metadata, &features.data);

        self.require_connection()?.send(&encoded).await?;
        self.in_flight = Some(InFlight {
            arm: selection.arm,
            split: selection.split.clone(),
        });

        Ok(TickOutcome::Offloaded {
            split: selection.split,
        })
    }

    /// Completes the in-flight offload with an inbound message.
    ///
    /// # Arguments
    /// * `inbound` - The message and its receipt time.
    ///
    /// # Returns
    /// The finished measurement.
    ///
    /// # Errors
    /// `Remote` for error envelopes, `MalformedResponse` for anything unparsable.
    pub fn handle_frame(&mut self, inbound: Inbound) -> Result<LogRecord> {
        let in_flight = self.in_flight.take();

        let envelope: Envelope = match serde_json::from_slice(&inbound.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("discarding unparsable response: {e}");
                return Err(OffloadError::MalformedResponse(e));
            }
        };

        let response = match envelope {
            Envelope::Result { data } => data,
            Envelope::Error { message } => {
                warn!("remote worker failed: {message}");
                return Err(OffloadError::Remote(message));
            }
        };

        let record = LogRecord::from_response(response, inbound.received_at);

        match in_flight {
            Some(in_flight) => self.policy.record(in_flight.arm, &record),
            None => warn!(split = record.split_layer_name.as_str(); "response arrived with no offload in flight"),
        }

        info!(
            split = record.split_layer_name.as_str(),
            device_ms = record.inference_time_on_device,
            remote_ms = record.inference_time_on_remote,
            total_ms = record.total_time_ms();
            "offload completed"
        );

        self.log.push(record.clone());
        Ok(record)
    }

    /// Runs ticks on the configured interval until `shutdown` fires.
    ///
    /// # Arguments
    /// * `source` - Produces the model input of every tick.
    /// * `shutdown` - Stops the run, the connection is closed normally.
    ///
    /// # Returns
    /// Every measurement taken.
    ///
    /// # Errors
    /// `Configuration` errors end the run right away, as does the connection
    /// giving up on reconnecting.
    pub async fn run<S: InputSource>(
        mut self,
        mut source: S,
        shutdown: CancellationToken,
    ) -> Result<LogBook> {
        if self.policy.may_offload() {
            self.require_connection()?;
        }

        if let Some(connection) = self.connection.as_mut() {
            connection.connect();
        }

        let mut events = self.events.take();
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let res = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event) {
                            break Err(e);
                        }
                    }
                    None => events = None,
                },
                _ = ticker.tick() => {
                    let Some(input) = source.next_input() else {
                        debug!("input not ready, skipping tick");
                        continue;
                    };

                    // A send stuck on a peer that stopped reading must not outlive shutdown.
                    let outcome = tokio::select! {
                        _ = shutdown.cancelled() => break Ok(()),
                        outcome = self.tick(input) => outcome,
                    };

                    match outcome {
                        Ok(TickOutcome::Completed(record)) => {
                            info!(split = record.split_layer_name.as_str(), total_ms = record.total_time_ms(); "local inference completed");
                        }
                        Ok(_) => {}
                        Err(e @ OffloadError::Configuration(_)) => break Err(e),
                        Err(e) => warn!("tick failed: {e}"),
                    }
                }
            }
        };

        if let Some(connection) = self.connection.as_mut() {
            connection.close().await;
        }

        info!(records = self.log.len(); "run finished");
        res.map(|()| self.log)
    }

    /// Applies a connection event.
    ///
    /// A closed connection drops the offload in flight, its answer can no
    /// longer arrive.
    ///
    /// # Errors
    /// `ReconnectExhausted` once the connection gave up.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Opened => debug!("connection opened"),
            ConnectionEvent::Frame(inbound) => {
                if let Err(e) = self.handle_frame(inbound) {
                    warn!("offload failed: {e}");
                }
            }
            ConnectionEvent::Closed { code } => {
                if let Some(stale) = self.in_flight.take() {
                    warn!(code = code.0; "connection closed with an offload in flight, dropping {}", stale.split);
                }
            }
            ConnectionEvent::GaveUp { attempts } => {
                return Err(OffloadError::ReconnectExhausted { attempts });
            }
        }

        Ok(())
    }

    fn require_connection(&self) -> Result<&ConnectionManager<C>> {
        self.connection.as_ref().ok_or_else(|| {
            OffloadError::Configuration("offloading requires a connection".into())
        })
    }
}

/// Receives the next event, pending forever once there are none.
async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
) -> Option<ConnectionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
