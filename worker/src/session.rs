use std::{io, sync::Arc};

use comms::{
    Clock, WireReceiver, WireSender, frame,
    msg::Msg,
    specs::{Envelope, WireResponse},
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{RemoteInference, Result, WorkerErr};

/// Serves the offload frames of a single client connection.
pub struct Session<E: RemoteInference> {
    executor: Arc<E>,
    clock: Clock,
}

impl<E: RemoteInference> Session<E> {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `executor` - The remote inference engine, shared by every session.
    /// * `clock` - The worker's clock, server timestamps are taken from it.
    pub fn new(executor: Arc<E>, clock: Clock) -> Self {
        Self { executor, clock }
    }

    /// Answers every binary frame until the client goes away.
    ///
    /// Frames that cannot be answered get an error envelope and the session
    /// keeps serving.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the connection.
    /// * `tx` - The sending end of the connection.
    ///
    /// # Returns
    /// The amount of frames answered with a result.
    pub async fn run<R, W>(&self, mut rx: WireReceiver<R>, mut tx: WireSender<W>) -> Result<usize>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut answered = 0;

        loop {
            let msg = match rx.recv_into::<Msg>(&mut buf).await {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("client went away without closing");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let received_at = self.clock.now_ms();

            let envelope = match msg {
                Msg::Binary(bytes) => match self.answer(bytes, received_at).await {
                    Ok(response) => {
                        answered += 1;
                        Envelope::Result { data: response }
                    }
                    Err(e) => {
                        warn!("could not answer frame: {e}");
                        Envelope::error(e)
                    }
                },
                msg @ Msg::Text(_) => {
                    let e = WorkerErr::UnexpectedMessage { got: msg.kind() };
                    warn!("{e}");
                    Envelope::error(e)
                }
                Msg::Close(code) => {
                    info!(code = code.0; "client closed the session");
                    break;
                }
            };

            tx.send(&Msg::Text(envelope.to_json().into())).await?;
        }

        Ok(answered)
    }

    /// Decodes `bytes` and runs the remote inference on its payload.
    ///
    /// # Arguments
    /// * `bytes` - The encoded frame.
    /// * `received_at` - When the frame was read, on the worker's clock.
    async fn answer(&self, bytes: &[u8], received_at: f64) -> Result<WireResponse> {
        let (metadata, features) = frame::decode(bytes)?;

        let expected = metadata.element_count();
        if features.len() != expected {
            return Err(WorkerErr::ShapeMismatch {
                expected,
                got: features.len(),
            });
        }

        let output = self
            .executor
            .run_remote(&features, &metadata.shape, &metadata.split_layer_name)
            .await?;

        debug!(
            split = metadata.split_layer_name.as_str(),
            elements = expected,
            remote_ms = output.remote_time_ms;
            "frame answered"
        );

        Ok(WireResponse {
            top5: output.top5,
            split_layer_name: metadata.split_layer_name,
            inference_time_on_device: metadata.inference_time_on_device,
            inference_time_on_remote: output.remote_time_ms,
            client_execute_start_timestamp: metadata.client_execute_start_timestamp,
            client_message_sent_timestamp: metadata.client_message_sent_timestamp,
            server_message_received_timestamp: received_at,
            server_response_sent_timestamp: self.clock.now_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use comms::specs::MessageMetadata;
    use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::SyntheticExecutor;

    type Channel = (
        WireReceiver<ReadHalf<DuplexStream>>,
        WireSender<WriteHalf<DuplexStream>>,
    );

    fn channel_pair() -> (Channel, Channel) {
        let (stream1, stream2) = io::duplex(4096);
        let (rx1, tx1) = io::split(stream1);
        let (rx2, tx2) = io::split(stream2);
        (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
    }

    fn session() -> Session<SyntheticExecutor> {
        let executor = SyntheticExecutor::new(NonZeroUsize::new(8).unwrap(), Duration::ZERO);
        Session::new(Arc::new(executor), Clock::new())
    }

    fn metadata(shape: Vec<usize>) -> MessageMetadata {
        MessageMetadata {
            shape,
            split_layer_name: "features.3".into(),
            inference_time_on_device: 8.25,
            client_execute_start_timestamp: 10.0,
            client_message_sent_timestamp: 18.5,
        }
    }

    async fn recv_envelope<R: AsyncRead + Unpin>(rx: &mut WireReceiver<R>) -> Envelope {
        let mut buf = Vec::new();
        match rx.recv_into(&mut buf).await.unwrap() {
            Msg::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answers_frames_and_echoes_client_timestamps() {
        let ((rx, tx), (mut client_rx, mut client_tx)) = channel_pair();
        let handle = tokio::spawn(async move { session().run(rx, tx).await });

        let payload: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let frame = frame::encode(&metadata(vec![1, 3, 2, 2]), &payload);
        client_tx.send(&Msg::Binary(&frame)).await.unwrap();

        let Envelope::Result { data } = recv_envelope(&mut client_rx).await else {
            panic!("expected a result envelope");
        };
        assert_eq!(data.split_layer_name, "features.3");
        assert_eq!(data.top5.len(), 5);
        assert_eq!(data.inference_time_on_device, 8.25);
        assert_eq!(data.client_execute_start_timestamp, 10.0);
        assert_eq!(data.client_message_sent_timestamp, 18.5);
        assert!(data.server_response_sent_timestamp >= data.server_message_received_timestamp);

        client_tx
            .send(&Msg::Close(comms::msg::CloseCode::NORMAL))
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_frames_get_error_envelopes() {
        let ((rx, tx), (mut client_rx, mut client_tx)) = channel_pair();
        let handle = tokio::spawn(async move { session().run(rx, tx).await });

        // Truncated length header.
        client_tx.send(&Msg::Binary(&[0, 0])).await.unwrap();
        let Envelope::Error { message } = recv_envelope(&mut client_rx).await else {
            panic!("expected an error envelope");
        };
        assert!(message.starts_with("malformed frame"));

        // Shape implies 12 elements but only 3 are sent.
        let frame = frame::encode(&metadata(vec![1, 3, 2, 2]), &[1.0, 2.0, 3.0]);
        client_tx.send(&Msg::Binary(&frame)).await.unwrap();
        assert!(matches!(
            recv_envelope(&mut client_rx).await,
            Envelope::Error { .. }
        ));

        client_tx.send(&Msg::Text("hello".into())).await.unwrap();
        assert!(matches!(
            recv_envelope(&mut client_rx).await,
            Envelope::Error { .. }
        ));

        // The session survived all of the above.
        let frame = frame::encode(&metadata(vec![2, 2]), &[0.5; 4]);
        client_tx.send(&Msg::Binary(&frame)).await.unwrap();
        assert!(matches!(
            recv_envelope(&mut client_rx).await,
            Envelope::Result { .. }
        ));

        drop(client_tx);
        drop(client_rx);
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }
}
