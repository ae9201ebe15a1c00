use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::services::cancellation::CancellationToken;
use crate::domain::errors::EngineError;
use crate::domain::repositories::event_stream::{EventStream, StreamMessage};
use crate::task_runner::Backoff;

/// What a producer hands to the run's event loop
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Message(StreamMessage),
    /// The stream dropped; carries a `StreamDisconnected` error
    Disconnected { stream: String, error: EngineError },
    /// The stream is delivering again after a disconnect
    Reconnected { stream: String },
}

/// Producer task for one live feed
///
/// The actor owns its stream: it connects, forwards every decoded message
/// into the shared queue, and reconnects with exponential backoff whenever
/// the feed fails or closes, until the token is cancelled or the event loop
/// goes away. It never touches the session.
pub struct StreamActor {
    stream: Box<dyn EventStream>,
    tx: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
    backoff: Backoff,
}

impl StreamActor {
    pub fn spawn(
        stream: Box<dyn EventStream>,
        tx: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> JoinHandle<()> {
        let actor = Self {
            stream,
            tx,
            cancel,
            backoff: Backoff::new(initial_delay, max_delay),
        };
        tokio::spawn(actor.run())
    }

    async fn run(mut self) {
        let name = self.stream.name().to_string();
        // a Disconnected event went out and no Reconnected has followed yet
        let mut disconnect_announced = false;

        loop {
            info!("Starting stream {}", name);

            let outcome = tokio::select! {
                result = Self::pump(&mut self.stream, &self.tx, &name, &mut disconnect_announced) => result,
                _ = self.cancel.cancelled() => {
                    info!("Stream {} received shutdown signal", name);
                    break;
                }
            };

            let reason = match outcome {
                PumpOutcome::ReceiverGone => break,
                PumpOutcome::Closed => "closed by venue".to_string(),
                PumpOutcome::Failed(reason) => reason,
                PumpOutcome::Delivered(reason) => {
                    // the connection worked for a while
                    self.backoff.reset();
                    reason
                }
            };

            let delay = self.backoff.record_failure();
            error!("Stream {} disconnected: {}, retrying in {:?}", name, reason, delay);
            let event = RunEvent::Disconnected {
                stream: name.clone(),
                error: EngineError::StreamDisconnected {
                    stream: name.clone(),
                    reason,
                },
            };
            if self.tx.send(event).await.is_err() {
                break;
            }
            disconnect_announced = true;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!("Stream {} received shutdown signal", name);
                    break;
                }
            }
        }

        self.stream.close().await;
        info!("Stream {} stopped", name);
    }

    /// Connect and forward until the feed stops.
    async fn pump(
        stream: &mut Box<dyn EventStream>,
        tx: &mpsc::Sender<RunEvent>,
        name: &str,
        disconnect_announced: &mut bool,
    ) -> PumpOutcome {
        if let Err(e) = stream.connect().await {
            return PumpOutcome::Failed(e.to_string());
        }
        if *disconnect_announced {
            info!("Stream {} reconnected", name);
            let event = RunEvent::Reconnected {
                stream: name.to_string(),
            };
            if tx.send(event).await.is_err() {
                return PumpOutcome::ReceiverGone;
            }
            *disconnect_announced = false;
        }

        let mut delivered = false;
        loop {
            match stream.next_batch().await {
                Ok(Some(batch)) => {
                    for message in batch {
                        if tx.send(RunEvent::Message(message)).await.is_err() {
                            return PumpOutcome::ReceiverGone;
                        }
                    }
                    delivered = true;
                }
                Ok(None) if delivered => return PumpOutcome::Delivered("closed by venue".to_string()),
                Ok(None) => return PumpOutcome::Closed,
                Err(e) if delivered => return PumpOutcome::Delivered(e.to_string()),
                Err(e) => {
                    warn!("Stream {} failed before delivering: {}", name, e);
                    return PumpOutcome::Failed(e.to_string());
                }
            }
        }
    }
}

enum PumpOutcome {
    /// Messages flowed before the feed stopped
    Delivered(String),
    Closed,
    Failed(String),
    ReceiverGone,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::entities::trade::{OrderSide, Trade};
    use crate::domain::errors::ExchangeError;
    use crate::domain::repositories::exchange_client::ExchangeResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays scripted batches; an `Err` entry drops the connection.
    /// The first `failed_connects` connection attempts are refused.
    pub(crate) struct ScriptedStream {
        pub name: String,
        pub script: VecDeque<ExchangeResult<Option<Vec<StreamMessage>>>>,
        pub connects: usize,
        pub failed_connects: usize,
    }

    impl ScriptedStream {
        pub(crate) fn new(name: &str, script: Vec<ExchangeResult<Option<Vec<StreamMessage>>>>) -> Self {
            Self {
                name: name.to_string(),
                script: script.into(),
                connects: 0,
                failed_connects: 0,
            }
        }

        pub(crate) fn refusing_first(mut self, attempts: usize) -> Self {
            self.failed_connects = attempts;
            self
        }
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&mut self) -> ExchangeResult<()> {
            self.connects += 1;
            if self.connects <= self.failed_connects {
                return Err(ExchangeError::NotConnected);
            }
            Ok(())
        }

        async fn next_batch(&mut self) -> ExchangeResult<Option<Vec<StreamMessage>>> {
            match self.script.pop_front() {
                Some(step) => step,
                // script exhausted: stay connected and silent
                None => std::future::pending().await,
            }
        }
    }

    fn trade_message(t: i64) -> StreamMessage {
        StreamMessage::Trade(Trade::new(t, OrderSide::Buy, 100.0, 1.0, ""))
    }

    #[tokio::test]
    async fn test_actor_forwards_and_reconnects() {
        let stream = ScriptedStream::new(
            "trades",
            vec![
                Ok(Some(vec![trade_message(1), trade_message(2)])),
                Err(ExchangeError::WebSocketError("reset".to_string())),
                Ok(Some(vec![trade_message(3)])),
            ],
        );
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = StreamActor::spawn(
            Box::new(stream),
            tx,
            cancel.clone(),
            Duration::from_millis(1),
            Duration::from_millis(4),
        );

        let mut events = Vec::new();
        while events.len() < 5 {
            events.push(rx.recv().await.unwrap());
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(events[0], RunEvent::Message(trade_message(1)));
        assert_eq!(events[1], RunEvent::Message(trade_message(2)));
        assert!(matches!(
            &events[2],
            RunEvent::Disconnected { error: EngineError::StreamDisconnected { .. }, .. }
        ));
        assert_eq!(
            events[3],
            RunEvent::Reconnected {
                stream: "trades".to_string()
            }
        );
        assert_eq!(events[4], RunEvent::Message(trade_message(3)));
    }

    #[tokio::test]
    async fn test_actor_announces_recovery_after_failed_first_connect() {
        let stream = ScriptedStream::new("trades", vec![Ok(Some(vec![trade_message(1)]))]).refusing_first(2);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = StreamActor::spawn(
            Box::new(stream),
            tx,
            cancel.clone(),
            Duration::from_millis(1),
            Duration::from_millis(4),
        );

        let mut events = Vec::new();
        while events.len() < 4 {
            events.push(rx.recv().await.unwrap());
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(matches!(&events[0], RunEvent::Disconnected { .. }));
        assert!(matches!(&events[1], RunEvent::Disconnected { .. }));
        assert_eq!(
            events[2],
            RunEvent::Reconnected {
                stream: "trades".to_string()
            }
        );
        assert_eq!(events[3], RunEvent::Message(trade_message(1)));
    }

    #[tokio::test]
    async fn test_actor_stops_on_cancel() {
        let stream = ScriptedStream::new("idle", vec![]);
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = StreamActor::spawn(
            Box::new(stream),
            tx,
            cancel.clone(),
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
