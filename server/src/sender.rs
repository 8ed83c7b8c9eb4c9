use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{flow::FlowController, metrics::GatewayMetrics, protocol::Outbound};

/// Background task draining a session's flow controller into the
/// transport writer, one unit at a time.
pub struct AudioSender {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl AudioSender {
    pub fn spawn(
        flow: Arc<FlowController>,
        outbound: mpsc::Sender<Outbound>,
        poll: Duration,
        metrics: Arc<GatewayMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run(flow, outbound, poll, metrics, cancel.clone()));
        Self { handle, cancel }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("audio sender panicked: {e}");
            }
        }
    }
}

async fn run(
    flow: Arc<FlowController>,
    outbound: mpsc::Sender<Outbound>,
    poll: Duration,
    metrics: Arc<GatewayMetrics>,
    cancel: CancellationToken,
) {
    loop {
        if let Some(unit) = flow.take_unit() {
            let len = unit.bytes.len();
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = outbound.send(Outbound::Audio(unit)) => {
                    if sent.is_err() {
                        debug!("outbound channel closed, audio sender stopping");
                        break;
                    }
                    metrics.unit_sent(len);
                }
            }
            continue;
        }

        // re-check on any flow change, with the poll interval as a fallback
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = flow.changed() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryMode;

    fn setup(mode: DeliveryMode) -> (Arc<FlowController>, mpsc::Receiver<Outbound>, AudioSender) {
        let flow = Arc::new(FlowController::new(4, mode, true));
        let (tx, rx) = mpsc::channel(16);
        let sender = AudioSender::spawn(
            flow.clone(),
            tx,
            Duration::from_millis(10),
            Arc::new(GatewayMetrics::new()),
            CancellationToken::new(),
        );
        (flow, rx, sender)
    }

    async fn next_audio(rx: &mut mpsc::Receiver<Outbound>) -> Option<Vec<u8>> {
        match tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
            Ok(Some(Outbound::Audio(unit))) => Some(unit.bytes),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_sends_one_unit_per_ack() {
        let (flow, mut rx, sender) = setup(DeliveryMode::Ack);
        flow.begin_utterance();
        flow.append(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(next_audio(&mut rx).await, None);

        flow.acknowledge();
        assert_eq!(next_audio(&mut rx).await, Some(vec![1, 2, 3, 4]));
        assert_eq!(next_audio(&mut rx).await, None);

        flow.acknowledge();
        assert_eq!(next_audio(&mut rx).await, Some(vec![5, 6, 7, 8]));

        sender.shutdown().await;
    }

    #[tokio::test]
    async fn test_continuous_mode_streams_everything() {
        let (flow, mut rx, sender) = setup(DeliveryMode::Continuous);
        flow.begin_utterance();
        flow.append(&[9; 10]);
        flow.finish_utterance();

        assert_eq!(next_audio(&mut rx).await.map(|u| u.len()), Some(4));
        assert_eq!(next_audio(&mut rx).await.map(|u| u.len()), Some(4));
        assert_eq!(next_audio(&mut rx).await.map(|u| u.len()), Some(2));
        assert_eq!(next_audio(&mut rx).await, None);

        sender.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (flow, mut rx, sender) = setup(DeliveryMode::Continuous);
        assert!(sender.is_running());
        sender.shutdown().await;

        flow.begin_utterance();
        flow.append(&[1; 8]);
        assert_eq!(next_audio(&mut rx).await, None);
    }
}
