//! Per-session audio buffer and send gate.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use tokio::sync::Notify;

use crate::{config::DeliveryMode, protocol::AudioUnit};

#[derive(Debug, Default)]
struct FlowState {
    buffer: VecDeque<u8>,
    can_send: bool,
    // the current utterance produced all of its audio
    tail_ready: bool,
    // bumped by every abort
    epoch: u64,
}

/// Decouples audio production from delivery.
///
/// The buffer and the gate live under one lock, so a unit is either detached
/// whole before an abort clears the buffer, or not at all. Units already
/// detached carry the epoch they were taken under; the transport writer
/// drops any whose epoch an abort has since moved past.
#[derive(Debug)]
pub struct FlowController {
    state: Mutex<FlowState>,
    notify: Notify,
    unit_bytes: usize,
    mode: DeliveryMode,
    flush_tail: bool,
}

impl FlowController {
    pub fn new(unit_bytes: usize, mode: DeliveryMode, flush_tail: bool) -> Self {
        Self {
            state: Mutex::new(FlowState::default()),
            notify: Notify::new(),
            unit_bytes: unit_bytes.max(1),
            mode,
            flush_tail,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one synthesized audio unit.
    pub fn append(&self, audio: &[u8]) {
        if audio.is_empty() {
            return;
        }
        self.lock().buffer.extend(audio);
        self.notify.notify_one();
    }

    /// Client acknowledgement: allow the next unit out.
    pub fn acknowledge(&self) {
        self.lock().can_send = true;
        self.notify.notify_one();
    }

    /// Drop all buffered audio, close the gate and invalidate every unit
    /// detached so far.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.can_send = false;
        state.tail_ready = false;
        state.epoch += 1;
    }

    pub fn begin_utterance(&self) {
        let mut state = self.lock();
        state.tail_ready = false;
        if self.mode == DeliveryMode::Continuous {
            state.can_send = true;
        }
        drop(state);
        self.notify.notify_one();
    }

    /// All audio for the current utterance has been appended.
    pub fn finish_utterance(&self) {
        if !self.flush_tail {
            return;
        }
        self.lock().tail_ready = true;
        self.notify.notify_one();
    }

    /// Detach the next unit if the gate allows it.
    ///
    /// Returns a full unit when at least `unit_bytes` are buffered, or the
    /// short remainder once the utterance is complete. In ack mode the gate
    /// closes again in the same critical section.
    pub fn take_unit(&self) -> Option<AudioUnit> {
        let mut state = self.lock();
        if !state.can_send {
            return None;
        }

        let len = if state.buffer.len() >= self.unit_bytes {
            self.unit_bytes
        } else if state.tail_ready && !state.buffer.is_empty() {
            state.buffer.len()
        } else {
            return None;
        };

        let bytes: Vec<u8> = state.buffer.drain(..len).collect();
        if state.buffer.is_empty() {
            state.tail_ready = false;
        }
        if self.mode == DeliveryMode::Ack {
            state.can_send = false;
        }
        Some(AudioUnit {
            epoch: state.epoch,
            bytes,
        })
    }

    /// False once an abort has happened since `unit` was detached.
    pub fn is_current(&self, unit: &AudioUnit) -> bool {
        self.lock().epoch == unit.epoch
    }

    /// Resolves after the next state change that may make a unit available.
    pub async fn changed(&self) {
        self.notify.notified().await
    }

    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().can_send
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn take(flow: &FlowController) -> Option<Vec<u8>> {
        flow.take_unit().map(|unit| unit.bytes)
    }

    #[test]
    fn test_gate_starts_closed_in_ack_mode() {
        let flow = FlowController::new(4, DeliveryMode::Ack, true);
        flow.append(&[1, 2, 3, 4, 5]);
        assert!(!flow.is_open());
        assert_eq!(take(&flow), None);
    }

    #[test]
    fn test_single_shot_per_ack() {
        let flow = FlowController::new(4, DeliveryMode::Ack, false);
        flow.append(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        flow.acknowledge();

        assert_eq!(take(&flow), Some(vec![1, 2, 3, 4]));
        assert!(!flow.is_open());
        assert_eq!(take(&flow), None);

        flow.acknowledge();
        assert_eq!(take(&flow), Some(vec![5, 6, 7, 8]));
        assert_eq!(flow.buffered_len(), 1);
    }

    #[test]
    fn test_short_buffer_waits_for_tail() {
        let flow = FlowController::new(4, DeliveryMode::Ack, true);
        flow.begin_utterance();
        flow.append(&[1, 2]);
        flow.acknowledge();
        assert_eq!(take(&flow), None);
        assert!(flow.is_open());

        flow.finish_utterance();
        assert_eq!(take(&flow), Some(vec![1, 2]));
        assert!(!flow.is_open());
    }

    #[test]
    fn test_tail_disabled_keeps_short_remainder() {
        let flow = FlowController::new(4, DeliveryMode::Ack, false);
        flow.append(&[1, 2]);
        flow.acknowledge();
        flow.finish_utterance();
        assert_eq!(take(&flow), None);
        assert_eq!(flow.buffered_len(), 2);
    }

    #[test]
    fn test_abort_clears_buffer_and_gate() {
        let flow = FlowController::new(4, DeliveryMode::Ack, true);
        flow.append(&[0; 10]);
        flow.acknowledge();
        flow.finish_utterance();
        flow.abort();

        assert_eq!(flow.buffered_len(), 0);
        assert!(!flow.is_open());
        flow.acknowledge();
        assert_eq!(take(&flow), None);
    }

    #[test]
    fn test_abort_invalidates_detached_units() {
        let flow = FlowController::new(4, DeliveryMode::Continuous, true);
        flow.begin_utterance();
        flow.append(&[1; 8]);
        let before = flow.take_unit().unwrap();
        assert!(flow.is_current(&before));

        flow.abort();
        assert!(!flow.is_current(&before));

        flow.begin_utterance();
        flow.append(&[2; 4]);
        let after = flow.take_unit().unwrap();
        assert_eq!(after.bytes, vec![2; 4]);
        assert!(flow.is_current(&after));
    }

    #[test]
    fn test_continuous_mode_drains_without_ack() {
        let flow = FlowController::new(4, DeliveryMode::Continuous, true);
        assert!(!flow.is_open());
        flow.begin_utterance();
        flow.append(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        assert_eq!(take(&flow), Some(vec![1, 2, 3, 4]));
        assert_eq!(take(&flow), Some(vec![5, 6, 7, 8]));
        assert_eq!(take(&flow), None);
        flow.finish_utterance();
        assert_eq!(take(&flow), Some(vec![9, 10]));

        flow.abort();
        flow.append(&[0; 8]);
        assert_eq!(take(&flow), None);
    }

    #[test]
    fn test_abort_races_with_take() {
        // every byte is either delivered in whole units or dropped by abort
        for _ in 0..200 {
            let flow = Arc::new(FlowController::new(8, DeliveryMode::Continuous, false));
            flow.begin_utterance();
            flow.append(&[7; 64]);

            let taker = {
                let flow = flow.clone();
                std::thread::spawn(move || {
                    let mut units = Vec::new();
                    while let Some(unit) = flow.take_unit() {
                        units.push(unit);
                    }
                    units
                })
            };
            flow.abort();
            let units = taker.join().unwrap();

            assert!(units.iter().all(|u| u.bytes.len() == 8));
            assert!(units.iter().all(|u| !flow.is_current(u)));
            assert_eq!(flow.buffered_len(), 0);
            assert!(!flow.is_open());
        }
    }
}
