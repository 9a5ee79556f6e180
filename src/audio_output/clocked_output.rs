use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{Block, CompletionNotifier, PlaybackSink};
use crate::error::StreamError;

/// A deviceless sink that takes as long to "play" a block as a real device
/// would, then reports completion. Used for headless runs.
pub struct ClockedSink {
    block_tx: Option<Sender<(Block, CompletionNotifier)>>,
    stop_tx: Option<Sender<()>>,
    thread_join_handle: Option<std::thread::JoinHandle<()>>,
}

impl ClockedSink {
    pub fn new() -> Result<Self, StreamError> {
        let (block_tx, block_rx) = crossbeam_channel::bounded::<(Block, CompletionNotifier)>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let join_handle = std::thread::Builder::new()
            .name("clocked-sink-thread".into())
            .spawn(move || {
                while let Ok((block, notifier)) = block_rx.recv() {
                    let duration = Duration::from_secs_f64(block.duration_secs());
                    match stop_rx.recv_timeout(duration) {
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("[clocked-sink] Block {} played.", block.sequence);
                            notifier.notify();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("[clocked-sink] Block {} abandoned.", block.sequence);
                            break;
                        }
                    }
                }
                info!("[clocked-sink] Worker finished.");
            })
            .map_err(|e| StreamError::SinkUnavailable(format!("failed to spawn clocked sink: {e}")))?;

        Ok(Self {
            block_tx: Some(block_tx),
            stop_tx: Some(stop_tx),
            thread_join_handle: Some(join_handle),
        })
    }
}

impl PlaybackSink for ClockedSink {
    fn submit(&mut self, block: Block, notifier: CompletionNotifier) -> Result<(), StreamError> {
        let Some(block_tx) = &self.block_tx else {
            return Err(StreamError::Submit("sink is closed".into()));
        };
        block_tx.try_send((block, notifier)).map_err(|e| match e {
            TrySendError::Full((block, _)) => StreamError::Submit(format!(
                "block {} submitted while another is queued",
                block.sequence
            )),
            TrySendError::Disconnected((block, _)) => {
                StreamError::Submit(format!("worker gone before block {}", block.sequence))
            }
        })
    }

    fn close(&mut self) {
        self.stop_tx.take();
        self.block_tx.take();
        if let Some(handle) = self.thread_join_handle.take() {
            if let Err(e) = handle.join() {
                error!("[clocked-sink] Worker panicked: {:?}", e);
            }
        }
    }
}

impl Drop for ClockedSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_output::completion_pair;
    use std::time::Instant;

    fn block(len: usize, rate_hz: u32) -> Block {
        Block {
            samples: vec![0.0; len],
            rate_hz,
            sequence: 0,
        }
    }

    #[test]
    fn completes_after_block_duration() {
        let mut sink = ClockedSink::new().unwrap();
        let (handle, notifier) = completion_pair(0);
        let started = Instant::now();
        sink.submit(block(2_205, 44_100), notifier).unwrap();

        assert_eq!(
            handle.as_crossbeam().recv_timeout(Duration::from_secs(2)),
            Ok(0)
        );
        assert!(started.elapsed() >= Duration::from_millis(45));
        sink.close();
    }

    #[test]
    fn close_abandons_playing_block_promptly() {
        let mut sink = ClockedSink::new().unwrap();
        let (handle, notifier) = completion_pair(0);
        sink.submit(block(441_000, 44_100), notifier).unwrap();

        let started = Instant::now();
        sink.close();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!handle.wait());
    }

    #[test]
    fn submit_after_close_fails() {
        let mut sink = ClockedSink::new().unwrap();
        sink.close();
        let (_handle, notifier) = completion_pair(0);
        assert!(matches!(
            sink.submit(block(4, 44_100), notifier),
            Err(StreamError::Submit(_))
        ));
    }
}
