use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

use crate::error::StreamError;

pub mod clocked_output;
pub mod speaker_output;

/// A full block of normalized mono samples, ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub samples: Vec<f32>,
    /// Rate the sink should render this block at (base rate times speed).
    pub rate_hz: u32,
    /// Position of this block in the stream, starting at 0.
    pub sequence: u64,
}

impl Block {
    pub fn duration_secs(&self) -> f64 {
        if self.rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.rate_hz as f64
    }
}

/// A buffer-oriented playback device.
///
/// `submit` starts asynchronous playback of `block` and returns without
/// waiting for it. The sink must call [`CompletionNotifier::notify`] once
/// every sample of the block has been rendered, from whatever context its
/// playback runs in.
pub trait PlaybackSink: Send {
    fn submit(&mut self, block: Block, notifier: CompletionNotifier) -> Result<(), StreamError>;

    /// Stops playback and releases the device. Must be idempotent.
    fn close(&mut self);
}

/// Creates the single-slot completion signal for the block `sequence`.
pub fn completion_pair(sequence: u64) -> (PlaybackHandle, CompletionNotifier) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        PlaybackHandle { sequence, rx },
        CompletionNotifier { sequence, tx },
    )
}

/// Producer half of a completion signal, owned by the sink.
///
/// Notifying never blocks, so it is safe to call from an audio device
/// callback.
#[derive(Debug)]
pub struct CompletionNotifier {
    sequence: u64,
    tx: Sender<u64>,
}

impl CompletionNotifier {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn notify(self) {
        match self.tx.try_send(self.sequence) {
            Ok(()) => {}
            // The streamer stopped waiting for this block (closed or abandoned).
            Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "[completion] Duplicate completion for block {} ignored.",
                    self.sequence
                );
            }
        }
    }
}

/// Consumer half of a completion signal, held by the streamer while the
/// block is in flight.
#[derive(Debug)]
pub struct PlaybackHandle {
    sequence: u64,
    rx: Receiver<u64>,
}

impl PlaybackHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn as_crossbeam(&self) -> &Receiver<u64> {
        &self.rx
    }

    /// Blocks until the sink reports completion. Returns `false` if the
    /// notifier was dropped without firing.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }
}
