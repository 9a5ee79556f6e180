//! Zero-capacity rendezvous channel carrying PCM samples from the emulation
//! core to the [`Streamer`](crate::streamer::Streamer).
//!
//! Every `send` blocks until the Streamer takes the sample and every
//! `receive` blocks until the core produces one. This is the only thing
//! coupling emulation speed to playback.

use crossbeam_channel::{Receiver, RecvError, Sender};
use thiserror::Error;

/// One mono PCM amplitude as produced by the emulation core.
pub type Sample = i16;

/// The Streamer side of the channel has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sample channel closed")]
pub struct ChannelClosed;

/// Converts a raw sample to `[-1.0, 1.0]`.
///
/// `-32768 / 32767` falls just below `-1.0`, so the negative extreme is
/// clamped.
pub fn normalize(sample: Sample) -> f32 {
    (sample as f32 / i16::MAX as f32).max(-1.0)
}

/// Creates a connected, unbuffered sample channel.
pub fn sample_channel() -> (SampleSender, SampleReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (SampleSender { inner: tx }, SampleReceiver { inner: rx })
}

/// Producer endpoint handed to the sample source.
///
/// Dropping every clone (or calling [`SampleSender::close`]) signals
/// end-of-stream to the Streamer.
#[derive(Debug, Clone)]
pub struct SampleSender {
    inner: Sender<Sample>,
}

impl SampleSender {
    /// Blocks until the Streamer has taken `sample`.
    pub fn send(&self, sample: Sample) -> Result<(), ChannelClosed> {
        self.inner.send(sample).map_err(|_| ChannelClosed)
    }

    pub fn close(self) {
        drop(self);
    }
}

/// Consumer endpoint owned by the Streamer.
#[derive(Debug)]
pub struct SampleReceiver {
    inner: Receiver<Sample>,
}

impl SampleReceiver {
    /// Blocks until a sample arrives. Errors once every sender is dropped.
    pub fn receive(&self) -> Result<Sample, RecvError> {
        self.inner.recv()
    }

    pub(crate) fn as_crossbeam(&self) -> &Receiver<Sample> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn normalize_follows_conversion_law() {
        for v in [i16::MIN, -16384, -1, 0, 1, 12345, i16::MAX] {
            let expected = (v as f32 / 32767.0).max(-1.0);
            assert_eq!(normalize(v), expected);
        }
        assert_eq!(normalize(i16::MAX), 1.0);
        assert_eq!(normalize(0), 0.0);
    }

    #[test]
    fn most_negative_sample_clamps_to_exactly_minus_one() {
        assert_eq!(normalize(-32768), -1.0);
    }

    #[test]
    fn send_blocks_until_received() {
        let (tx, rx) = sample_channel();
        let producer = thread::spawn(move || {
            tx.send(7).unwrap();
            tx.send(8).unwrap();
        });

        // Nothing is buffered: the producer is parked inside the first send.
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(rx.receive().unwrap(), 7);
        assert_eq!(rx.receive().unwrap(), 8);
        producer.join().unwrap();
    }

    #[test]
    fn dropping_sender_unblocks_pending_receive() {
        let (tx, rx) = sample_channel();
        let consumer = thread::spawn(move || rx.receive());
        thread::sleep(Duration::from_millis(20));
        tx.close();
        assert!(consumer.join().unwrap().is_err());
    }

    #[test]
    fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = sample_channel();
        drop(rx);
        assert_eq!(tx.send(1), Err(ChannelClosed));
    }
}
