use cpal::{
    FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, error, info, warn};

use super::{Block, CompletionNotifier, PlaybackSink};
use crate::error::StreamError;

type Queued = (Block, CompletionNotifier);

/// Plays blocks on the default output device.
///
/// The cpal stream lives on its own thread (streams are not `Send` on every
/// host). Blocks reach the device callback through a one-slot channel and
/// the callback fires each block's notifier after rendering its last sample.
pub struct CpalSink {
    block_tx: Option<Sender<Queued>>,
    stop_tx: Option<Sender<()>>,
    callback_should_stop: Arc<AtomicBool>,
    thread_join_handle: Option<std::thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn open(sample_rate_hz: u32) -> Result<Self, StreamError> {
        let (block_tx, block_rx) = crossbeam_channel::bounded::<Queued>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32, StreamError>>(1);
        let callback_should_stop = Arc::new(AtomicBool::new(false));
        let callback_stop_clone = callback_should_stop.clone();

        let join_handle = std::thread::Builder::new()
            .name("cpal-speaker-output-thread".into())
            .spawn(move || {
                let stream = match build_output(sample_rate_hz, block_rx, callback_stop_clone) {
                    Ok((stream, device_rate)) => {
                        let _ = ready_tx.send(Ok(device_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Disconnects when the sink is closed or dropped.
                let _ = stop_rx.recv();
                debug!("[cpal-sink] Stop signal received, releasing output stream.");
                if let Err(e) = stream.pause() {
                    debug!("[cpal-sink] Pause before drop failed: {}", e);
                }
                drop(stream);
                info!("[cpal-sink] Output thread finished.");
            })
            .map_err(|e| StreamError::SinkUnavailable(format!("failed to spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(device_rate)) => debug!("[cpal-sink] Output ready at {} Hz.", device_rate),
            Ok(Err(e)) => {
                let _ = join_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = join_handle.join();
                return Err(StreamError::SinkUnavailable(
                    "output thread exited during setup".into(),
                ));
            }
        }

        Ok(Self {
            block_tx: Some(block_tx),
            stop_tx: Some(stop_tx),
            callback_should_stop,
            thread_join_handle: Some(join_handle),
        })
    }
}

impl PlaybackSink for CpalSink {
    fn submit(&mut self, block: Block, notifier: CompletionNotifier) -> Result<(), StreamError> {
        let Some(block_tx) = &self.block_tx else {
            return Err(StreamError::Submit("sink is closed".into()));
        };
        match block_tx.try_send((block, notifier)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full((block, _))) => Err(StreamError::Submit(format!(
                "block {} submitted while the device still holds a queued block",
                block.sequence
            ))),
            Err(TrySendError::Disconnected((block, _))) => Err(StreamError::Submit(format!(
                "output stream gone before block {}",
                block.sequence
            ))),
        }
    }

    fn close(&mut self) {
        if self.thread_join_handle.is_none() {
            return;
        }
        self.callback_should_stop.store(true, Ordering::Relaxed);
        self.block_tx.take();
        self.stop_tx.take();
        if let Some(handle) = self.thread_join_handle.take() {
            if let Err(e) = handle.join() {
                error!("[cpal-sink] Output thread panicked: {:?}", e);
            }
        }
        info!("[cpal-sink] Closed.");
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output(
    sample_rate_hz: u32,
    block_rx: Receiver<Queued>,
    callback_should_stop: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), StreamError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| StreamError::SinkUnavailable("no default output device".into()))?;
    info!(
        "[cpal-sink] Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = find_output_config(&device, sample_rate_hz)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    info!(
        "[cpal-sink] Selected output config: {:?}, Format: {:?}",
        config, sample_format
    );
    if config.sample_rate.0 != sample_rate_hz {
        warn!(
            "[cpal-sink] Device runs at {} Hz, blocks will be stepped from {} Hz.",
            config.sample_rate.0, sample_rate_hz
        );
    }

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, block_rx, callback_should_stop),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, block_rx, callback_should_stop),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, block_rx, callback_should_stop),
        other => {
            return Err(StreamError::SinkUnavailable(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }?;

    stream
        .play()
        .map_err(|e| StreamError::SinkUnavailable(format!("failed to start output stream: {e}")))?;
    info!("[cpal-sink] Speaker stream playing.");

    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_rx: Receiver<Queued>,
    callback_should_stop: Arc<AtomicBool>,
) -> Result<cpal::Stream, StreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut player = BlockPlayer::new(block_rx, config.sample_rate.0);
    let err_fn = |err| error!("[cpal-sink] Audio output error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if callback_should_stop.load(Ordering::Relaxed) {
                    data.fill(T::EQUILIBRIUM);
                    return;
                }
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(player.next_value());
                    frame.fill(value);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| StreamError::SinkUnavailable(format!("failed to build output stream: {e}")))
}

/// Picks an output config at the requested rate, preferring `f32`, then
/// `i16`, then `u16`. Falls back to the closest supported rate.
fn find_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<SupportedStreamConfig, StreamError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| StreamError::SinkUnavailable(format!("cannot query output configs: {e}")))?;

    let mut best: Option<(u32, u8, SupportedStreamConfig)> = None;
    for range in ranges {
        let format_rank = match range.sample_format() {
            SampleFormat::F32 => 0,
            SampleFormat::I16 => 1,
            SampleFormat::U16 => 2,
            _ => continue,
        };
        let min = range.min_sample_rate().0;
        let max = range.max_sample_rate().0;
        let rate = target_rate.clamp(min, max);
        let rate_diff = rate.abs_diff(target_rate);

        let better = match &best {
            None => true,
            Some((best_diff, best_rank, _)) => {
                (rate_diff, format_rank) < (*best_diff, *best_rank)
            }
        };
        if better {
            best = Some((rate_diff, format_rank, range.with_sample_rate(SampleRate(rate))));
        }
    }

    match best {
        Some((_, _, config)) => Ok(config),
        None => device.default_output_config().map_err(|e| {
            StreamError::SinkUnavailable(format!("no usable output config: {e}"))
        }),
    }
}

struct Playing {
    block: Block,
    notifier: Option<CompletionNotifier>,
    cursor: f64,
    step: f64,
}

/// Callback-side state: renders the current block one frame at a time and
/// signals completion when it runs out. Never blocks.
struct BlockPlayer {
    block_rx: Receiver<Queued>,
    device_rate: u32,
    current: Option<Playing>,
}

impl BlockPlayer {
    fn new(block_rx: Receiver<Queued>, device_rate: u32) -> Self {
        Self {
            block_rx,
            device_rate,
            current: None,
        }
    }

    fn next_value(&mut self) -> f32 {
        if self.current.is_none() {
            match self.block_rx.try_recv() {
                Ok((block, notifier)) => {
                    let step = block.rate_hz as f64 / self.device_rate as f64;
                    self.current = Some(Playing {
                        block,
                        notifier: Some(notifier),
                        cursor: 0.0,
                        step,
                    });
                }
                // Underrun: nothing queued yet, play silence.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return 0.0,
            }
        }

        let Some(playing) = self.current.as_mut() else {
            return 0.0;
        };
        let index = playing.cursor as usize;
        let value = playing.block.samples.get(index).copied().unwrap_or(0.0);
        playing.cursor += playing.step;

        if playing.cursor as usize >= playing.block.samples.len() {
            if let Some(notifier) = playing.notifier.take() {
                notifier.notify();
            }
            self.current = None;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_output::completion_pair;

    fn queue(tx: &Sender<Queued>, samples: Vec<f32>, rate_hz: u32) -> crate::audio_output::PlaybackHandle {
        let (handle, notifier) = completion_pair(0);
        tx.try_send((
            Block {
                samples,
                rate_hz,
                sequence: 0,
            },
            notifier,
        ))
        .unwrap();
        handle
    }

    #[test]
    fn player_renders_block_then_notifies() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut player = BlockPlayer::new(rx, 44_100);
        let handle = queue(&tx, vec![0.1, 0.2, 0.3], 44_100);

        assert_eq!(player.next_value(), 0.1);
        assert_eq!(player.next_value(), 0.2);
        assert!(handle.as_crossbeam().try_recv().is_err());
        assert_eq!(player.next_value(), 0.3);
        assert_eq!(handle.as_crossbeam().try_recv(), Ok(0));
    }

    #[test]
    fn player_emits_silence_on_underrun() {
        let (_tx, rx) = crossbeam_channel::bounded::<Queued>(1);
        let mut player = BlockPlayer::new(rx, 48_000);
        assert_eq!(player.next_value(), 0.0);
        assert_eq!(player.next_value(), 0.0);
    }

    #[test]
    fn double_rate_block_plays_every_other_sample() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut player = BlockPlayer::new(rx, 44_100);
        let handle = queue(&tx, vec![0.1, 0.2, 0.3, 0.4], 88_200);

        assert_eq!(player.next_value(), 0.1);
        assert_eq!(player.next_value(), 0.3);
        assert_eq!(handle.as_crossbeam().try_recv(), Ok(0));
    }
}
