use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::info;

use crate::sample_channel::{Sample, SampleSender};

pub mod tone_source;

/// A synchronous producer of mono PCM samples, one per sample period.
pub trait SampleSource: Send {
    fn next_sample(&mut self) -> Sample;

    fn sample_rate(&self) -> u32;
}

/// Runs `source` on its own thread, sending every sample into `sender`.
///
/// The channel's backpressure is the only pacing: each send blocks until the
/// streamer takes the sample. Returns the number of samples delivered once
/// the streamer side goes away.
pub fn spawn_source<S>(mut source: S, sender: SampleSender, name: &str) -> Result<JoinHandle<u64>>
where
    S: SampleSource + 'static,
{
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            info!(
                "[{}] Producing samples at {} Hz.",
                thread_name,
                source.sample_rate()
            );
            let mut delivered = 0u64;
            while sender.send(source.next_sample()).is_ok() {
                delivered += 1;
            }
            info!(
                "[{}] Sample channel closed after {} samples.",
                thread_name, delivered
            );
            delivered
        })
        .with_context(|| format!("Failed to spawn sample source thread {name}"))
}
