//! Real-time bridge from a one-sample-at-a-time emulated sound chip to a
//! block-oriented audio output.
//!
//! A [`SampleSource`](audio_input::SampleSource) pushes samples through a
//! zero-capacity [`sample_channel`](sample_channel::sample_channel); the
//! [`Streamer`](streamer::Streamer) gathers them into blocks and submits each
//! block to a [`PlaybackSink`](audio_output::PlaybackSink) only after the
//! previous one has finished playing.

pub mod audio_input;
pub mod audio_output;
pub mod config;
pub mod error;
pub mod sample_channel;
pub mod streamer;

pub use audio_output::{Block, CompletionNotifier, PlaybackHandle, PlaybackSink, completion_pair};
pub use error::StreamError;
pub use sample_channel::{ChannelClosed, Sample, SampleReceiver, SampleSender, normalize, sample_channel};
pub use streamer::{ExitReason, StreamSummary, Streamer, StreamerConfig, StreamerControl};
