//! Streams samples from the emulation core to a [`PlaybackSink`] in
//! fixed-size blocks.
//!
//! The loop suspends in exactly two places: waiting for the next sample and
//! waiting for the previous block to finish playing before submitting the
//! next one. Both waits also listen on the control queue so `close()` is
//! observed promptly at either point.

use std::ops::ControlFlow;

use crossbeam_channel::{Receiver, Sender, select};
use tracing::{debug, info, warn};

use crate::audio_output::{PlaybackHandle, PlaybackSink, completion_pair, Block};
use crate::audio_output::speaker_output::CpalSink;
use crate::error::StreamError;
use crate::sample_channel::{SampleReceiver, SampleSender, normalize, sample_channel};

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Samples per block.
    pub block_size: usize,
    pub sample_rate_hz: u32,
}

impl StreamerConfig {
    pub fn new(block_size: usize, sample_rate_hz: u32) -> Self {
        Self {
            block_size,
            sample_rate_hz,
        }
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.block_size == 0 {
            return Err(StreamError::InvalidConfig(
                "block size must be at least one sample".into(),
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(StreamError::InvalidConfig(
                "sample rate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Every input endpoint was dropped.
    InputClosed,
    /// `close()` was requested.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub blocks_submitted: u64,
    /// Samples of the partially filled block thrown away at exit.
    pub samples_discarded: usize,
    /// A block was still playing when the stream was closed.
    pub block_abandoned: bool,
    pub exit: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    TogglePause,
    SetSpeed(f32),
    Close,
}

/// Cloneable remote control for a running [`Streamer`].
#[derive(Debug, Clone)]
pub struct StreamerControl {
    tx: Sender<Command>,
}

impl StreamerControl {
    /// Pauses or resumes sample consumption. While paused the producer
    /// blocks on its next send; the block already playing is unaffected.
    pub fn toggle_paused(&self) {
        self.send(Command::TogglePause);
    }

    /// Sets the playback rate multiplier applied from the next submitted
    /// block onward.
    pub fn set_speed(&self, multiplier: f32) {
        self.send(Command::SetSpeed(multiplier));
    }

    /// Makes `run()` return at its next suspension point. The block in
    /// flight is abandoned and the partial block is discarded.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("[streamer] {:?} ignored, streamer already gone.", command);
        }
    }
}

pub struct Streamer {
    config: StreamerConfig,
    sink: Box<dyn PlaybackSink>,
    sink_closed: bool,
    input: Option<SampleSender>,
    samples: SampleReceiver,
    commands: Receiver<Command>,
    control: StreamerControl,
    pending: Vec<f32>,
    in_flight: Option<PlaybackHandle>,
    paused: bool,
    speed: f32,
    next_sequence: u64,
}

impl Streamer {
    /// Builds a streamer around an already-acquired sink. Nothing is
    /// consumed until [`Streamer::run`] is called.
    pub fn create<S>(config: StreamerConfig, sink: S) -> Result<Self, StreamError>
    where
        S: PlaybackSink + 'static,
    {
        config.validate()?;
        let (input, samples) = sample_channel();
        let (tx, commands) = crossbeam_channel::unbounded();

        Ok(Self {
            config,
            sink: Box::new(sink),
            sink_closed: false,
            input: Some(input),
            samples,
            commands,
            control: StreamerControl { tx },
            pending: Vec::with_capacity(config.block_size),
            in_flight: None,
            paused: false,
            speed: 1.0,
            next_sequence: 0,
        })
    }

    /// Opens the default output device and builds a streamer on it.
    pub fn with_default_device(config: StreamerConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let sink = CpalSink::open(config.sample_rate_hz)?;
        Self::create(config, sink)
    }

    /// The endpoint the sample source sends into. Once every clone is
    /// dropped the stream ends.
    pub fn input_endpoint(&self) -> SampleSender {
        match &self.input {
            Some(input) => input.clone(),
            // Unreachable before `run`, which consumes `self`.
            None => sample_channel().0,
        }
    }

    pub fn control(&self) -> StreamerControl {
        self.control.clone()
    }

    pub fn config(&self) -> StreamerConfig {
        self.config
    }

    pub fn toggle_paused(&self) {
        self.control.toggle_paused();
    }

    pub fn set_speed(&self, multiplier: f32) {
        self.control.set_speed(multiplier);
    }

    pub fn close(&self) {
        self.control.close();
    }

    /// Runs the streaming loop on the calling thread until the input closes
    /// or `close()` is requested. The sink is closed on every exit path.
    pub fn run(mut self) -> Result<StreamSummary, StreamError> {
        // Only the source's endpoints may keep the channel open.
        self.input.take();

        info!(
            "[streamer] Streaming {}-sample blocks at {} Hz.",
            self.config.block_size, self.config.sample_rate_hz
        );

        let result = self.stream();
        self.close_sink();

        match &result {
            Ok(summary) => info!(
                "[streamer] Stopped ({:?}): {} blocks submitted, {} samples discarded.",
                summary.exit, summary.blocks_submitted, summary.samples_discarded
            ),
            Err(e) => warn!("[streamer] Stopped on error: {}", e),
        }
        result
    }

    fn stream(&mut self) -> Result<StreamSummary, StreamError> {
        let samples = self.samples.as_crossbeam().clone();
        let commands = self.commands.clone();
        let mut blocks_submitted = 0;

        loop {
            if let ControlFlow::Break(exit) = self.fill_block(&samples, &commands) {
                // End of input lets the last full block play out; close does not.
                let exit = match exit {
                    ExitReason::InputClosed => match self.await_in_flight(&commands) {
                        ControlFlow::Continue(()) => ExitReason::InputClosed,
                        ControlFlow::Break(reason) => reason,
                    },
                    ExitReason::Closed => ExitReason::Closed,
                };
                return Ok(self.summary(exit, blocks_submitted));
            }

            if let ControlFlow::Break(exit) = self.await_in_flight(&commands) {
                return Ok(self.summary(exit, blocks_submitted));
            }

            self.submit()?;
            blocks_submitted += 1;
        }
    }

    fn fill_block(
        &mut self,
        samples: &Receiver<i16>,
        commands: &Receiver<Command>,
    ) -> ControlFlow<ExitReason> {
        while self.pending.len() < self.config.block_size {
            if self.paused {
                // The streamer holds a sender, so the queue never disconnects.
                if let Ok(command) = commands.recv() {
                    if let ControlFlow::Break(exit) = self.apply(command) {
                        return ControlFlow::Break(exit);
                    }
                }
                continue;
            }

            select! {
                recv(samples) -> sample => match sample {
                    Ok(sample) => self.pending.push(normalize(sample)),
                    Err(_) => {
                        info!("[streamer] Sample channel closed.");
                        return ControlFlow::Break(ExitReason::InputClosed);
                    }
                },
                recv(commands) -> command => {
                    if let Ok(command) = command {
                        if let ControlFlow::Break(exit) = self.apply(command) {
                            return ControlFlow::Break(exit);
                        }
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn await_in_flight(&mut self, commands: &Receiver<Command>) -> ControlFlow<ExitReason> {
        let Some(handle) = self.in_flight.take() else {
            return ControlFlow::Continue(());
        };

        let completion = handle.as_crossbeam().clone();
        loop {
            select! {
                recv(completion) -> done => {
                    match done {
                        Ok(sequence) if sequence == handle.sequence() => {
                            debug!("[streamer] Block {} finished playing.", sequence);
                        }
                        Ok(sequence) => {
                            warn!(
                                "[streamer] Completion for block {} while block {} is in flight, ignored.",
                                sequence,
                                handle.sequence()
                            );
                            continue;
                        }
                        Err(_) => {
                            warn!(
                                "[streamer] Sink dropped block {} without reporting completion.",
                                handle.sequence()
                            );
                        }
                    }
                    return ControlFlow::Continue(());
                },
                recv(commands) -> command => {
                    if let Ok(command) = command {
                        if let ControlFlow::Break(exit) = self.apply(command) {
                            self.in_flight = Some(handle);
                            return ControlFlow::Break(exit);
                        }
                    }
                }
            }
        }
    }

    fn submit(&mut self) -> Result<(), StreamError> {
        let samples = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.block_size),
        );
        let sequence = self.next_sequence;
        let block = Block {
            samples,
            rate_hz: self.playback_rate(),
            sequence,
        };
        let (handle, notifier) = completion_pair(sequence);

        debug!(
            "[streamer] Submitting block {} ({} samples at {} Hz).",
            sequence,
            block.samples.len(),
            block.rate_hz
        );
        self.sink.submit(block, notifier)?;

        self.in_flight = Some(handle);
        self.next_sequence += 1;
        Ok(())
    }

    fn apply(&mut self, command: Command) -> ControlFlow<ExitReason> {
        match command {
            Command::TogglePause => {
                self.paused = !self.paused;
                if self.paused {
                    info!(
                        "[streamer] Paused with {}/{} samples pending.",
                        self.pending.len(),
                        self.config.block_size
                    );
                } else {
                    info!("[streamer] Resumed.");
                }
            }
            Command::SetSpeed(multiplier) => {
                if !multiplier.is_finite() || multiplier <= 0.0 {
                    warn!("[streamer] Rejected speed multiplier {}.", multiplier);
                } else {
                    self.speed = multiplier.clamp(MIN_SPEED, MAX_SPEED);
                    if self.speed != multiplier {
                        warn!(
                            "[streamer] Speed {} clamped to {}.",
                            multiplier, self.speed
                        );
                    }
                    info!(
                        "[streamer] Speed set to {}x ({} Hz).",
                        self.speed,
                        self.playback_rate()
                    );
                }
            }
            Command::Close => {
                info!("[streamer] Close requested.");
                return ControlFlow::Break(ExitReason::Closed);
            }
        }
        ControlFlow::Continue(())
    }

    fn playback_rate(&self) -> u32 {
        (self.config.sample_rate_hz as f64 * self.speed as f64).round() as u32
    }

    fn summary(&self, exit: ExitReason, blocks_submitted: u64) -> StreamSummary {
        StreamSummary {
            blocks_submitted,
            samples_discarded: self.pending.len(),
            block_abandoned: self.in_flight.is_some(),
            exit,
        }
    }

    fn close_sink(&mut self) {
        if !self.sink_closed {
            self.sink.close();
            self.sink_closed = true;
        }
        self.in_flight = None;
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if !self.sink_closed {
            debug!("[streamer] Dropped without running, closing sink.");
            self.close_sink();
        }
    }
}
