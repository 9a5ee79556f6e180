use super::SampleSource;
use crate::sample_channel::Sample;

/// Square wave in the style of the NES pulse channel: a duty cycle over a
/// phase accumulator advanced once per virtual sample clock tick.
#[derive(Debug, Clone)]
pub struct ToneSource {
    sample_rate: u32,
    frequency_hz: f32,
    amplitude: i16,
    duty: f32,
    phase: f32,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frequency_hz: f32, amplitude: i16) -> Self {
        Self {
            sample_rate,
            frequency_hz,
            amplitude: amplitude.max(0),
            duty: 0.5,
            phase: 0.0,
        }
    }

    /// Fraction of each period spent high, clamped to `(0, 1)`.
    pub fn with_duty(mut self, duty: f32) -> Self {
        self.duty = duty.clamp(0.01, 0.99);
        self
    }
}

impl SampleSource for ToneSource {
    fn next_sample(&mut self) -> Sample {
        let value = if self.phase < self.duty {
            self.amplitude
        } else {
            -self.amplitude
        };
        if self.sample_rate > 0 {
            self.phase += self.frequency_hz / self.sample_rate as f32;
            self.phase -= self.phase.floor();
        }
        value
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
