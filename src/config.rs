use anyhow::{Context, Result, anyhow};
use std::env;

use crate::streamer::StreamerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Speaker,
    Clocked,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub audio_sample_rate: u32,
    pub audio_block_size: usize,
    pub audio_output_type: OutputType,
    pub tone_frequency_hz: f32,
    pub tone_amplitude: i16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let audio_sample_rate = var("AUDIO_SAMPLE_RATE", "44100")
            .parse::<u32>()
            .context("Invalid AUDIO_SAMPLE_RATE")?;
        let audio_block_size = var("AUDIO_BLOCK_SIZE", "2048")
            .parse::<usize>()
            .context("Invalid AUDIO_BLOCK_SIZE")?;

        let audio_output_type = match var("AUDIO_OUTPUT_TYPE", "SPEAKER").to_uppercase().as_str() {
            "SPEAKER" => OutputType::Speaker,
            "CLOCKED" => OutputType::Clocked,
            other => {
                return Err(anyhow!(
                    "Invalid AUDIO_OUTPUT_TYPE {other}. Use SPEAKER or CLOCKED."
                ));
            }
        };

        let tone_frequency_hz = var("TONE_FREQUENCY_HZ", "440")
            .parse::<f32>()
            .context("Invalid TONE_FREQUENCY_HZ")?;
        let tone_amplitude = var("TONE_AMPLITUDE", "8000")
            .parse::<i16>()
            .context("Invalid TONE_AMPLITUDE")?;

        if audio_sample_rate == 0 {
            return Err(anyhow!("AUDIO_SAMPLE_RATE must be non-zero."));
        }
        if audio_block_size == 0 {
            return Err(anyhow!("AUDIO_BLOCK_SIZE must be at least 1."));
        }

        if !audio_block_size.is_power_of_two() {
            tracing::warn!(
                "AUDIO_BLOCK_SIZE is set to {}. Power-of-two block sizes suit most devices best.",
                audio_block_size
            );
        }
        if audio_sample_rate != 44_100 && audio_sample_rate != 48_000 {
            tracing::warn!(
                "AUDIO_SAMPLE_RATE is set to {}. 44100 or 48000 Hz is recommended.",
                audio_sample_rate
            );
        }

        Ok(Self {
            audio_sample_rate,
            audio_block_size,
            audio_output_type,
            tone_frequency_hz,
            tone_amplitude,
        })
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig::new(self.audio_block_size, self.audio_sample_rate)
    }
}
