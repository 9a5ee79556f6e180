use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nes_audio_bridge::audio_input::{spawn_source, tone_source::ToneSource};
use nes_audio_bridge::audio_output::clocked_output::ClockedSink;
use nes_audio_bridge::config::{Config, OutputType};
use nes_audio_bridge::streamer::{MAX_SPEED, MIN_SPEED, Streamer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("🚀 Starting NES audio bridge...");
    let app_config = Config::from_env().context("🚨 Failed to load configuration")?;
    let streamer_config = app_config.streamer_config();

    let streamer = match app_config.audio_output_type {
        OutputType::Speaker => {
            info!("🔊 Using local speaker output.");
            Streamer::with_default_device(streamer_config)
                .context("Failed to open speaker output")?
        }
        OutputType::Clocked => {
            info!("⏱️ Using clocked (deviceless) output.");
            let sink = ClockedSink::new().context("Failed to start clocked output")?;
            Streamer::create(streamer_config, sink)?
        }
    };

    let control = streamer.control();
    let source = ToneSource::new(
        app_config.audio_sample_rate,
        app_config.tone_frequency_hz,
        app_config.tone_amplitude,
    );
    let source_handle = spawn_source(source, streamer.input_endpoint(), "tone-source")?;

    let streamer_handle = std::thread::Builder::new()
        .name("streamer-thread".into())
        .spawn(move || streamer.run())
        .context("Failed to spawn streamer thread")?;
    let mut streamer_task = tokio::task::spawn_blocking(move || streamer_handle.join());

    info!("🎧 Streaming. Commands: p = pause/resume, + / - = speed, q = quit. Ctrl+C also exits.");

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut speed = 1.0f32;
    let mut stdin_open = true;

    let streamer_result = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, initiating shutdown...");
                control.close();
                break streamer_task.await;
            }

            joined = &mut streamer_task => {
                warn!("Streamer stopped on its own.");
                break joined;
            }

            line = stdin_lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "p" => control.toggle_paused(),
                        "+" => {
                            speed = (speed * 2.0).min(MAX_SPEED);
                            control.set_speed(speed);
                        }
                        "-" => {
                            speed = (speed / 2.0).max(MIN_SPEED);
                            control.set_speed(speed);
                        }
                        "q" => {
                            control.close();
                            break streamer_task.await;
                        }
                        "" => {}
                        other => warn!("Unknown command {:?}.", other),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        error!("🚨 Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    };

    // --- Shutdown Sequence ---
    let summary = match streamer_result {
        Ok(Ok(Ok(summary))) => summary,
        Ok(Ok(Err(e))) => return Err(e).context("Streamer failed"),
        Ok(Err(panic)) => return Err(anyhow!("Streamer thread panicked: {:?}", panic)),
        Err(join_err) => return Err(join_err).context("Failed to join streamer thread"),
    };
    info!(
        "📊 {} blocks played, {} samples discarded, exit: {:?}.",
        summary.blocks_submitted, summary.samples_discarded, summary.exit
    );

    info!("🔌 Waiting for the sample source to stop...");
    match tokio::task::spawn_blocking(move || source_handle.join()).await {
        Ok(Ok(delivered)) => info!("Sample source delivered {} samples.", delivered),
        Ok(Err(e)) => error!("🚨 Sample source thread panicked: {:?}", e),
        Err(join_err) => error!("🚨 Failed to join sample source thread: {}", join_err),
    }

    info!("👋 NES audio bridge shut down gracefully. Goodbye!");
    Ok(())
}
