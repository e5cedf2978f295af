//! Probe Application
//!
//! Lists output devices and plays one locator through the full pipeline,
//! logging position and calculated gain until the stream ends.
//!
//! Usage: `jukebox-probe [LOCATOR] [--backend audioout|prelisten|null] [--eq PRESET]`

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jukebox_audio::{
    backend::{create_backend, Backend, BackendId, DeviceState, SignalResolver},
    config::AppConfig,
    eq::EqPresetFactory,
    pipeline::{Pipeline, PlayOptions, PlayerEvent},
};

struct Args {
    locator: String,
    backend: BackendId,
    preset: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        locator: "tone:440:3000".to_string(),
        backend: BackendId::AudioOut,
        preset: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--backend" => {
                let name = iter.next().context("--backend needs a value")?;
                args.backend = match name.as_str() {
                    "audioout" => BackendId::AudioOut,
                    "prelisten" => BackendId::Prelisten,
                    "null" => BackendId::Null,
                    other => bail!("Unknown backend: {}", other),
                };
            }
            "--eq" => args.preset = Some(iter.next().context("--eq needs a preset name")?),
            _ => args.locator = arg,
        }
    }

    Ok(args)
}

#[cfg(feature = "output")]
fn print_devices() {
    use jukebox_audio::backend::device::list_output_devices;

    println!("\n=== Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(not(feature = "output"))]
fn print_devices() {
    println!("\nBuilt without output support, only the null backend is available\n");
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting jukebox probe");

    let args = parse_args()?;
    let config = AppConfig::load();

    print_devices();

    let backend_config = match args.backend {
        BackendId::Prelisten => &config.prelisten,
        _ => &config.output,
    };
    let backend = create_backend(args.backend, backend_config, Arc::new(SignalResolver::new()))?;
    let pipeline = Pipeline::with_config(backend.clone(), &config);

    if let Some(name) = &args.preset {
        let factory = EqPresetFactory::load(config.preset_path()?)?;
        let preset = factory.get_preset_by_name(name)?;
        tracing::info!("Using equalizer preset {}", preset.name);
        pipeline.set_equalizer(true, preset.param);
    }

    let events = pipeline.events();
    let options = PlayOptions {
        fade_in_ms: config.playback.fade_in_ms,
        ..PlayOptions::default()
    };
    let stream = pipeline.play(&args.locator, options)?;

    loop {
        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(PlayerEvent::VideoDetected(id)) => tracing::info!("Stream {} carries video", id),
            Ok(PlayerEvent::EndOfStream(id)) if id == stream.id() => break,
            Ok(PlayerEvent::EndOfStream(_)) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        let (total, elapsed) = stream.time();
        tracing::info!(
            "{} / {} ms, calculated gain {:.2}",
            elapsed,
            total,
            stream.calculated_gain()
        );
    }

    let (total, elapsed) = stream.time();
    tracing::info!(
        "Finished at {} / {} ms, calculated gain {:.2}",
        elapsed,
        total,
        stream.calculated_gain()
    );

    stream.destroy();
    backend.set_device_state(DeviceState::Closed)?;

    tracing::info!("Probe stopped");
    Ok(())
}
