// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level};

use super::{RenderDispatcher, RenderError, SampleFormat, OUTPUT_CHANNELS};
use crate::config;

/// An output device visible to cpal.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists cpal output devices across every available host.
pub fn list() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
    let mut devices: Vec<DeviceInfo> = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(output_configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = output_configs
                .map(|output_config| output_config.channels())
                .max()
                .unwrap_or(0);

            if max_channels > 0 {
                devices.push(DeviceInfo {
                    name: device.name()?,
                    host: host_id.name().to_string(),
                    max_channels,
                });
            }
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Finds the output device with the given name. "default" picks the host's default output.
fn find_device(name: &str) -> Result<cpal::Device, Box<dyn Error>> {
    let host = cpal::default_host();
    if name == "default" {
        return host
            .default_output_device()
            .ok_or_else(|| "no default output device".into());
    }

    for device in host.output_devices()? {
        if device.name()?.trim() == name {
            return Ok(device);
        }
    }

    Err(format!("no device found with name {}", name).into())
}

/// Sums every bus into an interleaved output of `channels` channels. Each bus lands in the
/// first two channels.
pub fn mix_buses(dispatcher: &RenderDispatcher, out: &mut [f32], channels: usize) {
    let format = dispatcher.format();
    let sample_bytes = format.bytes_per_sample();

    for bus in dispatcher.buses() {
        for (frame, samples) in out
            .chunks_exact_mut(channels)
            .zip(bus.output().as_bytes().chunks_exact(sample_bytes * OUTPUT_CHANNELS))
        {
            for (channel, sample) in frame
                .iter_mut()
                .take(OUTPUT_CHANNELS)
                .zip(samples.chunks_exact(sample_bytes))
            {
                *channel += format.read_sample(sample);
            }
        }
    }

    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Builds the cpal callback. Renders through the dispatcher unless a non-real-time
/// caller holds it, in which case the callback outputs silence.
fn create_callback<T>(
    dispatcher: Arc<Mutex<RenderDispatcher>>,
    channels: usize,
    max_frames: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let mut mix = vec![0.0f32; max_frames * channels];
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        if mix.len() < data.len() {
            mix.resize(data.len(), 0.0);
        }
        let mix = &mut mix[..data.len()];
        mix.fill(0.0);

        if let Some(mut dispatcher) = dispatcher.try_lock() {
            dispatcher.render(data.len() / channels);
            mix_buses(&dispatcher, mix, channels);
        }

        for (dst, &src) in data.iter_mut().zip(mix.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Builds a stream with the preferred config. If a fixed buffer size is rejected, retries
/// with the device's default buffer size.
fn build_with_fallback<S, E: fmt::Display>(
    preferred: &cpal::StreamConfig,
    mut build: impl FnMut(&cpal::StreamConfig) -> Result<S, E>,
) -> Result<S, E> {
    match build(preferred) {
        Ok(stream) => Ok(stream),
        Err(e) if matches!(preferred.buffer_size, cpal::BufferSize::Fixed(_)) => {
            warn!(
                err = %e,
                buffer_size = ?preferred.buffer_size,
                "Device rejected the buffer size, using its default."
            );
            let fallback = cpal::StreamConfig {
                buffer_size: cpal::BufferSize::Default,
                ..preferred.clone()
            };
            build(&fallback)
        }
        Err(e) => Err(e),
    }
}

/// A running cpal output stream. The stream lives on its own thread until stopped.
pub struct OutputStream {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OutputStream {
    /// Opens the configured device and starts pulling audio from the dispatcher.
    pub fn start(
        config: &config::Audio,
        dispatcher: Arc<Mutex<RenderDispatcher>>,
    ) -> Result<OutputStream, Box<dyn Error>> {
        let span = span!(Level::INFO, "start output (cpal)");
        let _enter = span.enter();

        let target_format = config.target_format()?;
        let name = config.device().to_string();
        let buffer_size = config.buffer_size();
        let stream_config = cpal::StreamConfig {
            channels: OUTPUT_CHANNELS as u16,
            sample_rate: cpal::SampleRate::from(target_format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(buffer_size as u32),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel::<Result<(), String>>();
        let thread = {
            let stop = stop.clone();
            let name = name.clone();
            let target_format = target_format.clone();
            thread::spawn(move || {
                let device = match find_device(&name) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = started_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                if !matches!(
                    (target_format.sample_format, target_format.bits_per_sample),
                    (SampleFormat::Float, 32) | (SampleFormat::Int, 16) | (SampleFormat::Int, 32)
                ) {
                    let _ = started_tx.send(Err(RenderError::UnsupportedFormat(
                        target_format.to_string(),
                    )
                    .to_string()));
                    return;
                }

                let build = |config: &cpal::StreamConfig| {
                    let on_error =
                        |err: cpal::StreamError| error!("CPAL output stream error: {}", err);
                    let dispatcher = dispatcher.clone();
                    match (target_format.sample_format, target_format.bits_per_sample) {
                        (SampleFormat::Float, 32) => device.build_output_stream(
                            config,
                            create_callback::<f32>(dispatcher, OUTPUT_CHANNELS, buffer_size),
                            on_error,
                            None,
                        ),
                        (SampleFormat::Int, 16) => device.build_output_stream(
                            config,
                            create_callback::<i16>(dispatcher, OUTPUT_CHANNELS, buffer_size),
                            on_error,
                            None,
                        ),
                        (SampleFormat::Int, 32) => device.build_output_stream(
                            config,
                            create_callback::<i32>(dispatcher, OUTPUT_CHANNELS, buffer_size),
                            on_error,
                            None,
                        ),
                        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
                    }
                };
                let stream_result = build_with_fallback(&stream_config, build);

                let stream = match stream_result {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = started_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = started_tx.send(Ok(()));

                // Keep the stream alive until stopped.
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                }
            })
        };

        match started_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err("output thread exited before starting".into()),
        }

        info!(device = name, format = %target_format, buffer_size, "Output stream started.");
        Ok(OutputStream {
            name,
            stop,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the stream and waits for its thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            info!(device = self.name, "Output stream stopped.");
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
