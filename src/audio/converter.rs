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
use rubato::{
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, VecResampler, WindowFunction,
};

use super::{RenderError, TargetFormat, OUTPUT_CHANNELS};
use crate::engine::{NATIVE_CHANNELS, NATIVE_SAMPLE_RATE};

/// Native frames fed to the resampler per block.
const INPUT_BLOCK_SIZE: usize = 256;

const I16_SCALE: f32 = 1.0 / 32768.0;

/// Supplies native 32 kHz 16-bit interleaved stereo on demand.
pub trait NativeProducer {
    /// Produces exactly `frames` frames.
    fn produce(&mut self, frames: usize) -> Result<&[i16], RenderError>;
}

/// Planar FIFO of resampled frames waiting to be written to the host.
struct PlanarFifo {
    channels: Vec<Vec<f32>>,
    read_pos: usize,
}

impl PlanarFifo {
    fn with_capacity(frames: usize) -> PlanarFifo {
        PlanarFifo {
            channels: vec![Vec::with_capacity(frames); OUTPUT_CHANNELS],
            read_pos: 0,
        }
    }

    fn available(&self) -> usize {
        self.channels[0].len() - self.read_pos
    }

    fn push(&mut self, planar: &[Vec<f32>], frames: usize) {
        for (channel, input) in self.channels.iter_mut().zip(planar) {
            channel.extend_from_slice(&input[..frames]);
        }
    }

    /// Pops one frame. Callers check [`PlanarFifo::available`] first.
    fn pop(&mut self) -> (f32, f32) {
        let frame = (
            self.channels[0][self.read_pos],
            self.channels[1][self.read_pos],
        );
        self.read_pos += 1;
        frame
    }

    /// Moves the unread frames to the front.
    fn compact(&mut self) {
        if self.read_pos > 0 {
            for channel in self.channels.iter_mut() {
                channel.drain(..self.read_pos);
            }
            self.read_pos = 0;
        }
    }
}

struct Resampling {
    resampler: SincFixedIn<f32>,
    input: Vec<Vec<f32>>,
    scratch: Vec<Vec<f32>>,
    fifo: PlanarFifo,
}

/// Converts native engine output into the host format, resampling when the host
/// rate isn't 32 kHz.
pub struct FormatConverter {
    target: TargetFormat,
    resampling: Option<Resampling>,
}

impl FormatConverter {
    /// Creates a converter. `max_frames` sizes the internal buffers so steady state
    /// rendering doesn't allocate.
    pub fn new(target: TargetFormat, max_frames: usize) -> Result<FormatConverter, RenderError> {
        if !target.is_supported() {
            return Err(RenderError::UnsupportedFormat(target.to_string()));
        }

        let resampling = if target.sample_rate != NATIVE_SAMPLE_RATE {
            let sinc_params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                oversampling_factor: 128,
                interpolation: SincInterpolationType::Linear,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = f64::from(target.sample_rate) / f64::from(NATIVE_SAMPLE_RATE);
            let resampler = SincFixedIn::<f32>::new(
                ratio,
                1.0,
                sinc_params,
                INPUT_BLOCK_SIZE,
                OUTPUT_CHANNELS,
            )
            .map_err(|_e| RenderError::ResamplingFailed(NATIVE_SAMPLE_RATE, target.sample_rate))?;

            let scratch = resampler.output_buffer_allocate(true);
            let fifo_frames = max_frames + scratch[0].len();
            Some(Resampling {
                resampler,
                input: vec![Vec::with_capacity(INPUT_BLOCK_SIZE); OUTPUT_CHANNELS],
                scratch,
                fifo: PlanarFifo::with_capacity(fifo_frames),
            })
        } else {
            None
        };

        Ok(FormatConverter { target, resampling })
    }

    pub fn is_resampling(&self) -> bool {
        self.resampling.is_some()
    }

    /// Fills `out` with `out.len() / frame size` frames pulled from the producer.
    pub fn convert(
        &mut self,
        producer: &mut dyn NativeProducer,
        out: &mut [u8],
    ) -> Result<(), RenderError> {
        let sample_bytes = self.target.bytes_per_sample();
        let frame_bytes = sample_bytes * OUTPUT_CHANNELS;
        let frames = out.len() / frame_bytes;

        let Some(resampling) = self.resampling.as_mut() else {
            let native = producer.produce(frames)?;
            for (frame, samples) in out
                .chunks_exact_mut(frame_bytes)
                .zip(native.chunks_exact(NATIVE_CHANNELS))
            {
                let (left, right) = frame.split_at_mut(sample_bytes);
                self.target
                    .write_sample(f32::from(samples[0]) * I16_SCALE, left);
                self.target
                    .write_sample(f32::from(samples[1]) * I16_SCALE, right);
            }
            return Ok(());
        };

        resampling.fifo.compact();
        while resampling.fifo.available() < frames {
            let needed = resampling.resampler.input_frames_next();
            let native = producer.produce(needed)?;
            for channel in resampling.input.iter_mut() {
                channel.clear();
            }
            for samples in native.chunks_exact(NATIVE_CHANNELS) {
                resampling.input[0].push(f32::from(samples[0]) * I16_SCALE);
                resampling.input[1].push(f32::from(samples[1]) * I16_SCALE);
            }

            let (_, produced) = resampling
                .resampler
                .process_into_buffer(&resampling.input, &mut resampling.scratch, None)
                .map_err(|_e| {
                    RenderError::ResamplingFailed(NATIVE_SAMPLE_RATE, self.target.sample_rate)
                })?;
            resampling.fifo.push(&resampling.scratch, produced);
        }

        for frame in out.chunks_exact_mut(frame_bytes) {
            let (left, right) = resampling.fifo.pop();
            let (left_bytes, right_bytes) = frame.split_at_mut(sample_bytes);
            self.target.write_sample(left, left_bytes);
            self.target.write_sample(right, right_bytes);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    /// Produces a constant value and counts the frames it was asked for.
    struct Constant {
        value: i16,
        buffer: Vec<i16>,
        requested: usize,
    }

    impl Constant {
        fn new(value: i16) -> Constant {
            Constant {
                value,
                buffer: Vec::new(),
                requested: 0,
            }
        }
    }

    impl NativeProducer for Constant {
        fn produce(&mut self, frames: usize) -> Result<&[i16], RenderError> {
            self.requested += frames;
            self.buffer.clear();
            self.buffer.resize(frames * NATIVE_CHANNELS, self.value);
            Ok(&self.buffer)
        }
    }

    struct Failing;

    impl NativeProducer for Failing {
        fn produce(&mut self, frames: usize) -> Result<&[i16], RenderError> {
            Err(RenderError::Allocation {
                bus: 0,
                bytes: frames * 4,
            })
        }
    }

    #[test]
    fn test_passthrough_int16() {
        let target = TargetFormat::new(NATIVE_SAMPLE_RATE, SampleFormat::Int, 16).unwrap();
        let mut converter = FormatConverter::new(target, 128).unwrap();
        assert!(!converter.is_resampling());

        let mut producer = Constant::new(1234);
        let mut out = vec![0u8; 128 * 2 * 2];
        converter.convert(&mut producer, &mut out).unwrap();

        assert_eq!(producer.requested, 128);
        for sample in out.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            assert!((i32::from(value) - 1234).abs() <= 1);
        }
    }

    #[test]
    fn test_passthrough_float() {
        let mut converter =
            FormatConverter::new(TargetFormat::float(NATIVE_SAMPLE_RATE), 64).unwrap();
        let mut producer = Constant::new(-16384);
        let mut out = vec![0u8; 64 * 2 * 4];
        converter.convert(&mut producer, &mut out).unwrap();

        for sample in out.chunks_exact(4) {
            assert_eq!(
                f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]),
                -0.5
            );
        }
    }

    #[test]
    fn test_resampling_fills_every_callback() {
        let mut converter = FormatConverter::new(TargetFormat::float(48000), 512).unwrap();
        assert!(converter.is_resampling());

        let mut producer = Constant::new(0);
        for frames in [128usize, 512, 33, 256] {
            let mut out = vec![0xFFu8; frames * 2 * 4];
            converter.convert(&mut producer, &mut out).unwrap();
            for sample in out.chunks_exact(4) {
                let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                assert!(value.abs() < 1e-6);
            }
        }
        // Roughly 2 native frames for every 3 host frames, plus resampler lookahead.
        assert!(producer.requested >= (128 + 512 + 33 + 256) * 2 / 3);
    }

    #[test]
    fn test_resampled_dc_level() {
        let mut converter = FormatConverter::new(TargetFormat::float(44100), 1024).unwrap();
        let mut producer = Constant::new(8192);
        let mut out = vec![0u8; 1024 * 2 * 4];
        // Let the filter settle.
        for _ in 0..4 {
            converter.convert(&mut producer, &mut out).unwrap();
        }
        let last = &out[out.len() - 4..];
        let value = f32::from_le_bytes([last[0], last[1], last[2], last[3]]);
        assert!((value - 0.25).abs() < 0.01, "got {}", value);
    }

    #[test]
    fn test_producer_failure() {
        let mut converter = FormatConverter::new(TargetFormat::float(48000), 128).unwrap();
        let mut out = vec![0u8; 128 * 2 * 4];
        assert!(matches!(
            converter.convert(&mut Failing, &mut out),
            Err(RenderError::Allocation { .. })
        ));
    }
}
