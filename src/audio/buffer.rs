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
use super::{RenderError, TargetFormat, OUTPUT_CHANNELS};
use crate::engine::{NATIVE_BYTES_PER_SAMPLE, NATIVE_CHANNELS};

/// Native samples rendered by one engine for one bus. The previous contents are
/// released every time new samples are requested.
#[derive(Default)]
pub struct RenderBuffer {
    samples: Vec<i16>,
}

impl RenderBuffer {
    /// Creates a buffer with room for `frames` native frames.
    pub fn with_capacity(frames: usize) -> RenderBuffer {
        RenderBuffer {
            samples: Vec::with_capacity(frames * NATIVE_CHANNELS),
        }
    }

    /// Releases the previous contents and sizes the buffer for `frames` frames of
    /// silence. Fails instead of aborting if the memory can't be reserved.
    pub fn prepare(&mut self, frames: usize, bus: usize) -> Result<&mut [i16], RenderError> {
        let len = frames * NATIVE_CHANNELS;
        self.samples.clear();
        self.samples
            .try_reserve_exact(len)
            .map_err(|_| RenderError::Allocation {
                bus,
                bytes: len * NATIVE_BYTES_PER_SAMPLE,
            })?;
        self.samples.resize(len, 0);
        Ok(&mut self.samples)
    }

    /// The samples from the last render.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * NATIVE_BYTES_PER_SAMPLE
    }
}

/// One host bus worth of interleaved stereo in the host format.
#[derive(Default)]
pub struct BusOutput {
    bytes: Vec<u8>,
}

impl BusOutput {
    pub fn with_capacity(frames: usize, format: &TargetFormat) -> BusOutput {
        BusOutput {
            bytes: Vec::with_capacity(frames * OUTPUT_CHANNELS * format.bytes_per_sample()),
        }
    }

    /// Resizes to `frames` frames and zero-fills.
    pub fn prepare(
        &mut self,
        frames: usize,
        format: &TargetFormat,
        bus: usize,
    ) -> Result<(), RenderError> {
        let len = frames * OUTPUT_CHANNELS * format.bytes_per_sample();
        self.bytes.clear();
        self.bytes
            .try_reserve_exact(len)
            .map_err(|_| RenderError::Allocation { bus, bytes: len })?;
        self.bytes.resize(len, 0);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn silence(&mut self) {
        self.bytes.fill(0);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads back the samples as f32. Only meaningful for 32-bit float output.
    pub fn float_samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.bytes
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
