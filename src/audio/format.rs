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

use std::{fmt, str::FromStr};

use super::RenderError;

/// Sample format enumeration for host buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed integer samples (16, 24 or 32 bit)
    Int,
    /// Floating point samples (32 or 64 bit)
    Float,
}

impl FromStr for SampleFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, RenderError> {
        match s {
            "float" | "Float" => Ok(SampleFormat::Float),
            "int" | "Int" => Ok(SampleFormat::Int),
            _ => Err(RenderError::UnsupportedFormat(format!(
                "unknown sample format {}",
                s
            ))),
        }
    }
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The format the host expects in its bus buffers. Always interleaved stereo.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub bits_per_sample: u16,
}

impl TargetFormat {
    /// Creates a new TargetFormat, rejecting combinations the converter can't write.
    pub fn new(
        sample_rate: u32,
        sample_format: SampleFormat,
        bits_per_sample: u16,
    ) -> Result<Self, RenderError> {
        if sample_rate == 0 {
            return Err(RenderError::UnsupportedFormat(
                "sample rate must be greater than 0".to_string(),
            ));
        }

        let format = TargetFormat {
            sample_rate,
            sample_format,
            bits_per_sample,
        };
        if !format.is_supported() {
            return Err(RenderError::UnsupportedFormat(format.to_string()));
        }

        Ok(format)
    }

    /// 32-bit float at the given rate.
    pub fn float(sample_rate: u32) -> TargetFormat {
        TargetFormat {
            sample_rate,
            sample_format: SampleFormat::Float,
            bits_per_sample: 32,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            (self.sample_format, self.bits_per_sample),
            (SampleFormat::Int, 16 | 24 | 32) | (SampleFormat::Float, 32 | 64)
        )
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    /// Writes one sample in [-1.0, 1.0] as little-endian bytes. `out` must be exactly
    /// [`TargetFormat::bytes_per_sample`] long.
    pub fn write_sample(&self, sample: f32, out: &mut [u8]) {
        let sample = sample.clamp(-1.0, 1.0);
        match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Float, 64) => out.copy_from_slice(&f64::from(sample).to_le_bytes()),
            (SampleFormat::Float, _) => out.copy_from_slice(&sample.to_le_bytes()),
            (SampleFormat::Int, 16) => {
                out.copy_from_slice(&((sample * f32::from(i16::MAX)) as i16).to_le_bytes())
            }
            (SampleFormat::Int, 24) => {
                let value = (sample * 8_388_607.0) as i32;
                out.copy_from_slice(&value.to_le_bytes()[..3]);
            }
            (SampleFormat::Int, _) => {
                let value = (f64::from(sample) * f64::from(i32::MAX)) as i32;
                out.copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Reads back one sample written by [`TargetFormat::write_sample`].
    pub fn read_sample(&self, bytes: &[u8]) -> f32 {
        match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Float, 64) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw) as f32
            }
            (SampleFormat::Float, _) => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            (SampleFormat::Int, 16) => {
                f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / f32::from(i16::MAX)
            }
            (SampleFormat::Int, 24) => {
                // Sign-extend by placing the three bytes at the top of an i32.
                let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                value as f32 / 8_388_607.0
            }
            (SampleFormat::Int, _) => {
                let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (f64::from(value) / f64::from(i32::MAX)) as f32
            }
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz {}-bit {}",
            self.sample_rate, self.bits_per_sample, self.sample_format
        )
    }
}

impl Default for TargetFormat {
    /// 44.1kHz, 32-bit float
    fn default() -> Self {
        TargetFormat::float(44100)
    }
}
