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
use std::error::Error;

pub mod buffer;
pub mod converter;
pub mod cpal;
pub mod dispatcher;
pub mod format;

pub use buffer::{BusOutput, RenderBuffer};
pub use converter::{FormatConverter, NativeProducer};
pub use dispatcher::{RenderDispatcher, RenderStatus};
pub use format::{SampleFormat, TargetFormat};

/// Host buses are interleaved stereo.
pub const OUTPUT_CHANNELS: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unable to allocate {bytes} bytes for bus {bus}")]
    Allocation { bus: usize, bytes: usize },

    #[error("resampling from {0} Hz to {1} Hz failed")]
    ResamplingFailed(u32, u32),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, Box<dyn Error>> {
    cpal::list()
}
