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

//! The synthesis engine collaborator.
//!
//! Engines are opaque: they render audio in a fixed native format, accept
//! short MIDI messages and sysex, and expose their parameter memory for reads.
//! Everything else in this crate talks to them through [`Engine`].

use tracing::{info, span, Level};

pub mod mock;
pub mod rom;

pub use rom::{RomError, RomImage, RomSet};

/// Native engine sample rate in Hz.
pub const NATIVE_SAMPLE_RATE: u32 = 32000;

/// Native engine output is interleaved stereo.
pub const NATIVE_CHANNELS: usize = 2;

/// Bytes per native sample (signed 16-bit).
pub const NATIVE_BYTES_PER_SAMPLE: usize = 2;

/// The most engines a single host will run in parallel.
pub const MAX_ENGINES: usize = 8;

/// A synthesis engine instance. Each instance owns its memory image and voices.
pub trait Engine: Send {
    /// Renders `out.len() / 2` interleaved stereo frames for the given bus.
    fn render(&mut self, out: &mut [i16], bus: usize);

    /// Plays a short MIDI message packed little-endian into a word.
    fn play_short_message(&mut self, message: u32);

    /// Plays a complete sysex message, including the 0xF0 and 0xF7 markers.
    fn play_sysex(&mut self, sysex: &[u8]);

    /// Reads `out.len()` bytes of parameter memory starting at the given sysex address.
    fn read_memory(&self, address: u32, out: &mut [u8]);

    /// Computes the sysex checksum of the given bytes.
    fn checksum(&self, data: &[u8], seed: u8) -> u8;

    /// Returns the number of partials the engine was configured with.
    fn partial_count(&self) -> u32;
}

/// Settings applied to every engine when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Linear output gain.
    pub output_gain: f32,
    /// Whether the engine's reverb is enabled.
    pub reverb: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            output_gain: 2.0,
            reverb: false,
        }
    }
}

/// Opens engines from a loaded ROM set.
pub trait EngineFactory: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &str;

    /// Opens a new engine instance.
    fn open(&self, roms: &RomSet, settings: &EngineSettings) -> Result<Box<dyn Engine>, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ROM error: {0}")]
    Rom(#[from] RomError),

    #[error("no engine backend named {0}")]
    UnknownBackend(String),

    #[error("engine count must be between 1 and {max}, got {count}")]
    InvalidCount { count: usize, max: usize },

    #[error("engine failed to open: {0}")]
    Open(String),
}

/// Gets the engine backend with the given name.
pub fn get_factory(name: &str) -> Result<Box<dyn EngineFactory>, EngineError> {
    if name.starts_with("mock") {
        return Ok(Box::new(mock::Factory));
    }

    Err(EngineError::UnknownBackend(name.to_string()))
}

/// An ordered set of engines. Engine `i` renders bus `i`.
pub struct EngineSet {
    engines: Vec<Box<dyn Engine>>,
}

impl EngineSet {
    /// Opens `count` engines from the given ROM set. The ROM images are released once
    /// every engine is open.
    pub fn open(
        factory: &dyn EngineFactory,
        roms: RomSet,
        count: usize,
        settings: &EngineSettings,
    ) -> Result<EngineSet, EngineError> {
        let span = span!(Level::INFO, "open engines");
        let _enter = span.enter();

        if count == 0 || count > MAX_ENGINES {
            return Err(EngineError::InvalidCount {
                count,
                max: MAX_ENGINES,
            });
        }

        let engines = (0..count)
            .map(|_| factory.open(&roms, settings))
            .collect::<Result<Vec<Box<dyn Engine>>, EngineError>>()?;
        drop(roms);

        info!(
            backend = factory.name(),
            engines = engines.len(),
            partials = engines[0].partial_count(),
            "Engines configured."
        );

        Ok(EngineSet { engines })
    }

    /// Wraps already opened engines.
    pub fn from_engines(engines: Vec<Box<dyn Engine>>) -> EngineSet {
        EngineSet { engines }
    }

    /// An engine set with no engines. Hosts fall back to this when ROMs are missing.
    pub fn empty() -> EngineSet {
        EngineSet {
            engines: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// The engine timbre queries and state exports are answered from.
    pub fn primary(&self) -> Option<&dyn Engine> {
        self.engines.first().map(|engine| engine.as_ref())
    }

    /// Plays a sysex message on every engine.
    pub fn broadcast_sysex(&mut self, sysex: &[u8]) {
        for engine in self.engines.iter_mut() {
            engine.play_sysex(sysex);
        }
    }

    /// Consumes the set, returning the engines in bus order.
    pub fn into_engines(self) -> Vec<Box<dyn Engine>> {
        self.engines
    }
}
