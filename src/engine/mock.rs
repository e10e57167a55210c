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

//! A mock engine. It keeps a real timbre memory map and accepts DT1 writes,
//! but renders plain sine voices instead of emulating the hardware.

use std::f32::consts::TAU;

use midly::{live::LiveEvent, MidiMessage};
use tracing::{debug, warn};

use super::{EngineError, EngineSettings, RomSet, NATIVE_CHANNELS, NATIVE_SAMPLE_RATE};
use crate::timbre::{
    COMMAND_DT1, MT32_MODEL_ID, ROLAND_ID, SYSEX_END, SYSEX_START, TIMBRE_BASE,
    TIMBRE_RECORD_SIZE,
};

/// Number of part timbres in the temporary timbre area.
const TIMBRE_PARTS: usize = 8;

/// Linear offset of the temporary timbre area (0x04 00 00 in 7-bit addressing).
const TIMBRE_AREA_OFFSET: usize = (TIMBRE_BASE as usize) << 14;

const MEMORY_SIZE: usize = TIMBRE_PARTS * TIMBRE_RECORD_SIZE;

const PARTIALS: u32 = 32;

/// Timbre names are the first ten bytes of a record.
const TIMBRE_NAME_LEN: usize = 10;

/// Voice amplitude at full velocity, before output gain.
const VOICE_LEVEL: f32 = 0.125;

/// Opens mock engines.
pub struct Factory;

impl super::EngineFactory for Factory {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(
        &self,
        roms: &RomSet,
        settings: &EngineSettings,
    ) -> Result<Box<dyn super::Engine>, EngineError> {
        if roms.control().is_empty() || roms.pcm().is_empty() {
            return Err(EngineError::Open("ROM images must not be empty".to_string()));
        }

        Ok(Box::new(Engine::new(settings.clone())))
    }
}

#[derive(Clone)]
struct Voice {
    channel: u8,
    key: u8,
    velocity: u8,
    phase: f32,
    step: f32,
}

/// A mock engine. Renders one sine per held note on the bus's part channel.
/// There is no reverb stage, so `EngineSettings::reverb` has no effect.
#[derive(Clone)]
pub struct Engine {
    output_gain: f32,
    memory: Vec<u8>,
    voices: Vec<Voice>,
}

impl Engine {
    /// Creates an engine with the default timbre memory.
    pub fn new(settings: EngineSettings) -> Engine {
        let mut memory = vec![0u8; MEMORY_SIZE];
        for (part, record) in memory.chunks_exact_mut(TIMBRE_RECORD_SIZE).enumerate() {
            let name = format!("{:<width$}", format!("Timbre {}", part + 1), width = TIMBRE_NAME_LEN);
            record[..TIMBRE_NAME_LEN].copy_from_slice(&name.as_bytes()[..TIMBRE_NAME_LEN]);
            for (i, byte) in record.iter_mut().enumerate().skip(TIMBRE_NAME_LEN) {
                *byte = ((part * 31 + i * 7) % 101) as u8;
            }
        }

        Engine {
            output_gain: settings.output_gain,
            memory,
            voices: Vec::with_capacity(PARTIALS as usize),
        }
    }

    /// Number of voices currently sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// The MIDI channel that feeds the given bus. Parts 1-8 listen on channels 2-9.
    fn bus_channel(bus: usize) -> u8 {
        (bus as u8 + 1) & 0x0F
    }

    /// Converts a 7-bit sysex address to an index into the timbre area, if it lies inside it.
    fn memory_offset(address: u32) -> Option<usize> {
        let linear = (((address >> 16) & 0x7F) << 14) | (((address >> 8) & 0x7F) << 7) | (address & 0x7F);
        (linear as usize).checked_sub(TIMBRE_AREA_OFFSET)
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) {
        let Some(start) = Self::memory_offset(address) else {
            debug!(address = format!("{:06X}", address), "Ignoring write outside the timbre area.");
            return;
        };

        for (i, byte) in data.iter().enumerate() {
            if let Some(slot) = self.memory.get_mut(start + i) {
                *slot = byte & 0x7F;
            }
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        if self.voices.len() >= PARTIALS as usize {
            self.voices.remove(0);
        }
        let frequency = 440.0 * 2f32.powf((f32::from(key) - 69.0) / 12.0);
        self.voices.push(Voice {
            channel,
            key,
            velocity,
            phase: 0.0,
            step: TAU * frequency / NATIVE_SAMPLE_RATE as f32,
        });
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        self.voices
            .retain(|voice| !(voice.channel == channel && voice.key == key));
    }

    fn all_notes_off(&mut self, channel: u8) {
        self.voices.retain(|voice| voice.channel != channel);
    }
}

/// Number of bytes in a channel message with the given status byte.
fn channel_message_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 2,
        _ => 3,
    }
}

impl super::Engine for Engine {
    fn render(&mut self, out: &mut [i16], bus: usize) {
        out.fill(0);
        let channel = Engine::bus_channel(bus);
        let gain = self.output_gain;

        for voice in self.voices.iter_mut().filter(|voice| voice.channel == channel) {
            let level = VOICE_LEVEL * gain * f32::from(voice.velocity) / 127.0;
            for frame in out.chunks_exact_mut(NATIVE_CHANNELS) {
                let value = (voice.phase.sin() * level * f32::from(i16::MAX)) as i32;
                for sample in frame.iter_mut() {
                    *sample = (i32::from(*sample) + value).clamp(i16::MIN.into(), i16::MAX.into()) as i16;
                }
                voice.phase = (voice.phase + voice.step) % TAU;
            }
        }
    }

    fn play_short_message(&mut self, message: u32) {
        let bytes = message.to_le_bytes();
        if bytes[0] < 0x80 || bytes[0] >= 0xF0 {
            return;
        }

        let event = match LiveEvent::parse(&bytes[..channel_message_len(bytes[0])]) {
            Ok(event) => event,
            Err(e) => {
                debug!(err = %e, message = format!("{:08X}", message), "Unparseable short message.");
                return;
            }
        };

        if let LiveEvent::Midi { channel, message } = event {
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    self.note_on(channel, key.as_int(), vel.as_int())
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    self.note_off(channel, key.as_int())
                }
                MidiMessage::Controller { controller, .. } if controller.as_int() >= 120 => {
                    self.all_notes_off(channel)
                }
                _ => {}
            }
        }
    }

    fn play_sysex(&mut self, sysex: &[u8]) {
        // F0 41 <device> 16 12 <a1 a2 a3> <data...> <checksum> F7
        if sysex.len() < 10
            || sysex[0] != SYSEX_START
            || sysex[1] != ROLAND_ID
            || sysex[3] != MT32_MODEL_ID
            || sysex[sysex.len() - 1] != SYSEX_END
        {
            debug!(len = sysex.len(), "Ignoring foreign sysex.");
            return;
        }
        if sysex[4] != COMMAND_DT1 {
            return;
        }

        let body = &sysex[5..sysex.len() - 2];
        let checksum = sysex[sysex.len() - 2];
        if super::Engine::checksum(self, body, 0) != checksum {
            warn!(len = sysex.len(), "Discarding DT1 with a bad checksum.");
            return;
        }

        let address = (u32::from(body[0]) << 16) | (u32::from(body[1]) << 8) | u32::from(body[2]);
        self.write_memory(address, &body[3..]);
    }

    fn read_memory(&self, address: u32, out: &mut [u8]) {
        out.fill(0);
        let Some(start) = Engine::memory_offset(address) else {
            return;
        };
        if let Some(available) = self.memory.get(start..) {
            let len = available.len().min(out.len());
            out[..len].copy_from_slice(&available[..len]);
        }
    }

    fn checksum(&self, data: &[u8], seed: u8) -> u8 {
        data.iter()
            .fold(0u8.wrapping_sub(seed), |checksum, byte| checksum.wrapping_sub(*byte))
            & 0x7F
    }

    fn partial_count(&self) -> u32 {
        PARTIALS
    }
}
