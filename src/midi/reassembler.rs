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

//! Reassembles MIDI packets into short messages and complete sysex messages.
//!
//! MIDI transports fragment sysex freely: a single message may arrive in one
//! packet or split across many, at any byte boundary. The reassembler keeps
//! the partial message between calls and dispatches it once the 0xF7
//! terminator arrives.

use tracing::{debug, warn};

use super::MidiError;
use crate::timbre::{TimbreAddress, SYSEX_END, SYSEX_START};
use crate::util::hex_string;

/// Largest sysex message the reassembler will hold.
pub const SYSEX_CAPACITY: usize = 2048;

/// Longest packet treated as a short message.
const SHORT_MESSAGE_MAX: usize = 4;

/// A raw MIDI packet as delivered by the transport.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Arrival time in microseconds.
    pub timestamp: u64,
    pub data: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn new(timestamp: u64, data: &'a [u8]) -> Packet<'a> {
        Packet { timestamp, data }
    }
}

/// Receives the messages the reassembler produces.
pub trait MessageSink {
    /// A short message packed little-endian.
    fn short_message(&mut self, message: u32);

    /// A complete sysex message, 0xF0 through 0xF7.
    fn sysex(&mut self, message: &[u8]);

    /// A timbre query. Raised after the query's sysex has been handed to [`MessageSink::sysex`].
    fn timbre_query(&mut self, address: TimbreAddress);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Accumulating,
}

/// Reassembly state for one input stream.
pub struct Reassembler {
    phase: Phase,
    buffer: Box<[u8; SYSEX_CAPACITY]>,
    len: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new()
    }
}

impl Reassembler {
    pub fn new() -> Reassembler {
        Reassembler {
            phase: Phase::Idle,
            buffer: Box::new([0; SYSEX_CAPACITY]),
            len: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The partial sysex accumulated so far.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Discards any partial message.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.len = 0;
    }

    /// Processes a batch of packets in order. An overflowing packet discards the
    /// partial message and processing continues with the next packet.
    pub fn intake<S: MessageSink + ?Sized>(&mut self, packets: &[Packet<'_>], sink: &mut S) {
        for packet in packets {
            if let Err(e) = self.feed(packet.data, sink) {
                warn!(
                    err = %e,
                    timestamp = packet.timestamp,
                    "Discarding partial sysex message."
                );
            }
        }
    }

    /// Processes a single packet.
    pub fn feed<S: MessageSink + ?Sized>(
        &mut self,
        data: &[u8],
        sink: &mut S,
    ) -> Result<(), MidiError> {
        if data.is_empty() {
            return Ok(());
        }

        match self.phase {
            Phase::Idle if data[0] == SYSEX_START => {
                self.len = 0;
                self.append(data)?;
            }
            Phase::Idle if data.len() <= SHORT_MESSAGE_MAX => {
                sink.short_message(pack_short_message(data));
                return Ok(());
            }
            Phase::Idle => {
                debug!(
                    len = data.len(),
                    data = hex_string(&data[..SHORT_MESSAGE_MAX + 1]),
                    "Dropping unrecognized packet."
                );
                return Ok(());
            }
            Phase::Accumulating => self.append(data)?,
        }

        if self.buffer[self.len - 1] == SYSEX_END {
            self.dispatch(sink);
        } else {
            self.phase = Phase::Accumulating;
        }

        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<(), MidiError> {
        let end = self.len + data.len();
        if end > SYSEX_CAPACITY {
            let attempted = end;
            self.reset();
            return Err(MidiError::Overflow {
                attempted,
                capacity: SYSEX_CAPACITY,
            });
        }

        self.buffer[self.len..end].copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    fn dispatch<S: MessageSink + ?Sized>(&mut self, sink: &mut S) {
        let message = &self.buffer[..self.len];
        sink.sysex(message);
        if let Some(address) = TimbreAddress::from_query(message) {
            sink.timbre_query(address);
        }
        self.reset();
    }
}

/// Packs up to four bytes little-endian. Missing bytes are zero.
pub fn pack_short_message(data: &[u8]) -> u32 {
    data.iter()
        .take(SHORT_MESSAGE_MAX)
        .enumerate()
        .fold(0, |word, (i, byte)| word | (u32::from(*byte) << (8 * i)))
}
