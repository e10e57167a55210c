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

//! Timbre dump replies.
//!
//! A timbre query (`F0 41 10 16 11 04 hh ll ... F7`) is answered with a DT1
//! message carrying the raw timbre record read out of engine memory:
//!
//! ```text
//! F0 41 10 16 12 04 hh ll <246 record bytes> <checksum> F7
//! ```
//!
//! The checksum covers the base byte, both address bytes and the record.

use std::fmt;

use tracing::debug;

use crate::engine::Engine;
use crate::midi::{MidiError, OutputPort};
use crate::util::hex_string;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const ROLAND_ID: u8 = 0x41;
pub const DEVICE_ID: u8 = 0x10;
pub const MT32_MODEL_ID: u8 = 0x16;
/// Request data.
pub const COMMAND_RQ1: u8 = 0x11;
/// Data set.
pub const COMMAND_DT1: u8 = 0x12;

/// High address byte of the temporary timbre area (0x04 00 00).
pub const TIMBRE_BASE: u8 = 0x04;

/// Size of one timbre parameter record in engine memory.
pub const TIMBRE_RECORD_SIZE: usize = 246;

const HEADER: [u8; 5] = [SYSEX_START, ROLAND_ID, DEVICE_ID, MT32_MODEL_ID, COMMAND_DT1];
const QUERY_PREFIX: [u8; 6] = [
    SYSEX_START,
    ROLAND_ID,
    DEVICE_ID,
    MT32_MODEL_ID,
    COMMAND_RQ1,
    TIMBRE_BASE,
];

const RECORD_START: usize = HEADER.len() + 3;
const RECORD_END: usize = RECORD_START + TIMBRE_RECORD_SIZE;

/// Length of a complete timbre reply.
pub const REPLY_LEN: usize = RECORD_END + 2;

/// Offset of a timbre record inside the timbre area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimbreAddress {
    pub high: u8,
    pub low: u8,
}

impl TimbreAddress {
    pub const fn new(high: u8, low: u8) -> TimbreAddress {
        TimbreAddress { high, low }
    }

    /// The sysex memory address of the record.
    pub fn memory_address(self) -> u32 {
        (u32::from(TIMBRE_BASE) << 16) | (u32::from(self.high) << 8) | u32::from(self.low)
    }

    /// Extracts the queried address from a complete sysex message, if the message
    /// is a timbre query carrying both address bytes.
    pub fn from_query(message: &[u8]) -> Option<TimbreAddress> {
        if !message.starts_with(&QUERY_PREFIX) {
            return None;
        }

        match message.get(QUERY_PREFIX.len()..QUERY_PREFIX.len() + 2) {
            Some(&[high, low]) if high < 0x80 && low < 0x80 => Some(TimbreAddress::new(high, low)),
            _ => None,
        }
    }

    /// Returns the well-known slot stored at this address.
    pub fn slot(self) -> Option<&'static TimbreSlot> {
        TIMBRE_SLOTS.iter().find(|slot| slot.address == self)
    }
}

impl fmt::Display for TimbreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", TIMBRE_BASE, self.high, self.low)
    }
}

/// One of the five part timbres persisted with the host state.
#[derive(Debug, PartialEq, Eq)]
pub struct TimbreSlot {
    /// Persisted-state key.
    pub key: &'static str,
    pub address: TimbreAddress,
}

/// Part timbres 1 through 5, one record apart in 7-bit address space.
pub const TIMBRE_SLOTS: [TimbreSlot; 5] = [
    TimbreSlot {
        key: "timbre1.syx",
        address: TimbreAddress::new(0x00, 0x00),
    },
    TimbreSlot {
        key: "timbre2.syx",
        address: TimbreAddress::new(0x01, 0x76),
    },
    TimbreSlot {
        key: "timbre3.syx",
        address: TimbreAddress::new(0x03, 0x6C),
    },
    TimbreSlot {
        key: "timbre4.syx",
        address: TimbreAddress::new(0x05, 0x62),
    },
    TimbreSlot {
        key: "timbre5.syx",
        address: TimbreAddress::new(0x07, 0x58),
    },
];

/// A complete timbre reply, stored inline so it can be built on the audio thread.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    bytes: [u8; REPLY_LEN],
}

impl ReplyMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn address(&self) -> TimbreAddress {
        TimbreAddress::new(self.bytes[6], self.bytes[7])
    }

    pub fn record(&self) -> &[u8] {
        &self.bytes[RECORD_START..RECORD_END]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[RECORD_END]
    }

    /// The bytes the checksum is computed over.
    pub fn checksummed(&self) -> &[u8] {
        &self.bytes[HEADER.len()..RECORD_END]
    }
}

impl fmt::Debug for ReplyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplyMessage({})", hex_string(&self.bytes))
    }
}

/// Builds the reply for the given address from engine memory.
pub fn build_reply(engine: &dyn Engine, address: TimbreAddress) -> ReplyMessage {
    let mut bytes = [0u8; REPLY_LEN];
    build_reply_into(engine, address, &mut bytes);
    ReplyMessage { bytes }
}

/// Writes the reply for the given address into `out` and returns its length.
///
/// Panics if `out` is shorter than [`REPLY_LEN`].
pub fn build_reply_into(engine: &dyn Engine, address: TimbreAddress, out: &mut [u8]) -> usize {
    assert!(
        out.len() >= REPLY_LEN,
        "timbre reply needs {} bytes, buffer has {}",
        REPLY_LEN,
        out.len()
    );

    out[..HEADER.len()].copy_from_slice(&HEADER);
    out[HEADER.len()] = TIMBRE_BASE;
    out[HEADER.len() + 1] = address.high;
    out[HEADER.len() + 2] = address.low;
    engine.read_memory(address.memory_address(), &mut out[RECORD_START..RECORD_END]);

    out[RECORD_END] = engine.checksum(&out[HEADER.len()..RECORD_END], 0);
    out[RECORD_END + 1] = SYSEX_END;

    REPLY_LEN
}

/// Builds the reply for the given address and sends it as a single message.
pub fn transmit(
    engine: &dyn Engine,
    address: TimbreAddress,
    port: &mut dyn OutputPort,
) -> Result<(), MidiError> {
    let reply = build_reply(engine, address);
    debug!(address = %address, port = %port, "Transmitting timbre dump.");
    port.send(reply.as_bytes())
}
